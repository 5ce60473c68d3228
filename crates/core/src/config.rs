use serde::Deserialize;

/// Named user-agent presets. `Custom` requires `custom_ua` to be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserAgentPreset {
    ScreamingFrog,
    ParadiseCrawler,
    Googlebot,
    Custom,
}

impl UserAgentPreset {
    pub fn token(&self, custom_ua: Option<&str>) -> String {
        match self {
            UserAgentPreset::ScreamingFrog => "Screaming Frog SEO Spider/20.0".to_string(),
            UserAgentPreset::ParadiseCrawler => "ParadiseCrawler/1.0".to_string(),
            UserAgentPreset::Googlebot => {
                "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)"
                    .to_string()
            }
            UserAgentPreset::Custom => custom_ua.unwrap_or("sitecrawler/1.0").to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub fetch: FetchSettings,
    pub robots: RobotsSettings,
    pub sitemap: SitemapSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default)]
    pub max_pages: u64,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default)]
    pub offsite: bool,
    #[serde(default)]
    pub reset_frontier: bool,
}

fn default_max_depth() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchSettings {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_delay")]
    pub delay_secs: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u8,
    #[serde(default = "default_max_body_mb")]
    pub max_body_mb: usize,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub js: bool,
}

fn default_concurrency() -> usize {
    10
}
fn default_timeout() -> u64 {
    20
}
fn default_delay() -> u64 {
    0
}
fn default_max_redirects() -> u8 {
    10
}
fn default_max_body_mb() -> usize {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct RobotsSettings {
    #[serde(default)]
    pub ignore_robots: bool,
    #[serde(default)]
    pub skip_robots_sitemaps: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SitemapSettings {
    #[serde(default)]
    pub skip_sitemaps: bool,
    #[serde(default = "default_sitemap_depth")]
    pub max_recursion_depth: u8,
}

fn default_sitemap_depth() -> u8 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_writers")]
    pub max_workers: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_writers() -> u32 {
    2
}
fn default_batch_size() -> usize {
    500
}

pub const DEFAULT_CONFIG_TOML: &str = r#"
[general]
max_pages = 0
max_depth = 10
offsite = false
reset_frontier = false

[fetch]
concurrency = 10
timeout_secs = 20
delay_secs = 0
max_redirects = 10
max_body_mb = 20
js = false

[robots]
ignore_robots = false
skip_robots_sitemaps = false

[sitemap]
skip_sitemaps = false
max_recursion_depth = 3

[storage]
max_workers = 2
batch_size = 500
"#;

impl Default for AppConfig {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("default config must parse")
    }
}

/// Apply `SQLITECRAWLER_*` environment overrides. CLI flags are applied on
/// top of this afterwards, so CLI always wins.
pub fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(v) = std::env::var("SQLITECRAWLER_MAX_PAGES") {
        if let Ok(n) = v.parse() {
            config.general.max_pages = n;
        }
    }
    if let Ok(v) = std::env::var("SQLITECRAWLER_MAX_DEPTH") {
        if let Ok(n) = v.parse() {
            config.general.max_depth = n;
        }
    }
    if let Ok(v) = std::env::var("SQLITECRAWLER_SAME_HOST_ONLY") {
        config.general.offsite = v == "0";
    }
    if let Ok(v) = std::env::var("SQLITECRAWLER_UA") {
        config.fetch.user_agent = Some(v);
    }
    if let Ok(v) = std::env::var("SQLITECRAWLER_TIMEOUT") {
        if let Ok(n) = v.parse() {
            config.fetch.timeout_secs = n;
        }
    }
    if let Ok(v) = std::env::var("SQLITECRAWLER_CONCURRENCY") {
        if let Ok(n) = v.parse() {
            config.fetch.concurrency = n;
        }
    }
    if let Ok(v) = std::env::var("SQLITECRAWLER_DELAY") {
        if let Ok(n) = v.parse() {
            config.fetch.delay_secs = n;
        }
    }
    if let Ok(v) = std::env::var("SQLITECRAWLER_RESPECT_ROBOTS") {
        config.robots.ignore_robots = v == "0";
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses() {
        let config = AppConfig::default();
        assert_eq!(config.general.max_depth, 10);
        assert_eq!(config.fetch.concurrency, 10);
    }

    #[test]
    fn env_override_wins_over_default() {
        let mut config = AppConfig::default();
        std::env::set_var("SQLITECRAWLER_MAX_DEPTH", "3");
        apply_env_overrides(&mut config);
        std::env::remove_var("SQLITECRAWLER_MAX_DEPTH");
        assert_eq!(config.general.max_depth, 3);
    }
}

use clap::{Parser, ValueEnum};

use sitecrawler_core::config::UserAgentPreset;

/// A persistent, resumable SEO crawler. Fetches from one or more seed URLs,
/// respects robots.txt and per-host pacing, extracts structural content,
/// and stores everything in a pair of on-disk SQLite databases that survive
/// process restarts.
#[derive(Parser, Debug)]
#[command(name = "sitecrawler", version, about)]
pub struct Cli {
    /// Seed URL(s) to start crawling from.
    #[arg(required = true)]
    pub seeds: Vec<String>,

    /// Optional TOML config file, layered under environment and CLI overrides.
    #[arg(long, default_value = "sitecrawler.toml")]
    pub config: String,

    /// Hard cap on fetched pages (0 or absent = unlimited).
    #[arg(long)]
    pub max_pages: Option<u64>,

    /// Frontier enqueue rejects children beyond this depth.
    #[arg(long)]
    pub max_depth: Option<u32>,

    /// Allow enqueueing external-classified URLs.
    #[arg(long)]
    pub offsite: bool,

    /// User-agent preset.
    #[arg(long, value_enum)]
    pub user_agent: Option<CliUserAgent>,

    /// Arbitrary user-agent string. Requires `--user-agent custom`.
    #[arg(long)]
    pub custom_ua: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Fetch parallelism.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Minimum seconds between requests to the same host.
    #[arg(long)]
    pub delay: Option<u64>,

    /// Skip robots.txt enforcement (still parsed for sitemap directives).
    #[arg(long)]
    pub ignore_robots: bool,

    /// Do not read sitemap directives from robots.txt.
    #[arg(long)]
    pub skip_robots_sitemaps: bool,

    /// Do not discover sitemaps at all.
    #[arg(long)]
    pub skip_sitemaps: bool,

    /// Storage writer pool size.
    #[arg(long)]
    pub max_workers: Option<u32>,

    /// Use the scripted-browser fetch backend (renders JavaScript).
    #[arg(long)]
    pub js: bool,

    /// Verbose logging (logs each URL's status on completion).
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet logging (errors and the final summary only).
    #[arg(short, long)]
    pub quiet: bool,

    /// Truncate frontier rows before starting.
    #[arg(long)]
    pub reset_frontier: bool,
}

/// Mirrors `sitecrawler_core::config::UserAgentPreset` as a `clap::ValueEnum`
/// — kept as a thin CLI-facing wrapper so the core crate doesn't need a
/// `clap` dependency just to be parseable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum CliUserAgent {
    ScreamingFrog,
    ParadiseCrawler,
    Googlebot,
    Custom,
}

impl From<CliUserAgent> for UserAgentPreset {
    fn from(value: CliUserAgent) -> Self {
        match value {
            CliUserAgent::ScreamingFrog => UserAgentPreset::ScreamingFrog,
            CliUserAgent::ParadiseCrawler => UserAgentPreset::ParadiseCrawler,
            CliUserAgent::Googlebot => UserAgentPreset::Googlebot,
            CliUserAgent::Custom => UserAgentPreset::Custom,
        }
    }
}

impl Cli {
    /// `--custom-ua` only makes sense paired with `--user-agent custom`;
    /// clap's declarative `requires` can't express "requires a specific
    /// value", so this is checked explicitly (CLI misuse → exit code 2).
    pub fn validate(&self) -> Result<(), String> {
        if self.custom_ua.is_some() && self.user_agent != Some(CliUserAgent::Custom) {
            return Err("--custom-ua requires --user-agent custom".to_string());
        }
        if self.user_agent == Some(CliUserAgent::Custom) && self.custom_ua.is_none() {
            return Err("--user-agent custom requires --custom-ua".to_string());
        }
        if self.verbose && self.quiet {
            return Err("--verbose and --quiet are mutually exclusive".to_string());
        }
        Ok(())
    }
}

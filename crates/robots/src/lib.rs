//! Per-host `robots.txt` fetch, cache, and evaluation.

use std::time::Duration;

use dashmap::DashMap;
use reqwest::Client;
use robotstxt::DefaultMatcher;
use tracing::warn;

/// Outcome of fetching one host's `robots.txt`.
#[derive(Debug, Clone)]
enum Lookup {
    Found(String),
    /// 404 — treated as permissive.
    Unavailable,
    /// Connection error, timeout, or non-404 failure status.
    Unreachable,
}

struct CachedRobots {
    lookup: Lookup,
    sitemaps: Vec<String>,
}

pub struct RobotsCache {
    client: Client,
    user_agent: String,
    cache: DashMap<String, CachedRobots>,
}

/// Whether a host may be crawled, and why the verdict might not be a
/// straightforward parse of `robots.txt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotsVerdict {
    Allowed,
    Disallowed,
    /// robots.txt could not be fetched; permissive because `--ignore-robots`.
    UnavailableIgnored,
    /// robots.txt could not be fetched; permissive but flagged for indexability.
    UnavailableFlagged,
}

impl RobotsVerdict {
    pub fn allows_fetch(&self) -> bool {
        !matches!(self, RobotsVerdict::Disallowed)
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            RobotsVerdict::UnavailableIgnored | RobotsVerdict::UnavailableFlagged
        )
    }
}

impl RobotsCache {
    pub fn new(client: Client, user_agent: String) -> Self {
        Self {
            client,
            user_agent,
            cache: DashMap::new(),
        }
    }

    async fn entry(&self, host: &str) -> dashmap::mapref::one::Ref<'_, String, CachedRobots> {
        if self.cache.contains_key(host) {
            return self.cache.get(host).unwrap();
        }
        let fetched = self.fetch(host).await;
        self.cache.entry(host.to_string()).or_insert(fetched);
        self.cache.get(host).unwrap()
    }

    async fn fetch(&self, host: &str) -> CachedRobots {
        for scheme in ["https", "http"] {
            let url = format!("{scheme}://{host}/robots.txt");
            match self
                .client
                .get(&url)
                .header("User-Agent", &self.user_agent)
                .timeout(Duration::from_secs(10))
                .send()
                .await
            {
                Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => {
                    return CachedRobots {
                        lookup: Lookup::Unavailable,
                        sitemaps: Vec::new(),
                    };
                }
                Ok(resp) if resp.status().is_success() => {
                    let body = resp.text().await.unwrap_or_default();
                    let sitemaps = extract_sitemaps(&body);
                    return CachedRobots {
                        lookup: Lookup::Found(body),
                        sitemaps,
                    };
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!(host, error = %e, "robots.txt fetch failed");
                    continue;
                }
            }
        }
        CachedRobots {
            lookup: Lookup::Unreachable,
            sitemaps: Vec::new(),
        }
    }

    /// Evaluates whether `url` (on `host`) may be fetched. `ignore_robots`
    /// mirrors `--ignore-robots`: when set, an unreachable robots.txt is
    /// fully permissive instead of merely flagged.
    pub async fn check(&self, host: &str, url: &str, ignore_robots: bool) -> RobotsVerdict {
        if ignore_robots {
            let entry = self.entry(host).await;
            if let Lookup::Found(body) = &entry.lookup {
                let allowed = DefaultMatcher::default().one_agent_allowed_by_robots(body, &self.user_agent, url);
                return if allowed {
                    RobotsVerdict::Allowed
                } else {
                    RobotsVerdict::Disallowed
                };
            }
            return RobotsVerdict::UnavailableIgnored;
        }

        let entry = self.entry(host).await;
        match &entry.lookup {
            Lookup::Found(body) => {
                let allowed = DefaultMatcher::default().one_agent_allowed_by_robots(body, &self.user_agent, url);
                if allowed {
                    RobotsVerdict::Allowed
                } else {
                    RobotsVerdict::Disallowed
                }
            }
            Lookup::Unavailable => RobotsVerdict::Allowed,
            Lookup::Unreachable => RobotsVerdict::UnavailableFlagged,
        }
    }

    pub async fn sitemaps(&self, host: &str) -> Vec<String> {
        self.entry(host).await.sitemaps.clone()
    }
}

fn extract_sitemaps(robots_body: &str) -> Vec<String> {
    robots_body
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = line
                .strip_prefix("Sitemap:")
                .or_else(|| line.strip_prefix("sitemap:"))?;
            Some(rest.trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_sitemap_directives() {
        let body = "User-agent: *\nDisallow: /admin\nSitemap: https://example.com/sitemap.xml\nSitemap: https://example.com/sitemap2.xml\n";
        let sitemaps = extract_sitemaps(body);
        assert_eq!(
            sitemaps,
            vec![
                "https://example.com/sitemap.xml".to_string(),
                "https://example.com/sitemap2.xml".to_string()
            ]
        );
    }

    #[test]
    fn verdict_allows_fetch_except_disallowed() {
        assert!(RobotsVerdict::Allowed.allows_fetch());
        assert!(RobotsVerdict::UnavailableIgnored.allows_fetch());
        assert!(RobotsVerdict::UnavailableFlagged.allows_fetch());
        assert!(!RobotsVerdict::Disallowed.allows_fetch());
    }

    #[tokio::test]
    async fn disallow_all_blocks_matching_path() {
        let cache = RobotsCache::new(Client::new(), "sitecrawler/1.0".to_string());
        cache.cache.insert(
            "example.com".to_string(),
            CachedRobots {
                lookup: Lookup::Found("User-agent: *\nDisallow: /private\n".to_string()),
                sitemaps: Vec::new(),
            },
        );
        let verdict = cache.check("example.com", "https://example.com/private/page", false).await;
        assert_eq!(verdict, RobotsVerdict::Disallowed);
        let verdict = cache.check("example.com", "https://example.com/public", false).await;
        assert_eq!(verdict, RobotsVerdict::Allowed);
    }
}

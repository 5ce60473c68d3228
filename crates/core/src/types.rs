use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a URL relates to the seed host(s) of this crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlClass {
    Internal,
    External,
    Social,
    Network,
    Mail,
    Other,
}

impl UrlClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlClass::Internal => "internal",
            UrlClass::External => "external",
            UrlClass::Social => "social",
            UrlClass::Network => "network",
            UrlClass::Mail => "mail",
            UrlClass::Other => "other",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub max_body_size: usize,
    pub max_redirects: u8,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            max_body_size: 20 * 1024 * 1024,
            max_redirects: 10,
            user_agent: "sitecrawler/1.0".to_string(),
        }
    }
}

/// One hop of a redirect chain as observed by the fetcher.
#[derive(Debug, Clone)]
pub struct RedirectHop {
    pub url: String,
    pub status_code: u16,
}

/// Result of a single fetch, possibly following several redirect hops.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub requested_url: String,
    pub final_url: String,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub response_time_ms: u64,
    /// Hops strictly before the final response; empty if there was no redirect.
    pub redirect_chain: Vec<RedirectHop>,
    /// Set when the chain was cut short because a URL repeated (redirect loop).
    pub loop_detected: bool,
    /// Set when the chain was cut short because it hit `max_redirects`
    /// without either finishing or looping. `redirect_chain` still holds
    /// every hop actually followed.
    pub redirect_cap_exceeded: bool,
}

/// A unit of work handed from the frontier to a fetch worker.
#[derive(Debug, Clone)]
pub struct CrawlJob {
    pub url_id: i64,
    pub url: String,
    pub depth: u32,
    pub parent_url_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaRobotsDirectives {
    pub noindex: bool,
    pub nofollow: bool,
    pub noarchive: bool,
    pub nosnippet: bool,
    pub raw_tokens: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct HreflangEntry {
    pub language_code: String,
    pub href: String,
}

#[derive(Debug, Clone)]
pub struct ExtractedLink {
    pub target_url: String,
    pub anchor_text: Option<String>,
    pub xpath: String,
    pub raw_href: String,
    pub rel: Vec<String>,
}

/// Everything the extractor pulls out of one fetched HTML document.
#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub h1: Vec<String>,
    pub h2: Vec<String>,
    pub word_count: u32,
    pub canonical_url: Option<String>,
    pub meta_robots: MetaRobotsDirectives,
    pub hreflang_html: Vec<HreflangEntry>,
    pub links: Vec<ExtractedLink>,
}

/// Bits explaining why a URL was (or wasn't) judged indexable, queryable
/// without re-deriving the verdict from its sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReasonBitmap(pub u16);

impl ReasonBitmap {
    pub const ROBOTS_TXT_DISALLOW: ReasonBitmap = ReasonBitmap(1 << 0);
    pub const ROBOTS_TXT_UNAVAILABLE: ReasonBitmap = ReasonBitmap(1 << 1);
    pub const META_NOINDEX: ReasonBitmap = ReasonBitmap(1 << 2);
    pub const HEADER_NOINDEX: ReasonBitmap = ReasonBitmap(1 << 3);
    pub const NON_2XX_STATUS: ReasonBitmap = ReasonBitmap(1 << 4);

    pub fn contains(&self, other: ReasonBitmap) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ReasonBitmap) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for ReasonBitmap {
    type Output = ReasonBitmap;
    fn bitor(self, rhs: ReasonBitmap) -> ReasonBitmap {
        ReasonBitmap(self.0 | rhs.0)
    }
}

/// Composite crawlability verdict for one URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexabilityVerdict {
    pub robots_txt_allows: bool,
    pub html_meta_allows: bool,
    pub http_header_allows: bool,
    pub overall_indexable: bool,
    pub reasons: ReasonBitmap,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_bitmap_combines() {
        let mut r = ReasonBitmap::default();
        r.insert(ReasonBitmap::META_NOINDEX);
        r.insert(ReasonBitmap::ROBOTS_TXT_DISALLOW);
        assert!(r.contains(ReasonBitmap::META_NOINDEX));
        assert!(r.contains(ReasonBitmap::ROBOTS_TXT_DISALLOW));
        assert!(!r.contains(ReasonBitmap::HEADER_NOINDEX));
    }
}

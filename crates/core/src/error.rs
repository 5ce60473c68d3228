use thiserror::Error;

/// Per-URL error kinds. Almost all of these are *recorded*, not propagated —
/// only `StorageFatal` and `SchemaMismatch` abort the crawl (see `CrawlError`
/// at the controller boundary).
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("malformed URL: {0}")]
    MalformedUrl(String),

    #[error("robots.txt unavailable for {host}")]
    RobotsUnavailable { host: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("timeout after {0}s")]
    Timeout(u64),

    #[error("http error: status {0}")]
    Http(u16),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("storage busy, retry")]
    StorageBusy,

    #[error("storage fatal: {0}")]
    StorageFatal(String),

    #[error(
        "schema mismatch: on-disk version {found}, expected {expected} — delete the *_pages.db/*_crawl.db \
         pair or run against a build that still supports version {found} before resuming this crawl"
    )]
    SchemaMismatch { found: i64, expected: i64 },

    #[error("config error: {0}")]
    Config(String),

    #[error("body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: usize, max: usize },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CrawlError {
    /// Whether the main loop should abort the run entirely.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CrawlError::StorageFatal(_) | CrawlError::SchemaMismatch { .. }
        )
    }
}

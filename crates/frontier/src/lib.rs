//! Persistent FIFO-ish frontier. A thin named-component facade
//! over `sitecrawler-storage`'s frontier table — leasing state itself lives
//! there (it must survive alongside the pool it locks against), this crate
//! exposes the operation contract the crawl controller drives.

use sitecrawler_core::{CrawlError, CrawlJob};
use sitecrawler_storage::Storage;

#[derive(Clone)]
pub struct Frontier {
    storage: Storage,
    max_depth: u32,
}

impl Frontier {
    pub fn new(storage: Storage, max_depth: u32) -> Self {
        Self { storage, max_depth }
    }

    /// No-op if a row exists for `url_id`. Rejects (silently skips) if
    /// `depth > max_depth`. Returns whether the URL was newly queued.
    pub async fn enqueue(&self, url_id: i64, depth: u32, parent: Option<i64>) -> Result<bool, CrawlError> {
        self.storage.frontier_enqueue(url_id, depth, parent, self.max_depth).await
    }

    /// Sitemap-sourced URLs are roots for crawl purposes and always enqueue
    /// at depth 0 regardless of where they were discovered.
    pub async fn enqueue_root(&self, url_id: i64) -> Result<bool, CrawlError> {
        self.storage.frontier_enqueue(url_id, 0, None, self.max_depth).await
    }

    pub async fn lease(&self, n: u32) -> Result<Vec<CrawlJob>, CrawlError> {
        self.storage.frontier_lease(n).await
    }

    pub async fn complete(&self, url_id: i64) -> Result<(), CrawlError> {
        self.storage.frontier_complete(url_id).await
    }

    pub async fn reset(&self) -> Result<(), CrawlError> {
        self.storage.frontier_reset().await
    }

    pub async fn remaining(&self) -> Result<i64, CrawlError> {
        self.storage.frontier_remaining().await
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn test_frontier(max_depth: u32) -> (Frontier, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let storage = Storage::open(&dir.path().join("pages.db"), &dir.path().join("crawl.db"), 2)
            .await
            .unwrap();
        (Frontier::new(storage, max_depth), dir)
    }

    #[tokio::test]
    async fn child_depth_respects_max_depth() {
        let (frontier, _dir) = test_frontier(2).await;
        let (url_id, _) = frontier.storage().intern_url("http://example.com/a", "example.com", "http", "internal").await.unwrap();
        assert!(!frontier.enqueue(url_id, 3, None).await.unwrap());
        assert_eq!(frontier.remaining().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sitemap_roots_enqueue_at_depth_zero_regardless() {
        let (frontier, _dir) = test_frontier(0).await;
        let (url_id, _) = frontier.storage().intern_url("http://example.com/a", "example.com", "http", "internal").await.unwrap();
        assert!(frontier.enqueue_root(url_id).await.unwrap());
    }

    #[tokio::test]
    async fn lease_complete_reset_roundtrip() {
        let (frontier, _dir) = test_frontier(10).await;
        let (url_id, _) = frontier.storage().intern_url("http://example.com/a", "example.com", "http", "internal").await.unwrap();
        frontier.enqueue_root(url_id).await.unwrap();
        let jobs = frontier.lease(5).await.unwrap();
        assert_eq!(jobs.len(), 1);
        frontier.complete(url_id).await.unwrap();
        assert_eq!(frontier.remaining().await.unwrap(), 0);
        frontier.reset().await.unwrap();
        assert_eq!(frontier.remaining().await.unwrap(), 0);
    }
}

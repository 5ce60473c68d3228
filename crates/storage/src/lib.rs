use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::info;

use sitecrawler_core::{CrawlError, CrawlJob, ReasonBitmap};

const SCHEMA_VERSION: i64 = 1;

/// Two SQLite databases: `pages` holds bulky raw artifacts, `crawl` holds
/// normalized metadata. Each pool is sized from `--max-workers`; SQLite
/// serializes writes at the file level regardless of pool size, so the
/// pool itself doubles as the writer queue.
#[derive(Clone)]
pub struct Storage {
    crawl: SqlitePool,
    pages: SqlitePool,
    /// In-process only, never persisted — rows stay `queued` on disk while
    /// leased, giving at-least-once semantics across crashes.
    leased: Arc<Mutex<HashSet<i64>>>,
}

fn map_err(e: sqlx::Error) -> CrawlError {
    match &e {
        sqlx::Error::PoolTimedOut => CrawlError::StorageBusy,
        sqlx::Error::Database(db) if db.message().contains("locked") || db.message().contains("busy") => {
            CrawlError::StorageBusy
        }
        _ => CrawlError::StorageFatal(e.to_string()),
    }
}

/// Retries a write on `StorageBusy` with the same two-attempt exponential
/// backoff the fetcher uses for transient HTTP failures (250ms, 1s) —
/// callers treat a busy writer queue as retryable per spec §7.
async fn retry_on_busy<T, F, Fut>(mut op: F) -> Result<T, CrawlError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, CrawlError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(CrawlError::StorageBusy) if attempt < 2 => {
                attempt += 1;
                let backoff = if attempt == 1 { Duration::from_millis(250) } else { Duration::from_secs(1) };
                tokio::time::sleep(backoff).await;
            }
            other => return other,
        }
    }
}

async fn open_pool(path: &Path, max_workers: u32) -> Result<SqlitePool, CrawlError> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
        .map_err(|e| CrawlError::StorageFatal(e.to_string()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(max_workers.max(1))
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
        .map_err(map_err)
}

async fn check_schema_version(pool: &SqlitePool) -> Result<(), CrawlError> {
    let row = sqlx::query("SELECT value FROM meta WHERE key = 'schema_version'")
        .fetch_one(pool)
        .await
        .map_err(map_err)?;
    let found: String = row.try_get("value").map_err(map_err)?;
    let found: i64 = found.parse().map_err(|_| CrawlError::StorageFatal("non-numeric schema_version".into()))?;
    if found != SCHEMA_VERSION {
        return Err(CrawlError::SchemaMismatch {
            found,
            expected: SCHEMA_VERSION,
        });
    }
    Ok(())
}

impl Storage {
    /// Opens (creating if absent) the two database files, runs embedded
    /// migrations on first open, and verifies the schema version.
    pub async fn open(pages_path: &Path, crawl_path: &Path, max_workers: u32) -> Result<Self, CrawlError> {
        let pages = open_pool(pages_path, max_workers).await?;
        let crawl = open_pool(crawl_path, max_workers).await?;

        let pages_meta_exists: bool = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name='meta'")
            .fetch_optional(&pages)
            .await
            .map_err(map_err)?
            .is_some();
        if !pages_meta_exists {
            sqlx::raw_sql(include_str!("../migrations/pages_001_init.sql"))
                .execute(&pages)
                .await
                .map_err(map_err)?;
            info!("pages database initialized");
        }

        let crawl_meta_exists: bool = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name='meta'")
            .fetch_optional(&crawl)
            .await
            .map_err(map_err)?
            .is_some();
        if !crawl_meta_exists {
            sqlx::raw_sql(include_str!("../migrations/crawl_001_init.sql"))
                .execute(&crawl)
                .await
                .map_err(map_err)?;
            info!("crawl database initialized");
        }

        check_schema_version(&pages).await?;
        check_schema_version(&crawl).await?;

        Ok(Self {
            crawl,
            pages,
            leased: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn crawl_pool(&self) -> &SqlitePool {
        &self.crawl
    }

    pub fn pages_pool(&self) -> &SqlitePool {
        &self.pages
    }

    // ---- URL registry ----

    /// `INSERT ... ON CONFLICT DO UPDATE ... RETURNING` — race-safe under
    /// SQLite's single-writer model without a separate SELECT round-trip.
    pub async fn intern_url(
        &self,
        canonical: &str,
        host: &str,
        scheme: &str,
        classification: &str,
    ) -> Result<(i64, bool), CrawlError> {
        let now = chrono::Utc::now().to_rfc3339();
        retry_on_busy(|| async {
            let row = sqlx::query(
                "INSERT INTO urls (canonical, host, scheme, classification, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(canonical) DO UPDATE SET canonical = excluded.canonical
                 RETURNING id, created_at = ?5 AS is_new",
            )
            .bind(canonical)
            .bind(host)
            .bind(scheme)
            .bind(classification)
            .bind(&now)
            .fetch_one(&self.crawl)
            .await
            .map_err(map_err)?;
            let id: i64 = row.try_get("id").map_err(map_err)?;
            let is_new: bool = row.try_get::<i64, _>("is_new").map_err(map_err)? != 0;
            Ok((id, is_new))
        })
        .await
    }

    pub async fn url_canonical(&self, url_id: i64) -> Result<Option<String>, CrawlError> {
        let row = sqlx::query("SELECT canonical FROM urls WHERE id = ?1")
            .bind(url_id)
            .fetch_optional(&self.crawl)
            .await
            .map_err(map_err)?;
        Ok(row.map(|r| r.try_get("canonical")).transpose().map_err(map_err)?)
    }

    // ---- Frontier ----

    /// No-op if a row already exists for `url_id`. Returns whether the URL
    /// was newly queued (false if already present or beyond `max_depth`).
    pub async fn frontier_enqueue(
        &self,
        url_id: i64,
        depth: u32,
        parent_url_id: Option<i64>,
        max_depth: u32,
    ) -> Result<bool, CrawlError> {
        if depth > max_depth {
            return Ok(false);
        }
        let now = chrono::Utc::now().to_rfc3339();
        retry_on_busy(|| async {
            let result = sqlx::query(
                "INSERT INTO frontier (url_id, depth, parent_url_id, status, enqueued_at, updated_at)
                 VALUES (?1, ?2, ?3, 'queued', ?4, ?4)
                 ON CONFLICT(url_id) DO NOTHING",
            )
            .bind(url_id)
            .bind(depth as i64)
            .bind(parent_url_id)
            .bind(&now)
            .execute(&self.crawl)
            .await
            .map_err(map_err)?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    /// Selects up to `n` `queued` rows in insertion order and marks them
    /// leased in-process (never persisted — see `Storage::leased`).
    pub async fn frontier_lease(&self, n: u32) -> Result<Vec<CrawlJob>, CrawlError> {
        let mut leased = self.leased.lock().await;
        let rows = retry_on_busy(|| async {
            sqlx::query(
                "SELECT f.url_id, f.depth, f.parent_url_id, u.canonical
                 FROM frontier f JOIN urls u ON u.id = f.url_id
                 WHERE f.status = 'queued'
                 ORDER BY f.enqueued_at
                 LIMIT ?1",
            )
            .bind((n as i64) + leased.len() as i64)
            .fetch_all(&self.crawl)
            .await
            .map_err(map_err)
        })
        .await?;

        let mut jobs = Vec::with_capacity(n as usize);
        for row in rows {
            if jobs.len() as u32 >= n {
                break;
            }
            let url_id: i64 = row.try_get("url_id").map_err(map_err)?;
            if leased.contains(&url_id) {
                continue;
            }
            leased.insert(url_id);
            jobs.push(CrawlJob {
                url_id,
                url: row.try_get("canonical").map_err(map_err)?,
                depth: row.try_get::<i64, _>("depth").map_err(map_err)? as u32,
                parent_url_id: row.try_get("parent_url_id").map_err(map_err)?,
            });
        }
        Ok(jobs)
    }

    pub async fn frontier_complete(&self, url_id: i64) -> Result<(), CrawlError> {
        let now = chrono::Utc::now().to_rfc3339();
        retry_on_busy(|| async {
            sqlx::query("UPDATE frontier SET status = 'done', updated_at = ?2 WHERE url_id = ?1")
                .bind(url_id)
                .bind(&now)
                .execute(&self.crawl)
                .await
                .map_err(map_err)
        })
        .await?;
        self.leased.lock().await.remove(&url_id);
        Ok(())
    }

    /// Truncates the frontier table only — `urls`/`pages`/etc. are retained
    /// so a `--reset-frontier` re-crawl still dedupes against known URLs.
    pub async fn frontier_reset(&self) -> Result<(), CrawlError> {
        sqlx::query("DELETE FROM frontier").execute(&self.crawl).await.map_err(map_err)?;
        self.leased.lock().await.clear();
        Ok(())
    }

    pub async fn frontier_remaining(&self) -> Result<i64, CrawlError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM frontier WHERE status = 'queued'")
            .fetch_one(&self.crawl)
            .await
            .map_err(map_err)?;
        row.try_get("n").map_err(map_err)
    }

    // ---- Page record (in `pages`) ----

    pub async fn store_page(
        &self,
        url_id: i64,
        final_status_code: u16,
        headers_blob: &[u8],
        body_blob: &[u8],
        content_type: Option<&str>,
        encoding: Option<&str>,
    ) -> Result<(), CrawlError> {
        let now = chrono::Utc::now().to_rfc3339();
        retry_on_busy(|| async {
            sqlx::query(
                "INSERT INTO pages (url_id, final_status_code, fetched_at, headers_blob, body_blob, content_type, encoding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(url_id) DO UPDATE SET
                    final_status_code = excluded.final_status_code,
                    fetched_at = excluded.fetched_at,
                    headers_blob = excluded.headers_blob,
                    body_blob = excluded.body_blob,
                    content_type = excluded.content_type,
                    encoding = excluded.encoding",
            )
            .bind(url_id)
            .bind(final_status_code as i64)
            .bind(&now)
            .bind(headers_blob)
            .bind(body_blob)
            .bind(content_type)
            .bind(encoding)
            .execute(&self.pages)
            .await
            .map_err(map_err)
        })
        .await?;
        Ok(())
    }

    // ---- Content record ----

    #[allow(clippy::too_many_arguments)]
    pub async fn store_content(
        &self,
        url_id: i64,
        title: Option<&str>,
        meta_description: Option<&str>,
        h1_count: u32,
        h2_count: u32,
        first_h1: Option<&str>,
        first_h2: Option<&str>,
        word_count: u32,
        canonical_url_id: Option<i64>,
        meta_robots_id: Option<i64>,
        internal_link_count: u32,
        external_link_count: u32,
    ) -> Result<(), CrawlError> {
        retry_on_busy(|| async {
            sqlx::query(
                "INSERT INTO content (url_id, title, meta_description, h1_count, h2_count, first_h1, first_h2, word_count, canonical_url_id, meta_robots_id, internal_link_count, external_link_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(url_id) DO UPDATE SET
                    title = excluded.title,
                    meta_description = excluded.meta_description,
                    h1_count = excluded.h1_count,
                    h2_count = excluded.h2_count,
                    first_h1 = excluded.first_h1,
                    first_h2 = excluded.first_h2,
                    word_count = excluded.word_count,
                    canonical_url_id = excluded.canonical_url_id,
                    meta_robots_id = excluded.meta_robots_id,
                    internal_link_count = excluded.internal_link_count,
                    external_link_count = excluded.external_link_count",
            )
            .bind(url_id)
            .bind(title)
            .bind(meta_description)
            .bind(h1_count as i64)
            .bind(h2_count as i64)
            .bind(first_h1)
            .bind(first_h2)
            .bind(word_count as i64)
            .bind(canonical_url_id)
            .bind(meta_robots_id)
            .bind(internal_link_count as i64)
            .bind(external_link_count as i64)
            .execute(&self.crawl)
            .await
            .map_err(map_err)
        })
        .await?;
        Ok(())
    }

    pub async fn intern_meta_robots(
        &self,
        noindex: bool,
        nofollow: bool,
        noarchive: bool,
        nosnippet: bool,
        raw_tokens: &str,
    ) -> Result<i64, CrawlError> {
        retry_on_busy(|| async {
            let row = sqlx::query(
                "INSERT INTO meta_robots (noindex, nofollow, noarchive, nosnippet, raw_tokens)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(noindex, nofollow, noarchive, nosnippet, raw_tokens) DO UPDATE SET raw_tokens = excluded.raw_tokens
                 RETURNING id",
            )
            .bind(noindex)
            .bind(nofollow)
            .bind(noarchive)
            .bind(nosnippet)
            .bind(raw_tokens)
            .fetch_one(&self.crawl)
            .await
            .map_err(map_err)?;
            row.try_get("id").map_err(map_err)
        })
        .await
    }

    // ---- Redirect chain ----

    /// `hops` is the ordered list of redirects actually followed — each
    /// entry is the URL landed on and the status code that sent it there.
    /// An empty slice means the response was direct (no redirect) and no
    /// rows are written. `final_status` is the terminal response's own
    /// status (e.g. 200), which is distinct from the last hop's redirect
    /// status (e.g. 301) and is never inferred from `hops`. `loop_detected`
    /// marks a chain that was cut short because a URL repeated, per the
    /// redirect-loop testable property. `cap_exceeded` marks a chain that
    /// was cut short by `max_redirects` with no loop — `hops` is still
    /// every hop the fetcher actually followed before stopping.
    pub async fn store_redirect_chain(
        &self,
        source_url_id: i64,
        hops: &[(i64, u16)],
        final_status: u16,
        loop_detected: bool,
        cap_exceeded: bool,
    ) -> Result<(), CrawlError> {
        if hops.is_empty() {
            return Ok(());
        }
        retry_on_busy(|| async {
            let mut tx = self.crawl.begin().await.map_err(map_err)?;
            sqlx::query("DELETE FROM redirects WHERE source_url_id = ?1")
                .bind(source_url_id)
                .execute(&mut *tx)
                .await
                .map_err(map_err)?;
            for (hop_index, &(target_id, status)) in hops.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO redirects (source_url_id, hop_index, target_url_id, status_code) VALUES (?1, ?2, ?3, ?4)",
                )
                .bind(source_url_id)
                .bind(hop_index as i64)
                .bind(target_id)
                .bind(status as i64)
                .execute(&mut *tx)
                .await
                .map_err(map_err)?;
            }
            let final_target = hops.last().unwrap().0;
            sqlx::query(
                "INSERT INTO redirect_summary (source_url_id, chain_length, final_status, final_target_url_id, loop_detected, cap_exceeded)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(source_url_id) DO UPDATE SET
                    chain_length = excluded.chain_length,
                    final_status = excluded.final_status,
                    final_target_url_id = excluded.final_target_url_id,
                    loop_detected = excluded.loop_detected,
                    cap_exceeded = excluded.cap_exceeded",
            )
            .bind(source_url_id)
            .bind(hops.len() as i64)
            .bind(final_status as i64)
            .bind(final_target)
            .bind(loop_detected)
            .bind(cap_exceeded)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
            tx.commit().await.map_err(map_err)?;
            Ok(())
        })
        .await
    }

    // ---- Link inventory ----

    pub async fn intern_anchor_text(&self, text: &str) -> Result<i64, CrawlError> {
        intern_lookup(&self.crawl, "anchor_texts", "text", text).await
    }

    pub async fn intern_xpath(&self, xpath: &str) -> Result<i64, CrawlError> {
        intern_lookup(&self.crawl, "xpaths", "xpath", xpath).await
    }

    pub async fn intern_href(&self, href: &str) -> Result<i64, CrawlError> {
        intern_lookup(&self.crawl, "hrefs", "href", href).await
    }

    /// Rows are `(target_url_id, anchor_text_id, xpath_id, href_id, rel_flags)`.
    /// Grouped into transactions of up to 500 rows to amortize fsync.
    pub async fn store_links(
        &self,
        source_url_id: i64,
        rows: &[(i64, Option<i64>, i64, i64, i64)],
    ) -> Result<(), CrawlError> {
        for chunk in rows.chunks(500) {
            retry_on_busy(|| async {
                let mut tx = self.crawl.begin().await.map_err(map_err)?;
                for (target_url_id, anchor_text_id, xpath_id, href_id, rel_flags) in chunk {
                    sqlx::query(
                        "INSERT INTO links (source_url_id, target_url_id, anchor_text_id, xpath_id, href_id, rel_flags)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )
                    .bind(source_url_id)
                    .bind(target_url_id)
                    .bind(anchor_text_id)
                    .bind(xpath_id)
                    .bind(href_id)
                    .bind(rel_flags)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_err)?;
                }
                tx.commit().await.map_err(map_err)?;
                Ok(())
            })
            .await?;
        }
        Ok(())
    }

    // ---- Hreflang (3 flavors) ----

    pub async fn intern_language_code(&self, code: &str) -> Result<i64, CrawlError> {
        intern_lookup(&self.crawl, "language_codes", "code", code).await
    }

    pub async fn store_hreflang_sitemap(&self, rows: &[(i64, i64, i64)]) -> Result<(), CrawlError> {
        self.store_hreflang("hreflang_sitemap", rows).await
    }

    pub async fn store_hreflang_header(&self, rows: &[(i64, i64, i64)]) -> Result<(), CrawlError> {
        self.store_hreflang("hreflang_header", rows).await
    }

    pub async fn store_hreflang_html(&self, rows: &[(i64, i64, i64)]) -> Result<(), CrawlError> {
        self.store_hreflang("hreflang_html", rows).await
    }

    async fn store_hreflang(&self, table: &str, rows: &[(i64, i64, i64)]) -> Result<(), CrawlError> {
        for chunk in rows.chunks(500) {
            retry_on_busy(|| async {
                let mut tx = self.crawl.begin().await.map_err(map_err)?;
                for (url_id, language_code_id, href_url_id) in chunk {
                    sqlx::query(&format!(
                        "INSERT INTO {table} (url_id, language_code_id, href_url_id) VALUES (?1, ?2, ?3)"
                    ))
                    .bind(url_id)
                    .bind(language_code_id)
                    .bind(href_url_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_err)?;
                }
                tx.commit().await.map_err(map_err)?;
                Ok(())
            })
            .await?;
        }
        Ok(())
    }

    // ---- Indexability ----

    pub async fn store_indexability(
        &self,
        url_id: i64,
        robots_txt_allows: bool,
        html_meta_allows: bool,
        http_header_allows: bool,
        overall_indexable: bool,
        reasons: ReasonBitmap,
    ) -> Result<(), CrawlError> {
        retry_on_busy(|| async {
            sqlx::query(
                "INSERT INTO indexability (url_id, robots_txt_allows, html_meta_allows, http_header_allows, overall_indexable, reasons_bitmap)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(url_id) DO UPDATE SET
                    robots_txt_allows = excluded.robots_txt_allows,
                    html_meta_allows = excluded.html_meta_allows,
                    http_header_allows = excluded.http_header_allows,
                    overall_indexable = excluded.overall_indexable,
                    reasons_bitmap = excluded.reasons_bitmap",
            )
            .bind(url_id)
            .bind(robots_txt_allows)
            .bind(html_meta_allows)
            .bind(http_header_allows)
            .bind(overall_indexable)
            .bind(reasons.0 as i64)
            .execute(&self.crawl)
            .await
            .map_err(map_err)
        })
        .await?;
        Ok(())
    }

    // ---- Sitemap listings ----

    pub async fn record_sitemap_listing(&self, url_id: i64, sitemap_url_id: i64) -> Result<(), CrawlError> {
        let now = chrono::Utc::now().to_rfc3339();
        retry_on_busy(|| async {
            sqlx::query(
                "INSERT INTO sitemap_listings (url_id, sitemap_url_id, discovered_at)
                 VALUES (?1, ?2, ?3) ON CONFLICT(url_id, sitemap_url_id) DO NOTHING",
            )
            .bind(url_id)
            .bind(sitemap_url_id)
            .bind(&now)
            .execute(&self.crawl)
            .await
            .map_err(map_err)
        })
        .await?;
        Ok(())
    }

    pub async fn page_count(&self) -> Result<i64, CrawlError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM pages")
            .fetch_one(&self.pages)
            .await
            .map_err(map_err)?;
        row.try_get("n").map_err(map_err)
    }
}

async fn intern_lookup(pool: &SqlitePool, table: &str, column: &str, value: &str) -> Result<i64, CrawlError> {
    retry_on_busy(|| async {
        let row = sqlx::query(&format!(
            "INSERT INTO {table} ({column}) VALUES (?1)
             ON CONFLICT({column}) DO UPDATE SET {column} = excluded.{column}
             RETURNING id"
        ))
        .bind(value)
        .fetch_one(pool)
        .await
        .map_err(map_err)?;
        row.try_get("id").map_err(map_err)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn test_storage() -> (Storage, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let storage = Storage::open(&dir.path().join("pages.db"), &dir.path().join("crawl.db"), 2)
            .await
            .unwrap();
        (storage, dir)
    }

    #[tokio::test]
    async fn intern_url_is_idempotent() {
        let (storage, _dir) = test_storage().await;
        let (id1, is_new1) = storage.intern_url("http://example.com/", "example.com", "http", "internal").await.unwrap();
        let (id2, is_new2) = storage.intern_url("http://example.com/", "example.com", "http", "internal").await.unwrap();
        assert_eq!(id1, id2);
        assert!(is_new1);
        assert!(!is_new2);
    }

    #[tokio::test]
    async fn frontier_enqueue_rejects_beyond_max_depth() {
        let (storage, _dir) = test_storage().await;
        let (url_id, _) = storage.intern_url("http://example.com/", "example.com", "http", "internal").await.unwrap();
        let enqueued = storage.frontier_enqueue(url_id, 5, None, 3).await.unwrap();
        assert!(!enqueued);
        assert_eq!(storage.frontier_remaining().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn frontier_enqueue_is_a_noop_for_existing_row() {
        let (storage, _dir) = test_storage().await;
        let (url_id, _) = storage.intern_url("http://example.com/", "example.com", "http", "internal").await.unwrap();
        assert!(storage.frontier_enqueue(url_id, 0, None, 10).await.unwrap());
        assert!(!storage.frontier_enqueue(url_id, 0, None, 10).await.unwrap());
        assert_eq!(storage.frontier_remaining().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn lease_then_complete_moves_out_of_queued() {
        let (storage, _dir) = test_storage().await;
        let (url_id, _) = storage.intern_url("http://example.com/", "example.com", "http", "internal").await.unwrap();
        storage.frontier_enqueue(url_id, 0, None, 10).await.unwrap();
        let jobs = storage.frontier_lease(10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        // leased rows stay "queued" on disk, so a crash-restart doesn't lose them
        assert_eq!(storage.frontier_remaining().await.unwrap(), 1);
        storage.frontier_complete(url_id).await.unwrap();
        assert_eq!(storage.frontier_remaining().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lease_does_not_return_already_leased_rows() {
        let (storage, _dir) = test_storage().await;
        let (url_id, _) = storage.intern_url("http://example.com/", "example.com", "http", "internal").await.unwrap();
        storage.frontier_enqueue(url_id, 0, None, 10).await.unwrap();
        let first = storage.frontier_lease(10).await.unwrap();
        let second = storage.frontier_lease(10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 0);
    }

    #[tokio::test]
    async fn reset_truncates_frontier_but_keeps_urls() {
        let (storage, _dir) = test_storage().await;
        let (url_id, _) = storage.intern_url("http://example.com/", "example.com", "http", "internal").await.unwrap();
        storage.frontier_enqueue(url_id, 0, None, 10).await.unwrap();
        storage.frontier_reset().await.unwrap();
        assert_eq!(storage.frontier_remaining().await.unwrap(), 0);
        let (id_again, is_new) = storage.intern_url("http://example.com/", "example.com", "http", "internal").await.unwrap();
        assert_eq!(id_again, url_id);
        assert!(!is_new);
    }

    #[tokio::test]
    async fn no_redirect_writes_nothing() {
        let (storage, _dir) = test_storage().await;
        let (url_id, _) = storage.intern_url("http://example.com/", "example.com", "http", "internal").await.unwrap();
        storage.store_redirect_chain(url_id, &[], 200, false, false).await.unwrap();
        let row = sqlx::query("SELECT COUNT(*) AS n FROM redirects")
            .fetch_one(storage.crawl_pool())
            .await
            .unwrap();
        let n: i64 = row.try_get("n").unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn single_redirect_hop_records_hop_and_final_status() {
        let (storage, _dir) = test_storage().await;
        let (old_id, _) = storage.intern_url("http://example.com/old", "example.com", "http", "internal").await.unwrap();
        let (new_id, _) = storage.intern_url("http://example.com/new", "example.com", "http", "internal").await.unwrap();
        storage.store_redirect_chain(old_id, &[(new_id, 301)], 200, false, false).await.unwrap();
        let row = sqlx::query("SELECT chain_length, final_status, final_target_url_id, loop_detected FROM redirect_summary WHERE source_url_id = ?1")
            .bind(old_id)
            .fetch_one(storage.crawl_pool())
            .await
            .unwrap();
        let chain_length: i64 = row.try_get("chain_length").unwrap();
        let final_status: i64 = row.try_get("final_status").unwrap();
        let final_target: i64 = row.try_get("final_target_url_id").unwrap();
        let loop_detected: i64 = row.try_get("loop_detected").unwrap();
        assert_eq!(chain_length, 1);
        assert_eq!(final_status, 200);
        assert_eq!(final_target, new_id);
        assert_eq!(loop_detected, 0);
    }

    #[tokio::test]
    async fn redirect_loop_is_recorded_with_loop_marker() {
        let (storage, _dir) = test_storage().await;
        let (a_id, _) = storage.intern_url("http://example.com/a", "example.com", "http", "internal").await.unwrap();
        let (b_id, _) = storage.intern_url("http://example.com/b", "example.com", "http", "internal").await.unwrap();
        storage.store_redirect_chain(a_id, &[(b_id, 301), (a_id, 302)], 302, true, false).await.unwrap();
        let row = sqlx::query("SELECT loop_detected FROM redirect_summary WHERE source_url_id = ?1")
            .bind(a_id)
            .fetch_one(storage.crawl_pool())
            .await
            .unwrap();
        let loop_detected: i64 = row.try_get("loop_detected").unwrap();
        assert_eq!(loop_detected, 1);
    }

    #[tokio::test]
    async fn redirect_cap_exceeded_is_recorded_without_a_loop() {
        let (storage, _dir) = test_storage().await;
        let (a_id, _) = storage.intern_url("http://example.com/a", "example.com", "http", "internal").await.unwrap();
        let (b_id, _) = storage.intern_url("http://example.com/b", "example.com", "http", "internal").await.unwrap();
        storage.store_redirect_chain(a_id, &[(b_id, 301)], 301, false, true).await.unwrap();
        let row = sqlx::query("SELECT loop_detected, cap_exceeded FROM redirect_summary WHERE source_url_id = ?1")
            .bind(a_id)
            .fetch_one(storage.crawl_pool())
            .await
            .unwrap();
        let loop_detected: i64 = row.try_get("loop_detected").unwrap();
        let cap_exceeded: i64 = row.try_get("cap_exceeded").unwrap();
        assert_eq!(loop_detected, 0);
        assert_eq!(cap_exceeded, 1);
    }

    #[tokio::test]
    async fn intern_lookup_dedupes() {
        let (storage, _dir) = test_storage().await;
        let a = storage.intern_anchor_text("Home").await.unwrap();
        let b = storage.intern_anchor_text("Home").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn retry_on_busy_succeeds_after_transient_failures() {
        use std::sync::atomic::{AtomicU8, Ordering};
        let attempts = AtomicU8::new(0);
        let result: Result<u32, CrawlError> = retry_on_busy(|| async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 1 {
                Err(CrawlError::StorageBusy)
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_on_busy_gives_up_after_exhausting_attempts() {
        let result: Result<(), CrawlError> = retry_on_busy(|| async { Err(CrawlError::StorageBusy) }).await;
        assert!(matches!(result, Err(CrawlError::StorageBusy)));
    }
}

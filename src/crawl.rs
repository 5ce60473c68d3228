//! Binds Frontier <-> Fetcher <-> Extractor <-> Indexability <-> Sitemap
//! Discoverer into the main crawl loop. Owns one `CrawlContext`
//! per invocation, threaded through workers by `Arc::clone` rather than
//! global/static state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use url::Url;

use sitecrawler_core::config::{AppConfig, UserAgentPreset};
use sitecrawler_core::{compress_blob, CrawlError, CrawlJob, FetchConfig, FetchResponse, MetaRobotsDirectives, UrlClass};
use sitecrawler_fetch::{FetchBackend, FetchPool, HttpBackend, ScriptedBackend};
use sitecrawler_frontier::Frontier;
use sitecrawler_robots::{RobotsCache, RobotsVerdict};
use sitecrawler_sitemap::SitemapDiscoverer;
use sitecrawler_storage::Storage;

use crate::cli::Cli;

/// Merges CLI flags over `config` (which already has env applied) — CLI
/// always wins. Bool flags only ever turn a feature on from the
/// CLI; there is no way to un-set something the config file/env enabled.
pub fn apply_cli_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(v) = cli.max_pages {
        config.general.max_pages = v;
    }
    if let Some(v) = cli.max_depth {
        config.general.max_depth = v;
    }
    if cli.offsite {
        config.general.offsite = true;
    }
    if cli.reset_frontier {
        config.general.reset_frontier = true;
    }
    if let Some(ua) = cli.user_agent {
        let preset: UserAgentPreset = ua.into();
        config.fetch.user_agent = Some(preset.token(cli.custom_ua.as_deref()));
    }
    if let Some(v) = cli.timeout {
        config.fetch.timeout_secs = v;
    }
    if let Some(v) = cli.concurrency {
        config.fetch.concurrency = v;
    }
    if let Some(v) = cli.delay {
        config.fetch.delay_secs = v;
    }
    if cli.js {
        config.fetch.js = true;
    }
    if cli.ignore_robots {
        config.robots.ignore_robots = true;
    }
    if cli.skip_robots_sitemaps {
        config.robots.skip_robots_sitemaps = true;
    }
    if cli.skip_sitemaps {
        config.sitemap.skip_sitemaps = true;
    }
    if let Some(v) = cli.max_workers {
        config.storage.max_workers = v;
    }
}

/// Final tally reported on every exit path: a structured log event
/// alongside the human-readable summary line.
#[derive(Debug, Default)]
pub struct CrawlSummary {
    pub pages_fetched: u64,
    pub robots_disallowed: u64,
    pub errors_network: u64,
    pub errors_timeout: u64,
    pub errors_malformed_url: u64,
    pub frontier_remaining: i64,
    pub interrupted: bool,
}

impl CrawlSummary {
    pub fn print(&self) {
        println!(
            "pages fetched: {} | robots disallowed: {} | errors: network={} timeout={} malformed_url={} | frontier remaining: {}{}",
            self.pages_fetched,
            self.robots_disallowed,
            self.errors_network,
            self.errors_timeout,
            self.errors_malformed_url,
            self.frontier_remaining,
            if self.interrupted { " | shutdown: interrupted" } else { "" },
        );
    }
}

#[derive(Clone)]
struct CrawlContext {
    frontier: Frontier,
    robots: Arc<RobotsCache>,
    fetch_pool: Arc<FetchPool>,
    backend: Arc<dyn FetchBackend>,
    fetch_config: FetchConfig,
    seed_hosts: Vec<String>,
    offsite: bool,
    ignore_robots: bool,
}

enum JobOutcome {
    Fetched,
    RobotsDisallowed,
    Network,
    Timeout,
    MalformedUrl,
}

#[derive(Default)]
struct Counters {
    pages_fetched: u64,
    robots_disallowed: u64,
    errors_network: u64,
    errors_timeout: u64,
    errors_malformed_url: u64,
}

impl Counters {
    fn apply(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Fetched => self.pages_fetched += 1,
            JobOutcome::RobotsDisallowed => self.robots_disallowed += 1,
            JobOutcome::Network => self.errors_network += 1,
            JobOutcome::Timeout => self.errors_timeout += 1,
            JobOutcome::MalformedUrl => self.errors_malformed_url += 1,
        }
    }
}

/// Runs one crawl invocation to completion (frontier drained, `--max-pages`
/// reached, or SIGINT) and returns the final summary. Only `StorageFatal`/
/// `SchemaMismatch` abort early; every other per-URL failure is recorded
/// and the loop continues (spec §7).
pub async fn run(config: AppConfig, seeds: Vec<String>) -> Result<CrawlSummary, CrawlError> {
    let mut normalized_seeds = Vec::new();
    let mut malformed_seeds = 0u64;
    for raw in &seeds {
        match sitecrawler_url::normalize(raw, None) {
            Ok(n) => normalized_seeds.push(n),
            Err(e) => {
                warn!(seed = %raw, error = %e, "skipping malformed seed");
                malformed_seeds += 1;
            }
        }
    }
    if normalized_seeds.is_empty() {
        return Err(CrawlError::Config("no seed URL could be normalized".to_string()));
    }

    // DB pair is named from the first seed's host regardless of how many
    // distinct hosts the seed set spans (spec.md §9 Open Question a).
    let host = normalized_seeds[0].host.clone();
    let pages_path = PathBuf::from(format!("{host}_pages.db"));
    let crawl_path = PathBuf::from(format!("{host}_crawl.db"));
    let storage = Storage::open(&pages_path, &crawl_path, config.storage.max_workers).await?;

    if config.general.reset_frontier {
        storage.frontier_reset().await?;
        info!("frontier reset before starting");
    }

    let frontier = Frontier::new(storage.clone(), config.general.max_depth);

    let mut seed_hosts: Vec<String> = normalized_seeds.iter().map(|n| n.host.clone()).collect();
    seed_hosts.sort();
    seed_hosts.dedup();

    let user_agent = config.fetch.user_agent.clone().unwrap_or_else(|| "sitecrawler/1.0".to_string());

    let http_client = Client::builder()
        .user_agent(user_agent.clone())
        .build()
        .map_err(|e| CrawlError::Config(e.to_string()))?;

    let robots = Arc::new(RobotsCache::new(http_client.clone(), user_agent.clone()));

    for seed in &normalized_seeds {
        let classification = sitecrawler_url::classify(&seed.host, &seed_hosts, config.general.offsite);
        let (url_id, _) = storage
            .intern_url(&seed.canonical, &seed.host, &seed.scheme, classification.as_str())
            .await?;
        frontier.enqueue_root(url_id).await?;
    }

    if !config.sitemap.skip_sitemaps {
        discover_sitemaps(&storage, &frontier, robots.as_ref(), &http_client, &user_agent, &config, &seed_hosts).await?;
    }

    let fetch_config = FetchConfig {
        timeout: Duration::from_secs(config.fetch.timeout_secs),
        max_body_size: config.fetch.max_body_mb * 1024 * 1024,
        max_redirects: config.fetch.max_redirects,
        user_agent: user_agent.clone(),
    };

    let backend: Arc<dyn FetchBackend> = if config.fetch.js {
        Arc::new(ScriptedBackend::new()?)
    } else {
        Arc::new(HttpBackend::new(&user_agent)?)
    };

    let fetch_pool = Arc::new(FetchPool::new(config.fetch.concurrency, Duration::from_secs(config.fetch.delay_secs)));

    let ctx = CrawlContext {
        frontier: frontier.clone(),
        robots,
        fetch_pool,
        backend,
        fetch_config,
        seed_hosts,
        offsite: config.general.offsite,
        ignore_robots: config.robots.ignore_robots,
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, draining in-flight work before exit");
                shutdown.store(true, Ordering::SeqCst);
            }
        });
    }

    let mut counters = Counters::default();
    let max_pages = config.general.max_pages;
    let mut fatal: Option<CrawlError> = None;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        if max_pages > 0 && counters.pages_fetched >= max_pages {
            break;
        }
        let remaining_budget = if max_pages > 0 { max_pages - counters.pages_fetched } else { u64::MAX };
        let batch_size = (config.fetch.concurrency as u64).min(remaining_budget).max(1) as u32;

        let jobs = frontier.lease(batch_size).await?;
        if jobs.is_empty() {
            break;
        }

        let mut set = JoinSet::new();
        for job in jobs {
            let ctx = ctx.clone();
            set.spawn(process_job(ctx, job));
        }
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(outcome)) => counters.apply(outcome),
                Ok(Err(e)) => {
                    error!(error = %e, "unrecoverable storage error, aborting crawl");
                    fatal = Some(e);
                    shutdown.store(true, Ordering::SeqCst);
                }
                Err(join_err) => error!(error = %join_err, "crawl task panicked"),
            }
        }
        if fatal.is_some() {
            break;
        }
    }

    if let Some(e) = fatal {
        return Err(e);
    }

    let frontier_remaining = frontier.remaining().await?;
    let summary = CrawlSummary {
        pages_fetched: counters.pages_fetched,
        robots_disallowed: counters.robots_disallowed,
        errors_network: counters.errors_network,
        errors_timeout: counters.errors_timeout,
        errors_malformed_url: counters.errors_malformed_url + malformed_seeds,
        frontier_remaining,
        interrupted: shutdown.load(Ordering::SeqCst),
    };
    info!(
        pages_fetched = summary.pages_fetched,
        robots_disallowed = summary.robots_disallowed,
        errors_network = summary.errors_network,
        errors_timeout = summary.errors_timeout,
        errors_malformed_url = summary.errors_malformed_url,
        frontier_remaining = summary.frontier_remaining,
        interrupted = summary.interrupted,
        "crawl finished"
    );
    Ok(summary)
}

#[allow(clippy::too_many_arguments)]
async fn discover_sitemaps(
    storage: &Storage,
    frontier: &Frontier,
    robots: &RobotsCache,
    http_client: &Client,
    user_agent: &str,
    config: &AppConfig,
    seed_hosts: &[String],
) -> Result<(), CrawlError> {
    let discoverer = SitemapDiscoverer::new(http_client.clone(), user_agent.to_string(), config.sitemap.max_recursion_depth);

    for seed_host in seed_hosts {
        let mut candidates = vec![
            format!("https://{seed_host}/sitemap.xml"),
            format!("https://{seed_host}/sitemap_index.xml"),
        ];
        if !config.robots.skip_robots_sitemaps {
            candidates.extend(robots.sitemaps(seed_host).await);
        }

        for sitemap_url in candidates {
            let entries = discoverer.discover(&sitemap_url).await;
            if entries.is_empty() {
                continue;
            }
            let Ok(normalized_sitemap) = sitecrawler_url::normalize(&sitemap_url, None) else {
                continue;
            };
            let sitemap_class = sitecrawler_url::classify(&normalized_sitemap.host, seed_hosts, config.general.offsite);
            let (sitemap_url_id, _) = storage
                .intern_url(&normalized_sitemap.canonical, &normalized_sitemap.host, &normalized_sitemap.scheme, sitemap_class.as_str())
                .await?;

            for entry in entries {
                let Ok(normalized) = sitecrawler_url::normalize(&entry.loc, None) else {
                    continue;
                };
                let classification = sitecrawler_url::classify(&normalized.host, seed_hosts, config.general.offsite);
                let (url_id, _) = storage
                    .intern_url(&normalized.canonical, &normalized.host, &normalized.scheme, classification.as_str())
                    .await?;
                frontier.enqueue_root(url_id).await?;
                storage.record_sitemap_listing(url_id, sitemap_url_id).await?;

                let mut hreflang_rows = Vec::with_capacity(entry.hreflang.len());
                for (lang, href) in &entry.hreflang {
                    let Ok(href_normalized) = sitecrawler_url::normalize(href, None) else {
                        continue;
                    };
                    let href_class = sitecrawler_url::classify(&href_normalized.host, seed_hosts, config.general.offsite);
                    let (href_id, _) = storage
                        .intern_url(&href_normalized.canonical, &href_normalized.host, &href_normalized.scheme, href_class.as_str())
                        .await?;
                    let lang_id = storage.intern_language_code(lang).await?;
                    hreflang_rows.push((url_id, lang_id, href_id));
                }
                storage.store_hreflang_sitemap(&hreflang_rows).await?;
            }
        }
    }
    Ok(())
}

/// Runs one frontier job to completion. Returns `Err` only for a fatal
/// storage error (`CrawlError::is_fatal`); everything else — network
/// failures, timeouts, malformed URLs — is folded into a `JobOutcome` and
/// the job is still marked complete so the crawl can make forward progress.
async fn process_job(ctx: CrawlContext, job: CrawlJob) -> Result<JobOutcome, CrawlError> {
    let url = match Url::parse(&job.url) {
        Ok(u) => u,
        Err(e) => {
            warn!(url = %job.url, error = %e, "frontier row holds an unparseable URL");
            let _ = ctx.frontier.complete(job.url_id).await;
            return Ok(JobOutcome::MalformedUrl);
        }
    };
    let host = url.host_str().unwrap_or("").to_string();

    let verdict = ctx.robots.check(&host, url.as_str(), ctx.ignore_robots).await;
    if !verdict.allows_fetch() {
        let iv = sitecrawler_indexability::evaluate(false, verdict.is_unavailable(), &MetaRobotsDirectives::default(), None, 0);
        if let Err(e) = ctx
            .frontier
            .storage()
            .store_indexability(job.url_id, iv.robots_txt_allows, iv.html_meta_allows, iv.http_header_allows, iv.overall_indexable, iv.reasons)
            .await
        {
            if e.is_fatal() {
                return Err(e);
            }
            error!(url = %job.url, error = %e, "failed to record indexability for robots-disallowed URL");
        }
        let _ = ctx.frontier.complete(job.url_id).await;
        debug!(url = %job.url, "robots.txt disallows, skipping fetch");
        return Ok(JobOutcome::RobotsDisallowed);
    }

    let outcome = match ctx.fetch_pool.fetch(ctx.backend.as_ref(), &url, &ctx.fetch_config).await {
        Ok(resp) => {
            info!(url = %job.url, status = resp.status, depth = job.depth, response_time_ms = resp.response_time_ms, "fetched");
            if let Err(e) = persist_fetched_page(&ctx, &job, &verdict, &resp).await {
                if e.is_fatal() {
                    return Err(e);
                }
                error!(url = %job.url, error = %e, "failed to persist fetched page");
            }
            JobOutcome::Fetched
        }
        Err(CrawlError::Timeout(secs)) => {
            warn!(url = %job.url, timeout_secs = secs, "fetch timed out");
            record_unreachable(&ctx, job.url_id, &verdict).await?;
            JobOutcome::Timeout
        }
        Err(e) => {
            warn!(url = %job.url, error = %e, "fetch failed");
            record_unreachable(&ctx, job.url_id, &verdict).await?;
            JobOutcome::Network
        }
    };

    let _ = ctx.frontier.complete(job.url_id).await;
    Ok(outcome)
}

async fn record_unreachable(ctx: &CrawlContext, url_id: i64, verdict: &RobotsVerdict) -> Result<(), CrawlError> {
    let iv = sitecrawler_indexability::evaluate(verdict.allows_fetch(), verdict.is_unavailable(), &MetaRobotsDirectives::default(), None, 0);
    if let Err(e) = ctx
        .frontier
        .storage()
        .store_indexability(url_id, iv.robots_txt_allows, iv.html_meta_allows, iv.http_header_allows, iv.overall_indexable, iv.reasons)
        .await
    {
        if e.is_fatal() {
            return Err(e);
        }
        error!(url_id, error = %e, "failed to record indexability for unreachable URL");
    }
    Ok(())
}

/// Persists everything a successful fetch yields: the page blob, redirect
/// chain, extracted content/links/hreflang (if HTML), and the indexability
/// verdict — keyed by the *final* URL's id, since that's the resource that
/// actually has a body (spec.md §8 scenario 2: a redirect's page row exists
/// for the target, not the source).
async fn persist_fetched_page(ctx: &CrawlContext, job: &CrawlJob, verdict: &RobotsVerdict, resp: &FetchResponse) -> Result<(), CrawlError> {
    let storage = ctx.frontier.storage();

    let final_normalized = sitecrawler_url::normalize(&resp.final_url, None)?;
    let final_class = sitecrawler_url::classify(&final_normalized.host, &ctx.seed_hosts, ctx.offsite);
    let (final_id, _) = storage
        .intern_url(&final_normalized.canonical, &final_normalized.host, &final_normalized.scheme, final_class.as_str())
        .await?;

    if !resp.redirect_chain.is_empty() {
        let mut hops = Vec::with_capacity(resp.redirect_chain.len());
        for (i, hop) in resp.redirect_chain.iter().enumerate() {
            let target_str = resp.redirect_chain.get(i + 1).map(|h| h.url.as_str()).unwrap_or(resp.final_url.as_str());
            let normalized = sitecrawler_url::normalize(target_str, None)?;
            let classification = sitecrawler_url::classify(&normalized.host, &ctx.seed_hosts, ctx.offsite);
            let (target_id, _) = storage
                .intern_url(&normalized.canonical, &normalized.host, &normalized.scheme, classification.as_str())
                .await?;
            hops.push((target_id, hop.status_code));
        }
        storage
            .store_redirect_chain(job.url_id, &hops, resp.status, resp.loop_detected, resp.redirect_cap_exceeded)
            .await?;
    }

    let headers_json = serde_json::to_vec(&resp.headers).unwrap_or_default();
    let headers_blob = compress_blob(&headers_json)?;
    let body_blob = compress_blob(&resp.body)?;
    let encoding = resp.content_type.as_deref().and_then(extract_charset);

    storage
        .store_page(final_id, resp.status, &headers_blob, &body_blob, resp.content_type.as_deref(), encoding.as_deref())
        .await?;

    let x_robots_tag = resp.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case("x-robots-tag")).map(|(_, v)| v.clone());

    let meta_robots = if sitecrawler_parser::should_extract(resp.content_type.as_deref()) {
        let final_url_parsed = Url::parse(&resp.final_url).unwrap_or_else(|_| Url::parse(&job.url).expect("frontier URLs are always valid"));
        let page = sitecrawler_parser::extract(&resp.body, &final_url_parsed);
        persist_extracted_page(ctx, final_id, job.depth, &page).await?;
        page.meta_robots
    } else {
        MetaRobotsDirectives::default()
    };

    for (lang, href) in parse_link_header_hreflang(&resp.headers) {
        let Ok(href_normalized) = sitecrawler_url::normalize(&href, None) else {
            continue;
        };
        let href_class = sitecrawler_url::classify(&href_normalized.host, &ctx.seed_hosts, ctx.offsite);
        let (href_id, _) = storage
            .intern_url(&href_normalized.canonical, &href_normalized.host, &href_normalized.scheme, href_class.as_str())
            .await?;
        let lang_id = storage.intern_language_code(&lang).await?;
        storage.store_hreflang_header(&[(final_id, lang_id, href_id)]).await?;
    }

    let verdict_final = sitecrawler_indexability::evaluate(verdict.allows_fetch(), verdict.is_unavailable(), &meta_robots, x_robots_tag.as_deref(), resp.status);
    storage
        .store_indexability(
            final_id,
            verdict_final.robots_txt_allows,
            verdict_final.html_meta_allows,
            verdict_final.http_header_allows,
            verdict_final.overall_indexable,
            verdict_final.reasons,
        )
        .await?;

    Ok(())
}

async fn persist_extracted_page(ctx: &CrawlContext, page_url_id: i64, depth: u32, page: &sitecrawler_core::ExtractedPage) -> Result<(), CrawlError> {
    let storage = ctx.frontier.storage();

    let canonical_url_id = match &page.canonical_url {
        Some(raw) => match sitecrawler_url::normalize(raw, None) {
            Ok(n) => {
                let classification = sitecrawler_url::classify(&n.host, &ctx.seed_hosts, ctx.offsite);
                Some(storage.intern_url(&n.canonical, &n.host, &n.scheme, classification.as_str()).await?.0)
            }
            Err(_) => None,
        },
        None => None,
    };

    let raw_tokens = page.meta_robots.raw_tokens.join(",");
    let meta_robots_id = storage
        .intern_meta_robots(page.meta_robots.noindex, page.meta_robots.nofollow, page.meta_robots.noarchive, page.meta_robots.nosnippet, &raw_tokens)
        .await?;

    let mut internal_count = 0u32;
    let mut external_count = 0u32;
    let mut link_rows = Vec::with_capacity(page.links.len());
    for link in &page.links {
        let Ok(normalized) = sitecrawler_url::normalize(&link.target_url, None) else {
            continue;
        };
        let classification = sitecrawler_url::classify(&normalized.host, &ctx.seed_hosts, ctx.offsite);
        match classification {
            UrlClass::Internal => internal_count += 1,
            _ => external_count += 1,
        }
        let (target_id, _) = storage
            .intern_url(&normalized.canonical, &normalized.host, &normalized.scheme, classification.as_str())
            .await?;
        let anchor_text_id = match &link.anchor_text {
            Some(t) if !t.is_empty() => Some(storage.intern_anchor_text(t).await?),
            _ => None,
        };
        let xpath_id = storage.intern_xpath(&link.xpath).await?;
        let href_id = storage.intern_href(&link.raw_href).await?;
        link_rows.push((target_id, anchor_text_id, xpath_id, href_id, rel_flags_of(&link.rel)));

        let should_enqueue = matches!(classification, UrlClass::Internal) || ctx.offsite;
        if should_enqueue {
            ctx.frontier.enqueue(target_id, depth + 1, Some(page_url_id)).await?;
        }
    }
    storage.store_links(page_url_id, &link_rows).await?;

    storage
        .store_content(
            page_url_id,
            page.title.as_deref(),
            page.meta_description.as_deref(),
            page.h1.len() as u32,
            page.h2.len() as u32,
            page.h1.first().map(String::as_str),
            page.h2.first().map(String::as_str),
            page.word_count,
            canonical_url_id,
            Some(meta_robots_id),
            internal_count,
            external_count,
        )
        .await?;

    let mut hreflang_rows = Vec::with_capacity(page.hreflang_html.len());
    for entry in &page.hreflang_html {
        let Ok(normalized) = sitecrawler_url::normalize(&entry.href, None) else {
            continue;
        };
        let classification = sitecrawler_url::classify(&normalized.host, &ctx.seed_hosts, ctx.offsite);
        let (href_id, _) = storage
            .intern_url(&normalized.canonical, &normalized.host, &normalized.scheme, classification.as_str())
            .await?;
        let lang_id = storage.intern_language_code(&entry.language_code).await?;
        hreflang_rows.push((page_url_id, lang_id, href_id));
    }
    storage.store_hreflang_html(&hreflang_rows).await?;

    Ok(())
}

const REL_NOFOLLOW: i64 = 1 << 0;
const REL_SPONSORED: i64 = 1 << 1;
const REL_UGC: i64 = 1 << 2;
const REL_NOOPENER: i64 = 1 << 3;

fn rel_flags_of(rel: &[String]) -> i64 {
    let mut flags = 0i64;
    for token in rel {
        match token.to_lowercase().as_str() {
            "nofollow" => flags |= REL_NOFOLLOW,
            "sponsored" => flags |= REL_SPONSORED,
            "ugc" => flags |= REL_UGC,
            "noopener" => flags |= REL_NOOPENER,
            _ => {}
        }
    }
    flags
}

fn extract_charset(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|part| part.trim().strip_prefix("charset=").map(|v| v.trim_matches('"').to_string()))
}

/// Parses a `Link: <url>; rel="alternate"; hreflang="xx"` response header
/// into (language_code, href) pairs — the header-sourced flavor of
/// hreflang alongside the sitemap- and HTML-sourced ones.
fn parse_link_header_hreflang(headers: &HashMap<String, String>) -> Vec<(String, String)> {
    let Some(raw) = headers.iter().find(|(k, _)| k.eq_ignore_ascii_case("link")).map(|(_, v)| v.clone()) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for segment in split_link_header(&raw) {
        let segment = segment.trim();
        if !segment.starts_with('<') {
            continue;
        }
        let Some(url_end) = segment.find('>') else {
            continue;
        };
        let url = &segment[1..url_end];
        let rest = &segment[url_end + 1..];

        let mut is_alternate = false;
        let mut hreflang = None;
        for param in rest.split(';').skip(1) {
            let param = param.trim();
            if let Some(v) = param.strip_prefix("rel=") {
                is_alternate = v.trim_matches('"') == "alternate";
            } else if let Some(v) = param.strip_prefix("hreflang=") {
                hreflang = Some(v.trim_matches('"').to_string());
            }
        }
        if is_alternate {
            if let Some(lang) = hreflang {
                out.push((lang, url.to_string()));
            }
        }
    }
    out
}

/// Splits a `Link` header on top-level commas only — URLs in angle
/// brackets may themselves be followed by commas in other parameters, but
/// never contain an unmatched `>`.
fn split_link_header(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in raw.chars() {
        match c {
            '<' => {
                depth += 1;
                current.push(c);
            }
            '>' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => out.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        out.push(current);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rel_flags_combine_known_tokens() {
        let flags = rel_flags_of(&["nofollow".to_string(), "sponsored".to_string()]);
        assert_eq!(flags, REL_NOFOLLOW | REL_SPONSORED);
    }

    #[test]
    fn rel_flags_ignore_unknown_tokens() {
        let flags = rel_flags_of(&["noreferrer".to_string()]);
        assert_eq!(flags, 0);
    }

    #[test]
    fn extracts_charset_from_content_type() {
        assert_eq!(extract_charset("text/html; charset=utf-8").as_deref(), Some("utf-8"));
        assert_eq!(extract_charset("text/html"), None);
    }

    #[test]
    fn parses_single_link_header_hreflang() {
        let mut headers = HashMap::new();
        headers.insert("Link".to_string(), r#"<https://example.com/en>; rel="alternate"; hreflang="en""#.to_string());
        let pairs = parse_link_header_hreflang(&headers);
        assert_eq!(pairs, vec![("en".to_string(), "https://example.com/en".to_string())]);
    }

    #[test]
    fn parses_multiple_link_header_entries() {
        let mut headers = HashMap::new();
        headers.insert(
            "Link".to_string(),
            r#"<https://example.com/en>; rel="alternate"; hreflang="en", <https://example.com/fr>; rel="alternate"; hreflang="fr""#.to_string(),
        );
        let pairs = parse_link_header_hreflang(&headers);
        assert_eq!(pairs.len(), 2);
        assert!(pairs.contains(&("fr".to_string(), "https://example.com/fr".to_string())));
    }

    #[test]
    fn ignores_non_alternate_link_entries() {
        let mut headers = HashMap::new();
        headers.insert("Link".to_string(), r#"<https://example.com/next>; rel="next""#.to_string());
        assert!(parse_link_header_hreflang(&headers).is_empty());
    }
}

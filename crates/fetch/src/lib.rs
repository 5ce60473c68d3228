//! Bounded-concurrency HTTP client with per-host delay, redirect-chain
//! capture, and a pluggable backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::redirect::Policy;
use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;

use sitecrawler_core::{CrawlError, FetchConfig, FetchResponse, RedirectHop};

/// A backend capable of retrieving one URL. `HttpBackend` is the default;
/// `ScriptedBackend` renders JavaScript via a headless browser when `--js`
/// is set.
#[async_trait]
pub trait FetchBackend: Send + Sync {
    async fn fetch(&self, url: &Url, config: &FetchConfig) -> Result<FetchResponse, CrawlError>;
}

pub struct HttpBackend {
    client: Client,
}

impl HttpBackend {
    pub fn new(user_agent: &str) -> Result<Self, CrawlError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(Policy::none())
            .gzip(true)
            .deflate(true)
            .build()
            .map_err(|e| CrawlError::Config(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FetchBackend for HttpBackend {
    async fn fetch(&self, url: &Url, config: &FetchConfig) -> Result<FetchResponse, CrawlError> {
        let start = Instant::now();
        let mut current = url.clone();
        let mut redirect_chain = Vec::new();
        let mut seen = std::collections::HashSet::new();
        seen.insert(current.to_string());

        loop {
            let resp = self
                .client
                .get(current.as_str())
                .timeout(config.timeout)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        CrawlError::Timeout(config.timeout.as_secs())
                    } else {
                        CrawlError::Network(e.to_string())
                    }
                })?;

            let status = resp.status().as_u16();

            if resp.status().is_redirection() {
                redirect_chain.push(RedirectHop {
                    url: current.to_string(),
                    status_code: status,
                });
                let location = resp
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| CrawlError::Parse("redirect with no Location header".into()))?;
                let next = current
                    .join(location)
                    .map_err(|e| CrawlError::MalformedUrl(e.to_string()))?;

                if redirect_chain.len() as u8 >= config.max_redirects {
                    warn!(url = %next, hops = redirect_chain.len(), "redirect chain exceeded max_redirects, stopping");
                    return Ok(build_response(
                        url,
                        &next,
                        status,
                        HashMap::new(),
                        Vec::new(),
                        None,
                        start,
                        redirect_chain,
                        false,
                        true,
                    ));
                }

                let loop_detected = !seen.insert(next.to_string());
                if loop_detected {
                    warn!(url = %next, "redirect loop detected");
                    return Ok(build_response(url, &next, status, HashMap::new(), Vec::new(), None, start, redirect_chain, true, false));
                }
                current = next;
                continue;
            }

            let mut headers = HashMap::new();
            for (k, v) in resp.headers() {
                if let Ok(val) = v.to_str() {
                    headers.insert(k.as_str().to_string(), val.to_string());
                }
            }
            let content_type = headers.get("content-type").cloned();

            let body = resp.bytes().await.map_err(|e| CrawlError::Network(e.to_string()))?;
            if body.len() > config.max_body_size {
                return Err(CrawlError::BodyTooLarge {
                    size: body.len(),
                    max: config.max_body_size,
                });
            }

            return Ok(build_response(
                url,
                &current,
                status,
                headers,
                body.to_vec(),
                content_type,
                start,
                redirect_chain,
                false,
                false,
            ));
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_response(
    requested: &Url,
    final_url: &Url,
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    content_type: Option<String>,
    start: Instant,
    redirect_chain: Vec<RedirectHop>,
    loop_detected: bool,
    redirect_cap_exceeded: bool,
) -> FetchResponse {
    FetchResponse {
        requested_url: requested.to_string(),
        final_url: final_url.to_string(),
        status,
        headers,
        body,
        content_type,
        fetched_at: chrono::Utc::now(),
        response_time_ms: start.elapsed().as_millis() as u64,
        redirect_chain,
        loop_detected,
        redirect_cap_exceeded,
    }
}

/// Renders JavaScript via a headless browser for `--js` crawls. Single-hop
/// only — the browser resolves redirects internally and exposes no chain.
pub struct ScriptedBackend {
    browser: headless_chrome::Browser,
}

impl ScriptedBackend {
    pub fn new() -> Result<Self, CrawlError> {
        let mut builder = headless_chrome::LaunchOptionsBuilder::default();
        builder
            .headless(true)
            .args(vec![
                std::ffi::OsStr::new("--no-sandbox"),
                std::ffi::OsStr::new("--disable-dev-shm-usage"),
                std::ffi::OsStr::new("--disable-gpu"),
            ]);
        let options = builder.build().map_err(|e| CrawlError::Config(e.to_string()))?;
        let browser = headless_chrome::Browser::new(options).map_err(|e| CrawlError::Network(e.to_string()))?;
        Ok(Self { browser })
    }
}

#[async_trait]
impl FetchBackend for ScriptedBackend {
    async fn fetch(&self, url: &Url, config: &FetchConfig) -> Result<FetchResponse, CrawlError> {
        let start = Instant::now();
        let url = url.clone();
        let timeout = config.timeout;
        let browser = &self.browser;

        let result = tokio::task::block_in_place(|| -> Result<(String, String), CrawlError> {
            let tab = browser.new_tab().map_err(|e| CrawlError::Network(e.to_string()))?;
            tab.set_default_timeout(timeout);
            tab.navigate_to(url.as_str()).map_err(|e| CrawlError::Network(e.to_string()))?;
            tab.wait_until_navigated().map_err(|_| CrawlError::Timeout(timeout.as_secs()))?;
            let html = tab.get_content().map_err(|e| CrawlError::Parse(e.to_string()))?;
            let final_url = tab.get_url();
            Ok((html, final_url))
        });

        let (html, final_url) = result?;
        let final_url = Url::parse(&final_url).unwrap_or(url.clone());

        Ok(FetchResponse {
            requested_url: url.to_string(),
            final_url: final_url.to_string(),
            status: 200,
            headers: HashMap::new(),
            body: html.into_bytes(),
            content_type: Some("text/html".to_string()),
            fetched_at: chrono::Utc::now(),
            response_time_ms: start.elapsed().as_millis() as u64,
            redirect_chain: Vec::new(),
            loop_detected: false,
            redirect_cap_exceeded: false,
        })
    }
}

/// Enforces global concurrency (`--concurrency`) and per-host pacing
/// (`--delay`) around whichever `FetchBackend` is configured, and retries
/// transient failures: 2 retries on connection error or 5xx, exponential
/// backoff 250ms/1s; 4xx is terminal.
pub struct FetchPool {
    semaphore: Arc<Semaphore>,
    last_request: DashMap<String, Instant>,
    delay: Duration,
}

impl FetchPool {
    pub fn new(concurrency: usize, delay: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            last_request: DashMap::new(),
            delay,
        }
    }

    pub async fn fetch(
        &self,
        backend: &dyn FetchBackend,
        url: &Url,
        config: &FetchConfig,
    ) -> Result<FetchResponse, CrawlError> {
        let _permit = self.semaphore.acquire().await.expect("semaphore never closed");
        self.wait_for_host_slot(url).await;

        let mut attempt = 0;
        loop {
            match backend.fetch(url, config).await {
                // A non-redirect 5xx comes back as `Ok` with the status baked in,
                // not as an `Err` — retry it the same as a connection error
                // before handing it back.
                Ok(resp) if (500..600).contains(&resp.status) && attempt < 2 => {
                    attempt += 1;
                    let backoff = if attempt == 1 { Duration::from_millis(250) } else { Duration::from_secs(1) };
                    debug!(url = %url, attempt, status = resp.status, "retrying fetch after {:?}", backoff);
                    tokio::time::sleep(backoff).await;
                }
                Ok(resp) => return Ok(resp),
                Err(CrawlError::Http(status)) if (400..500).contains(&status) => {
                    return Err(CrawlError::Http(status));
                }
                Err(e @ (CrawlError::Network(_) | CrawlError::Timeout(_))) if attempt < 2 => {
                    attempt += 1;
                    let backoff = if attempt == 1 { Duration::from_millis(250) } else { Duration::from_secs(1) };
                    debug!(url = %url, attempt, "retrying fetch after {:?}: {}", backoff, e);
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn wait_for_host_slot(&self, url: &Url) {
        let host = url.host_str().unwrap_or("").to_string();
        loop {
            let wait = self
                .last_request
                .get(&host)
                .map(|last| self.delay.saturating_sub(last.elapsed()))
                .unwrap_or(Duration::ZERO);
            if wait.is_zero() {
                break;
            }
            tokio::time::sleep(wait).await;
        }
        self.last_request.insert(host, Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_cap_exceeded_response_keeps_the_chain() {
        let url = Url::parse("http://example.com/a").unwrap();
        let next = Url::parse("http://example.com/z").unwrap();
        let chain = vec![
            RedirectHop { url: "http://example.com/a".into(), status_code: 301 },
            RedirectHop { url: "http://example.com/b".into(), status_code: 301 },
        ];
        let resp = build_response(&url, &next, 301, HashMap::new(), Vec::new(), None, Instant::now(), chain, false, true);
        assert_eq!(resp.redirect_chain.len(), 2);
        assert!(resp.redirect_cap_exceeded);
        assert!(!resp.loop_detected);
    }

    struct AlwaysFails;

    #[async_trait]
    impl FetchBackend for AlwaysFails {
        async fn fetch(&self, _url: &Url, _config: &FetchConfig) -> Result<FetchResponse, CrawlError> {
            Err(CrawlError::Http(404))
        }
    }

    #[tokio::test]
    async fn four_xx_is_terminal_no_retry() {
        let pool = FetchPool::new(1, Duration::from_millis(0));
        let backend = AlwaysFails;
        let url = Url::parse("http://example.com/").unwrap();
        let config = FetchConfig::default();
        let start = Instant::now();
        let err = pool.fetch(&backend, &url, &config).await.unwrap_err();
        assert!(matches!(err, CrawlError::Http(404)));
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    struct FlakyThenOk {
        remaining_failures: std::sync::atomic::AtomicU8,
    }

    #[async_trait]
    impl FetchBackend for FlakyThenOk {
        async fn fetch(&self, url: &Url, _config: &FetchConfig) -> Result<FetchResponse, CrawlError> {
            if self.remaining_failures.fetch_sub(1, std::sync::atomic::Ordering::SeqCst) > 0 {
                return Ok(FetchResponse {
                    requested_url: url.to_string(),
                    final_url: url.to_string(),
                    status: 503,
                    headers: HashMap::new(),
                    body: Vec::new(),
                    content_type: None,
                    fetched_at: chrono::Utc::now(),
                    response_time_ms: 0,
                    redirect_chain: Vec::new(),
                    loop_detected: false,
                    redirect_cap_exceeded: false,
                });
            }
            Ok(FetchResponse {
                requested_url: url.to_string(),
                final_url: url.to_string(),
                status: 200,
                headers: HashMap::new(),
                body: b"ok".to_vec(),
                content_type: None,
                fetched_at: chrono::Utc::now(),
                response_time_ms: 0,
                redirect_chain: Vec::new(),
                loop_detected: false,
                redirect_cap_exceeded: false,
            })
        }
    }

    #[tokio::test]
    async fn five_xx_is_retried_then_succeeds() {
        let pool = FetchPool::new(1, Duration::from_millis(0));
        let backend = FlakyThenOk { remaining_failures: std::sync::atomic::AtomicU8::new(1) };
        let url = Url::parse("http://example.com/").unwrap();
        let config = FetchConfig::default();
        let resp = pool.fetch(&backend, &url, &config).await.unwrap();
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn per_host_pacing_enforces_minimum_delay() {
        let pool = FetchPool::new(4, Duration::from_millis(50));
        let url = Url::parse("http://example.com/").unwrap();
        pool.wait_for_host_slot(&url).await;
        let start = Instant::now();
        pool.wait_for_host_slot(&url).await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}

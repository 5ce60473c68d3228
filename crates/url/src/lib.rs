//! Canonicalizes and classifies URLs. Pure, synchronous, no I/O — every
//! other component links against this without pulling in storage or
//! networking.

use sitecrawler_core::{CrawlError, UrlClass};
use url::Url;

/// Hosts treated as `social` regardless of scheme/path.
const SOCIAL_SUFFIXES: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "x.com",
    "linkedin.com",
    "instagram.com",
    "pinterest.com",
    "tiktok.com",
    "youtube.com",
    "reddit.com",
];

/// Common CDN/hosting hosts classified as `network` rather than `external`.
const NETWORK_SUFFIXES: &[&str] = &[
    "cloudflare.com",
    "cloudfront.net",
    "akamaihd.net",
    "fastly.net",
    "amazonaws.com",
    "googleusercontent.com",
    "jsdelivr.net",
    "unpkg.com",
];

const NON_HTTP_SCHEMES: &[&str] = &["mailto", "tel", "javascript", "data", "ftp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUrl {
    pub canonical: String,
    pub host: String,
    pub scheme: String,
}

/// Whether `host` is `suffix` or a subdomain of it.
fn matches_suffix(host: &str, suffix: &str) -> bool {
    host == suffix || host.ends_with(&format!(".{suffix}"))
}

/// Classifies a normalized URL, accounting for non-http schemes first.
pub fn classify_url(normalized: &NormalizedUrl, seed_hosts: &[String], include_subdomains: bool) -> UrlClass {
    match normalized.scheme.as_str() {
        "mailto" => UrlClass::Mail,
        "tel" | "javascript" | "data" | "ftp" => UrlClass::Other,
        _ => classify(&normalized.host, seed_hosts, include_subdomains),
    }
}

pub fn classify(host: &str, seed_hosts: &[String], include_subdomains: bool) -> UrlClass {
    for seed in seed_hosts {
        let is_internal = if include_subdomains {
            matches_suffix(host, seed)
        } else {
            host == seed
        };
        if is_internal {
            return UrlClass::Internal;
        }
    }
    if SOCIAL_SUFFIXES.iter().any(|s| matches_suffix(host, s)) {
        return UrlClass::Social;
    }
    if NETWORK_SUFFIXES.iter().any(|s| matches_suffix(host, s)) {
        return UrlClass::Network;
    }
    UrlClass::External
}

/// Strips stray whitespace and the smart quotes copy-paste from rich text
/// sometimes leaves around an otherwise-valid href.
fn clean_input(raw: &str) -> String {
    raw.trim()
        .replace(['\u{201c}', '\u{201d}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
}

/// Normalizes `raw` (resolved against `base` if relative) per the rules:
/// lowercase scheme/host, drop default ports, collapse `//` in path,
/// resolve `.`/`..`, percent-encode, sort query params lexicographically,
/// drop fragment.
pub fn normalize(raw: &str, base: Option<&Url>) -> Result<NormalizedUrl, CrawlError> {
    let cleaned = clean_input(raw);
    if cleaned.is_empty() {
        return Err(CrawlError::MalformedUrl(raw.to_string()));
    }

    let parsed = match base {
        Some(base_url) => base_url
            .join(&cleaned)
            .map_err(|e| CrawlError::MalformedUrl(format!("{raw}: {e}")))?,
        None => Url::parse(&cleaned).map_err(|e| CrawlError::MalformedUrl(format!("{raw}: {e}")))?,
    };

    let scheme = parsed.scheme().to_lowercase();
    if NON_HTTP_SCHEMES.contains(&scheme.as_str()) {
        return Ok(NormalizedUrl {
            canonical: parsed.as_str().to_string(),
            host: String::new(),
            scheme,
        });
    }
    if scheme != "http" && scheme != "https" {
        return Err(CrawlError::MalformedUrl(format!(
            "unsupported scheme: {scheme}"
        )));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| CrawlError::MalformedUrl(format!("no host: {raw}")))?
        .to_lowercase();

    let mut url = parsed.clone();
    url.set_fragment(None);

    // Default ports.
    let is_default_port = matches!((scheme.as_str(), url.port()), ("http", Some(80)) | ("https", Some(443)));
    if is_default_port {
        let _ = url.set_port(None);
    }

    // Collapse `//` and resolve `.`/`..` in the path; `url` already resolves
    // `.`/`..` segments during parsing, so only collapse doubled slashes.
    let collapsed_path = collapse_slashes(url.path());
    url.set_path(&collapsed_path);

    // Sort query parameters lexicographically by key.
    if let Some(query) = url.query() {
        let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &pairs {
            serializer.append_pair(k, v);
        }
        let sorted = serializer.finish();
        if sorted.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&sorted));
        }
    }

    let _ = url.set_host(Some(&host));
    let _ = url.set_scheme(&scheme);

    Ok(NormalizedUrl {
        canonical: url.to_string(),
        host,
        scheme,
    })
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut last_was_slash = false;
    for c in path.chars() {
        if c == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        out.push(c);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

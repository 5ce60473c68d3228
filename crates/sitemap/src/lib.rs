//! Fetches and parses XML sitemaps and sitemap indexes.

use std::io::Read;

use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use tracing::warn;

pub struct SitemapUrlEntry {
    pub loc: String,
    pub lastmod: Option<String>,
    pub changefreq: Option<String>,
    pub priority: Option<String>,
    pub hreflang: Vec<(String, String)>,
}

enum SitemapEntry {
    Url(SitemapUrlEntry),
    Index(String),
}

pub struct SitemapDiscoverer {
    client: Client,
    user_agent: String,
    max_recursion_depth: u8,
}

impl SitemapDiscoverer {
    pub fn new(client: Client, user_agent: String, max_recursion_depth: u8) -> Self {
        Self {
            client,
            user_agent,
            max_recursion_depth,
        }
    }

    /// Fetches `sitemap_url`, recursing into child sitemaps (bounded by
    /// `max_recursion_depth`), and returns every `<url>` entry discovered.
    pub async fn discover(&self, sitemap_url: &str) -> Vec<SitemapUrlEntry> {
        self.discover_at_depth(sitemap_url, 0).await
    }

    fn discover_at_depth<'a>(
        &'a self,
        sitemap_url: &'a str,
        depth: u8,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Vec<SitemapUrlEntry>> + Send + 'a>> {
        Box::pin(async move {
            if depth >= self.max_recursion_depth {
                warn!(sitemap_url, depth, "sitemap recursion depth exceeded, stopping");
                return Vec::new();
            }

            let body = match self.fetch_decompressed(sitemap_url).await {
                Some(b) => b,
                None => return Vec::new(),
            };

            let entries = parse_sitemap(&body);
            let mut urls = Vec::new();
            for entry in entries {
                match entry {
                    SitemapEntry::Url(u) => urls.push(u),
                    SitemapEntry::Index(child_url) => {
                        urls.extend(self.discover_at_depth(&child_url, depth + 1).await);
                    }
                }
            }
            urls
        })
    }

    async fn fetch_decompressed(&self, url: &str) -> Option<String> {
        let resp = self
            .client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .send()
            .await
            .map_err(|e| warn!(url, error = %e, "sitemap fetch failed"))
            .ok()?;
        if !resp.status().is_success() {
            warn!(url, status = %resp.status(), "sitemap fetch non-2xx");
            return None;
        }
        let is_gzip = url.ends_with(".gz")
            || resp
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .map(|ct| ct.contains("gzip"))
                .unwrap_or(false);
        let bytes = resp.bytes().await.ok()?;
        if is_gzip {
            let mut decoder = flate2::read::GzDecoder::new(&bytes[..]);
            let mut out = String::new();
            decoder.read_to_string(&mut out).ok()?;
            Some(out)
        } else {
            String::from_utf8(bytes.to_vec()).ok()
        }
    }
}

fn parse_sitemap(xml: &str) -> Vec<SitemapEntry> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut in_sitemap_index_entry = false;
    let mut in_url_entry = false;
    let mut current_tag: Option<String> = None;

    let mut loc = None;
    let mut lastmod = None;
    let mut changefreq = None;
    let mut priority = None;
    let mut hreflang: Vec<(String, String)> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = e.name();
                let name = String::from_utf8_lossy(name.as_ref()).to_string();
                match name.as_str() {
                    "sitemap" => in_sitemap_index_entry = true,
                    "url" => in_url_entry = true,
                    "xhtml:link" | "link" => {
                        let mut rel = None;
                        let mut hreflang_code = None;
                        let mut href = None;
                        for attr in e.attributes().flatten() {
                            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                            let value = attr.unescape_value().unwrap_or_default().to_string();
                            match key.as_str() {
                                "rel" => rel = Some(value),
                                "hreflang" => hreflang_code = Some(value),
                                "href" => href = Some(value),
                                _ => {}
                            }
                        }
                        if rel.as_deref() == Some("alternate") {
                            if let (Some(code), Some(href)) = (hreflang_code, href) {
                                hreflang.push((code, href));
                            }
                        }
                    }
                    _ => current_tag = Some(name),
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                if in_sitemap_index_entry && current_tag.as_deref() == Some("loc") {
                    entries.push(SitemapEntry::Index(text));
                } else if in_url_entry {
                    match current_tag.as_deref() {
                        Some("loc") => loc = Some(text),
                        Some("lastmod") => lastmod = Some(text),
                        Some("changefreq") => changefreq = Some(text),
                        Some("priority") => priority = Some(text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "sitemap" => in_sitemap_index_entry = false,
                    "url" => {
                        in_url_entry = false;
                        if let Some(loc) = loc.take() {
                            entries.push(SitemapEntry::Url(SitemapUrlEntry {
                                loc,
                                lastmod: lastmod.take(),
                                changefreq: changefreq.take(),
                                priority: priority.take(),
                                hreflang: std::mem::take(&mut hreflang),
                            }));
                        }
                    }
                    _ => current_tag = None,
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!(error = %e, "malformed sitemap XML, stopping parse");
                break;
            }
            _ => {}
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_urlset_with_hreflang() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
        <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9" xmlns:xhtml="http://www.w3.org/1999/xhtml">
          <url>
            <loc>https://example.com/en/</loc>
            <lastmod>2026-01-01</lastmod>
            <xhtml:link rel="alternate" hreflang="fr" href="https://example.com/fr/"/>
          </url>
          <url>
            <loc>https://example.com/about</loc>
          </url>
        </urlset>"#;
        let entries = parse_sitemap(xml);
        assert_eq!(entries.len(), 2);
        match &entries[0] {
            SitemapEntry::Url(u) => {
                assert_eq!(u.loc, "https://example.com/en/");
                assert_eq!(u.lastmod.as_deref(), Some("2026-01-01"));
                assert_eq!(u.hreflang, vec![("fr".to_string(), "https://example.com/fr/".to_string())]);
            }
            _ => panic!("expected url entry"),
        }
    }

    #[test]
    fn parses_sitemap_index() {
        let xml = r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
          <sitemap><loc>https://example.com/sitemap1.xml</loc></sitemap>
          <sitemap><loc>https://example.com/sitemap2.xml</loc></sitemap>
        </sitemapindex>"#;
        let entries = parse_sitemap(xml);
        assert_eq!(entries.len(), 2);
        assert!(matches!(&entries[0], SitemapEntry::Index(u) if u == "https://example.com/sitemap1.xml"));
    }

    #[test]
    fn malformed_xml_yields_partial_results_not_panic() {
        let xml = "<urlset><url><loc>https://example.com/a</loc></url><url><loc>broken";
        let entries = parse_sitemap(xml);
        assert_eq!(entries.len(), 1);
    }
}

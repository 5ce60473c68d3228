//! Derives SEO-relevant structure from a fetched HTML document.
//! Tolerant of broken markup; malformed individual attributes are skipped
//! rather than failing the whole extraction.

pub mod html;

use sitecrawler_core::ExtractedPage;
use url::Url;

/// Max bytes handed to the HTML parser; larger bodies are truncated first
/// so a pathological page can't blow up parse time or memory.
const MAX_PARSE_SIZE: usize = 10 * 1024 * 1024;

/// Whether `content_type` is HTML/XHTML and should be handed to the
/// extractor at all; other content types are stored but not parsed.
pub fn should_extract(content_type: Option<&str>) -> bool {
    match content_type {
        Some(ct) => {
            let ct = ct.to_lowercase();
            ct.contains("text/html") || ct.contains("application/xhtml+xml")
        }
        None => false,
    }
}

/// Parses `body` as HTML relative to `final_url` (the post-redirect URL,
/// since relative hrefs resolve against where the document actually lives)
/// and extracts title, headings, word count, canonical URL, meta-robots,
/// hreflang, and link inventory.
pub fn extract(body: &[u8], final_url: &Url) -> ExtractedPage {
    let body = if body.len() > MAX_PARSE_SIZE { &body[..MAX_PARSE_SIZE] } else { body };
    let body_str = String::from_utf8_lossy(body);
    let result = html::parse_html(&body_str, final_url);

    ExtractedPage {
        title: result.title,
        meta_description: result.meta_description,
        h1: result.h1,
        h2: result.h2,
        word_count: result.word_count,
        canonical_url: result.canonical_url,
        meta_robots: result.meta_robots,
        hreflang_html: result.hreflang_html,
        links: result.links,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_extract_recognizes_html_variants() {
        assert!(should_extract(Some("text/html; charset=utf-8")));
        assert!(should_extract(Some("application/xhtml+xml")));
        assert!(!should_extract(Some("application/pdf")));
        assert!(!should_extract(None));
    }

    #[test]
    fn extract_populates_extracted_page() {
        let html = b"<html><head><title>Hi</title></head><body><h1>Hello</h1></body></html>";
        let url = Url::parse("https://example.com/").unwrap();
        let page = extract(html, &url);
        assert_eq!(page.title.as_deref(), Some("Hi"));
        assert_eq!(page.h1, vec!["Hello".to_string()]);
    }

    #[test]
    fn extract_truncates_oversized_body() {
        let mut html = b"<html><body>".to_vec();
        html.extend(std::iter::repeat(b'a').take(MAX_PARSE_SIZE + 1000));
        html.extend(b"</body></html>");
        let url = Url::parse("https://example.com/").unwrap();
        let page = extract(&html, &url);
        assert!(page.word_count > 0);
    }
}

use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

use sitecrawler_core::{ExtractedLink, HreflangEntry, MetaRobotsDirectives};
use sitecrawler_indexability::parse_robots_directives;

/// Everything the extractor pulls out of one fetched HTML document,
/// before any URL normalization/interning — `canonical_url`,
/// hreflang hrefs, and anchor targets are resolved-but-raw strings; the
/// controller is the one that normalizes and interns them.
pub struct HtmlResult {
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

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

/// Whitespace-normalizes element text: collapses runs of whitespace and
/// trims. Returns `None` for an element with no non-whitespace text.
fn normalized_text(el: ElementRef) -> Option<String> {
    let text = el.text().collect::<String>();
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Deterministic XPath for an anchor: a path of sibling-indexed element
/// steps from the document root, tagged by name.
/// Stable across runs because it depends only on document order.
fn xpath_of(el: ElementRef) -> String {
    let mut steps = Vec::new();
    let mut node = *el;
    loop {
        if let Node::Element(element) = node.value() {
            let tag = element.name();
            let index = node
                .prev_siblings()
                .filter(|sib| matches!(sib.value(), Node::Element(e) if e.name() == tag))
                .count()
                + 1;
            steps.push(format!("{tag}[{index}]"));
        }
        match node.parent() {
            Some(parent) => node = parent,
            None => break,
        }
    }
    steps.reverse();
    format!("/{}", steps.join("/"))
}

/// Visible text under `<body>`, excluding `<script>`/`<style>` subtrees,
/// for word-count purposes.
fn collect_visible_text(node: ego_tree::NodeRef<Node>, out: &mut String) {
    if let Node::Element(element) = node.value() {
        if matches!(element.name(), "script" | "style") {
            return;
        }
    }
    if let Node::Text(text) = node.value() {
        out.push_str(text);
        out.push(' ');
    }
    for child in node.children() {
        collect_visible_text(child, out);
    }
}

/// Parses `html_str` tolerantly — broken markup is routine.
/// Malformed individual attributes (an unresolvable `href`) are skipped;
/// the rest of the document still contributes to the result.
pub fn parse_html(html_str: &str, base_url: &Url) -> HtmlResult {
    let document = Html::parse_document(html_str);

    let title = selector("title")
        .and_then(|s| document.select(&s).next())
        .and_then(normalized_text);

    let h1: Vec<String> = selector("h1")
        .map(|s| document.select(&s).map(|el| normalized_text(el).unwrap_or_default()).collect())
        .unwrap_or_default();
    let h2: Vec<String> = selector("h2")
        .map(|s| document.select(&s).map(|el| normalized_text(el).unwrap_or_default()).collect())
        .unwrap_or_default();

    let mut visible_text = String::new();
    if let Some(body_sel) = selector("body") {
        if let Some(body) = document.select(&body_sel).next() {
            collect_visible_text(*body, &mut visible_text);
        }
    }
    let word_count = visible_text.split_whitespace().count() as u32;

    let meta_description = extract_meta_content(&document, "description");

    let canonical_url = selector("link[rel=canonical]")
        .and_then(|s| document.select(&s).next())
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| base_url.join(href).ok())
        .map(|u| u.to_string());

    let meta_robots = extract_meta_content(&document, "robots")
        .map(|raw| parse_robots_directives(&raw))
        .unwrap_or_default();

    let hreflang_html = extract_hreflang(&document, base_url);
    let links = extract_links(&document, base_url);

    HtmlResult {
        title,
        meta_description,
        h1,
        h2,
        word_count,
        canonical_url,
        meta_robots,
        hreflang_html,
        links,
    }
}

fn extract_meta_content(document: &Html, name: &str) -> Option<String> {
    let sel_str = format!("meta[name='{name}'], meta[name='{}']", name.to_uppercase());
    selector(&sel_str)
        .and_then(|s| document.select(&s).next())
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.to_string())
}

fn extract_hreflang(document: &Html, base_url: &Url) -> Vec<HreflangEntry> {
    let Some(sel) = selector("link[rel=alternate][hreflang]") else {
        return Vec::new();
    };
    document
        .select(&sel)
        .filter_map(|el| {
            let hreflang = el.value().attr("hreflang")?;
            let href = el.value().attr("href")?;
            let resolved = base_url.join(href).ok()?;
            Some(HreflangEntry {
                language_code: hreflang.to_string(),
                href: resolved.to_string(),
            })
        })
        .collect()
}

fn extract_links(document: &Html, base_url: &Url) -> Vec<ExtractedLink> {
    let Some(sel) = selector("a[href]") else {
        return Vec::new();
    };
    document
        .select(&sel)
        .filter_map(|el| {
            let raw_href = el.value().attr("href")?;
            let resolved = base_url.join(raw_href).ok()?;
            let rel = el
                .value()
                .attr("rel")
                .map(|r| r.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default();
            Some(ExtractedLink {
                target_url: resolved.to_string(),
                anchor_text: normalized_text(el),
                xpath: xpath_of(el),
                raw_href: raw_href.to_string(),
                rel,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/dir/page.html").unwrap()
    }

    #[test]
    fn extracts_title_whitespace_normalized() {
        let html = "<html><head><title>  Hello\n   World </title></head></html>";
        let result = parse_html(html, &base());
        assert_eq!(result.title.as_deref(), Some("Hello World"));
    }

    #[test]
    fn counts_headings_and_captures_first() {
        let html = "<html><body><h1>First</h1><h1>Second</h1><h2>Only</h2></body></html>";
        let result = parse_html(html, &base());
        assert_eq!(result.h1, vec!["First".to_string(), "Second".to_string()]);
        assert_eq!(result.h2, vec!["Only".to_string()]);
    }

    #[test]
    fn resolves_canonical_against_base() {
        let html = r#"<html><head><link rel="canonical" href="/canon"></head></html>"#;
        let result = parse_html(html, &base());
        assert_eq!(result.canonical_url.as_deref(), Some("https://example.com/canon"));
    }

    #[test]
    fn parses_meta_robots_noindex() {
        let html = r#"<html><head><meta name="robots" content="noindex, nofollow"></head></html>"#;
        let result = parse_html(html, &base());
        assert!(result.meta_robots.noindex);
        assert!(result.meta_robots.nofollow);
    }

    #[test]
    fn extracts_hreflang_alternates() {
        let html = r#"<html><head>
            <link rel="alternate" hreflang="fr" href="/fr/">
        </head></html>"#;
        let result = parse_html(html, &base());
        assert_eq!(result.hreflang_html.len(), 1);
        assert_eq!(result.hreflang_html[0].language_code, "fr");
        assert_eq!(result.hreflang_html[0].href, "https://example.com/fr/");
    }

    #[test]
    fn extracts_anchor_with_xpath_and_rel() {
        let html = r#"<html><body><div><a href="/a" rel="nofollow">Link A</a></div></body></html>"#;
        let result = parse_html(html, &base());
        assert_eq!(result.links.len(), 1);
        let link = &result.links[0];
        assert_eq!(link.target_url, "https://example.com/a");
        assert_eq!(link.anchor_text.as_deref(), Some("Link A"));
        assert_eq!(link.rel, vec!["nofollow".to_string()]);
        assert!(link.xpath.starts_with("/html[1]/body[1]"));
        assert!(link.xpath.ends_with("a[1]"));
    }

    #[test]
    fn skips_unresolvable_href_without_failing_whole_parse() {
        let html = r#"<html><body><a href="http://[::bad">broken</a><a href="/ok">ok</a></body></html>"#;
        let result = parse_html(html, &base());
        assert_eq!(result.links.len(), 1);
        assert_eq!(result.links[0].target_url, "https://example.com/ok");
    }

    #[test]
    fn word_count_excludes_script_and_style() {
        let html = r#"<html><body>
            <script>var x = "should not count this either";</script>
            <style>.a { color: red; }</style>
            <p>one two three</p>
        </body></html>"#;
        let result = parse_html(html, &base());
        assert_eq!(result.word_count, 3);
    }

    #[test]
    fn xpath_distinguishes_sibling_index() {
        let html = "<html><body><p>a</p><p>b</p></body></html>";
        let document = Html::parse_document(html);
        let sel = Selector::parse("p").unwrap();
        let paths: Vec<String> = document.select(&sel).map(xpath_of).collect();
        assert_eq!(paths[0], "/html[1]/body[1]/p[1]");
        assert_eq!(paths[1], "/html[1]/body[1]/p[2]");
    }
}

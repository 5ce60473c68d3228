//! Combines the robots.txt verdict, parsed `<meta name="robots">` tokens,
//! and `X-Robots-Tag` header tokens into a single crawlability record.
//! Pure, synchronous, no I/O — a leaf alongside
//! `sitecrawler-url` so the controller can evaluate a verdict without
//! threading network or storage handles through it.

use sitecrawler_core::{IndexabilityVerdict, MetaRobotsDirectives, ReasonBitmap};

/// Parses directive tokens shared by `<meta name="robots" content="...">`
/// and the `X-Robots-Tag` header — both use the same comma-separated
/// token grammar, optionally prefixed with a bot name (`googlebot: noindex`),
/// which this parser ignores since the evaluator doesn't distinguish UAs.
pub fn parse_robots_directives(raw: &str) -> MetaRobotsDirectives {
    let mut directives = MetaRobotsDirectives::default();
    for token in raw.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        // Strip a leading "bot-name:" prefix if present.
        let token = token.rsplit(':').next().unwrap_or(token).trim();
        let lower = token.to_lowercase();
        match lower.as_str() {
            "noindex" => directives.noindex = true,
            "nofollow" => directives.nofollow = true,
            "noarchive" => directives.noarchive = true,
            "nosnippet" => directives.nosnippet = true,
            _ => {}
        }
        directives.raw_tokens.push(lower);
    }
    directives
}

/// Produces the composite verdict for one fetched URL.
///
/// `robots_txt_allows`/`robots_txt_unavailable` come from the Robots Cache;
/// `meta_robots` is whatever the Extractor found (defaulted if the body
/// wasn't HTML or had no meta tag); `x_robots_tag` is the raw header value,
/// if present; `status_code` is the final status of the fetch (0 for a
/// timeout/network error).
pub fn evaluate(
    robots_txt_allows: bool,
    robots_txt_unavailable: bool,
    meta_robots: &MetaRobotsDirectives,
    x_robots_tag: Option<&str>,
    status_code: u16,
) -> IndexabilityVerdict {
    let html_meta_allows = !meta_robots.noindex;
    let header_directives = x_robots_tag.map(|raw| parse_robots_directives(raw));
    let http_header_allows = header_directives.as_ref().map(|d| !d.noindex).unwrap_or(true);
    let status_ok = (200..300).contains(&status_code);

    let mut reasons = ReasonBitmap::default();
    if !robots_txt_allows {
        reasons.insert(ReasonBitmap::ROBOTS_TXT_DISALLOW);
    }
    if robots_txt_unavailable {
        reasons.insert(ReasonBitmap::ROBOTS_TXT_UNAVAILABLE);
    }
    if !html_meta_allows {
        reasons.insert(ReasonBitmap::META_NOINDEX);
    }
    if !http_header_allows {
        reasons.insert(ReasonBitmap::HEADER_NOINDEX);
    }
    if !status_ok {
        reasons.insert(ReasonBitmap::NON_2XX_STATUS);
    }

    let overall_indexable = robots_txt_allows && html_meta_allows && http_header_allows && status_ok;

    IndexabilityVerdict {
        robots_txt_allows,
        html_meta_allows,
        http_header_allows,
        overall_indexable,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_clear_is_indexable() {
        let meta = MetaRobotsDirectives::default();
        let verdict = evaluate(true, false, &meta, None, 200);
        assert!(verdict.overall_indexable);
        assert_eq!(verdict.reasons.0, 0);
    }

    #[test]
    fn robots_disallow_blocks_overall() {
        let meta = MetaRobotsDirectives::default();
        let verdict = evaluate(false, false, &meta, None, 200);
        assert!(!verdict.overall_indexable);
        assert!(verdict.reasons.contains(ReasonBitmap::ROBOTS_TXT_DISALLOW));
    }

    #[test]
    fn meta_noindex_blocks_overall() {
        let mut meta = MetaRobotsDirectives::default();
        meta.noindex = true;
        let verdict = evaluate(true, false, &meta, None, 200);
        assert!(!verdict.overall_indexable);
        assert!(!verdict.html_meta_allows);
        assert!(verdict.reasons.contains(ReasonBitmap::META_NOINDEX));
    }

    #[test]
    fn header_noindex_blocks_overall() {
        let meta = MetaRobotsDirectives::default();
        let verdict = evaluate(true, false, &meta, Some("noindex, nofollow"), 200);
        assert!(!verdict.overall_indexable);
        assert!(!verdict.http_header_allows);
        assert!(verdict.reasons.contains(ReasonBitmap::HEADER_NOINDEX));
    }

    #[test]
    fn non_2xx_status_blocks_overall_but_not_other_reasons() {
        let meta = MetaRobotsDirectives::default();
        let verdict = evaluate(true, false, &meta, None, 404);
        assert!(!verdict.overall_indexable);
        assert!(verdict.reasons.contains(ReasonBitmap::NON_2XX_STATUS));
        assert!(verdict.html_meta_allows);
    }

    #[test]
    fn unavailable_robots_flags_reason_but_stays_permissive() {
        let meta = MetaRobotsDirectives::default();
        let verdict = evaluate(true, true, &meta, None, 200);
        assert!(verdict.overall_indexable);
        assert!(verdict.reasons.contains(ReasonBitmap::ROBOTS_TXT_UNAVAILABLE));
    }

    #[test]
    fn parses_bot_prefixed_tokens() {
        let directives = parse_robots_directives("googlebot: noindex, nofollow");
        assert!(directives.noindex);
        assert!(directives.nofollow);
    }

    #[test]
    fn empty_header_allows() {
        let directives = parse_robots_directives("");
        assert!(!directives.noindex);
    }
}

// Structured extraction from a fetched HTML document: title, publication
// time, body text and image list. Platform rules come from the platform
// table; anything a platform does not cover falls back to generic rules.
// Pure: the same (html, url) always yields the same document.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use knowledge_common::platform::{GENERIC, PROFILES};
use knowledge_common::{profile_for, ExtractedDocument, Platform, PlatformProfile, UNTITLED};
use regex::Regex;

use crate::readability::html_to_markdown;

/// A trailing `-` or `|` segment shorter than this is taken as a site-name suffix.
const SUFFIX_MAX_CHARS: usize = 10;

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title\b[^>]*>(.*?)</title\s*>").expect("valid regex"));
static OG_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]*property\s*=\s*["']og:title["'][^>]*content\s*=\s*["']([^"']+)["']"#)
        .expect("valid regex")
});
static WECHAT_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"var\s+msg_title\s*=\s*['"]([^'"]+)['"]"#).expect("valid regex")
});
static NON_CONTENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>|<noscript\b[^>]*>.*?</noscript\s*>|<!--.*?-->",
    )
    .expect("valid regex")
});
static IMG_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<img\b[^>]*>").expect("valid regex"));
static IMG_SRC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\s(data-src|src)\s*=\s*["']([^"']+)["']"#).expect("valid regex")
});
static ICON_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(^|[^a-z])(fav)?icons?([^a-z]|$)").expect("valid regex"));
static BARE_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})[-/年.](\d{1,2})[-/月.](\d{1,2})").expect("valid regex")
});
static NUMERIC_ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|\d+);").expect("valid regex"));
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Every timestamp pattern in the platform table, compiled once.
static TIMESTAMP_RES: LazyLock<HashMap<&'static str, Regex>> = LazyLock::new(|| {
    PROFILES
        .iter()
        .copied()
        .chain(std::iter::once(&GENERIC))
        .flat_map(|p| p.timestamp_patterns.iter().copied())
        .map(|pattern| (pattern, Regex::new(pattern).expect("valid timestamp regex")))
        .collect()
});

const TRACKER_MARKERS: [&str; 6] = [
    "pixel",
    "beacon",
    "tracker",
    "tracking",
    "analytics",
    "doubleclick.net",
];

pub fn extract(raw_document: &str, source_url: &str) -> ExtractedDocument {
    let profile = profile_for(source_url);
    ExtractedDocument {
        title: extract_title(raw_document, profile),
        published_at: extract_published_at(raw_document, profile),
        body: extract_body(raw_document, source_url),
        images: extract_images(raw_document, source_url),
    }
}

// ---------------------------------------------------------------------------
// Title
// ---------------------------------------------------------------------------

pub fn extract_title(html: &str, profile: &PlatformProfile) -> String {
    if let Some(title) = TITLE_RE
        .captures(html)
        .map(|c| clean_text(&c[1]))
        .filter(|t| !t.is_empty())
    {
        let stripped = strip_site_suffix(&title);
        if !stripped.is_empty() {
            return stripped;
        }
    }

    let fallback = match profile.platform {
        Platform::WeChat => WECHAT_TITLE_RE
            .captures(html)
            .or_else(|| OG_TITLE_RE.captures(html)),
        _ => OG_TITLE_RE.captures(html),
    };
    fallback
        .map(|c| clean_text(&c[1]))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string())
}

/// Drop site-name decoration: everything after the first `_`, then a short
/// trailing `|` or `-` segment.
fn strip_site_suffix(title: &str) -> String {
    let mut title = title.trim().to_string();

    if let Some((head, _)) = title.split_once('_') {
        if !head.trim().is_empty() {
            title = head.trim().to_string();
        }
    }

    for separator in ['|', '-'] {
        if let Some((head, tail)) = title.rsplit_once(separator) {
            if !head.trim().is_empty() && tail.trim().chars().count() < SUFFIX_MAX_CHARS {
                title = head.trim().to_string();
            }
        }
    }

    title
}

fn clean_text(raw: &str) -> String {
    let decoded = decode_entities(raw);
    WHITESPACE_RE.replace_all(decoded.trim(), " ").into_owned()
}

fn decode_entities(raw: &str) -> String {
    let named = raw
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'");
    let numeric = NUMERIC_ENTITY_RE.replace_all(&named, |caps: &regex::Captures| {
        let code = &caps[1];
        let value = match code.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        value
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    // Last, so "&amp;lt;" decodes to "&lt;" rather than "<".
    numeric.replace("&amp;", "&")
}

// ---------------------------------------------------------------------------
// Publication time
// ---------------------------------------------------------------------------

/// Platform patterns first, then generic patterns, then any date-shaped substring.
pub fn extract_published_at(html: &str, profile: &PlatformProfile) -> Option<DateTime<Utc>> {
    let generic = if profile.is_generic() {
        &[][..]
    } else {
        GENERIC.timestamp_patterns
    };

    for pattern in profile.timestamp_patterns.iter().chain(generic) {
        let Some(re) = TIMESTAMP_RES.get(pattern) else {
            continue;
        };
        for cap in re.captures_iter(html) {
            if let Some(dt) = cap.get(1).and_then(|m| parse_timestamp(m.as_str())) {
                return Some(dt);
            }
        }
    }

    BARE_DATE_RE.captures_iter(html).find_map(|cap| {
        let year: i32 = cap[1].parse().ok()?;
        let month: u32 = cap[2].parse().ok()?;
        let day: u32 = cap[3].parse().ok()?;
        if !(1990..=2100).contains(&year) {
            return None;
        }
        NaiveDate::from_ymd_opt(year, month, day)?
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
    })
}

/// Parse a timestamp value in any of the shapes article pages embed.
/// Values without a zone are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if s.chars().all(|c| c.is_ascii_digit()) {
        let n: i64 = s.parse().ok()?;
        return match s.len() {
            10 => DateTime::from_timestamp(n, 0),
            13 => DateTime::from_timestamp_millis(n),
            _ => None,
        };
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
        "%Y/%m/%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc());
        }
    }

    for format in ["%Y-%m-%d", "%Y/%m/%d", "%Y年%m月%d日", "%B %d, %Y", "%b %d, %Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, format) {
            return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Body
// ---------------------------------------------------------------------------

/// Script, style, noscript and comment blocks go first so none of their text
/// reaches the converter.
pub fn extract_body(html: &str, source_url: &str) -> String {
    let cleaned = NON_CONTENT_RE.replace_all(html, "");
    let mut markdown = html_to_markdown(cleaned.as_bytes(), Some(source_url), true);
    if markdown.trim().is_empty() {
        markdown = html_to_markdown(cleaned.as_bytes(), Some(source_url), false);
    }
    normalize_text(&markdown)
}

/// Trim trailing whitespace per line and collapse runs of blank lines.
fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines().map(str::trim_end) {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// Image URLs in first-seen order. Lazy-load `data-src` wins over `src`.
pub fn extract_images(html: &str, source_url: &str) -> Vec<String> {
    let base = url::Url::parse(source_url).ok();
    let mut seen = HashSet::new();
    let mut images = Vec::new();

    for tag in IMG_TAG_RE.find_iter(html) {
        let mut src = None;
        for cap in IMG_SRC_RE.captures_iter(tag.as_str()) {
            let Some(value) = cap.get(2).map(|m| m.as_str().trim()) else {
                continue;
            };
            if value.is_empty() || value.to_ascii_lowercase().starts_with("data:") {
                continue;
            }
            if cap[1].eq_ignore_ascii_case("data-src") {
                src = Some(value);
                break;
            }
            src.get_or_insert(value);
        }

        let Some(raw) = src else { continue };
        let Some(resolved) = resolve_image_url(&decode_entities(raw), base.as_ref()) else {
            continue;
        };
        if is_icon_or_tracker(&resolved) {
            continue;
        }
        if seen.insert(resolved.clone()) {
            images.push(resolved);
        }
    }

    images
}

fn resolve_image_url(raw: &str, base: Option<&url::Url>) -> Option<String> {
    let parsed = match url::Url::parse(raw) {
        Ok(u) => u,
        Err(_) => base?.join(raw).ok()?,
    };
    matches!(parsed.scheme(), "http" | "https").then(|| parsed.to_string())
}

fn is_icon_or_tracker(image_url: &str) -> bool {
    let lower = image_url.to_ascii_lowercase();
    if TRACKER_MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }
    let path = lower.split(['?', '#']).next().unwrap_or_default();
    let filename = path.rsplit('/').next().unwrap_or_default();
    ICON_NAME_RE.is_match(filename)
}

#[cfg(test)]
mod tests {
    use chrono::Datelike;
    use knowledge_common::platform::{JUEJIN, WECHAT};

    use super::*;

    #[test]
    fn title_drops_underscore_and_short_dash_suffix() {
        assert_eq!(
            strip_site_suffix("深入理解 Tokio 调度器_技术博客"),
            "深入理解 Tokio 调度器"
        );
        assert_eq!(
            strip_site_suffix("Understanding async Rust - 掘金"),
            "Understanding async Rust"
        );
        assert_eq!(strip_site_suffix("Release notes | Blog"), "Release notes");
    }

    #[test]
    fn title_keeps_long_trailing_segment() {
        let title = "Rust vs Go - a practical comparison for backend services";
        assert_eq!(strip_site_suffix(title), title);
    }

    #[test]
    fn title_decodes_entities_and_collapses_whitespace() {
        let html = "<title>\n  Tom &amp; Jerry &#8212;\n  a   story  </title>";
        assert_eq!(extract_title(html, &GENERIC), "Tom & Jerry \u{2014} a story");
    }

    #[test]
    fn missing_title_falls_back_to_og_then_sentinel() {
        let og = r#"<meta property="og:title" content="From OpenGraph">"#;
        assert_eq!(extract_title(og, &GENERIC), "From OpenGraph");
        assert_eq!(extract_title("<p>nothing</p>", &GENERIC), UNTITLED);
    }

    #[test]
    fn wechat_title_falls_back_to_msg_title() {
        let html = r#"<title></title><script>var msg_title = '公众号文章标题'.html(false);</script>"#;
        assert_eq!(extract_title(html, &WECHAT), "公众号文章标题");
    }

    #[test]
    fn wechat_publish_time_wins_over_generic_fields() {
        let html = r#"{"publish_time":"2024-03-08 09:15:00"} {"datePublished":"2020-01-01"}"#;
        let dt = extract_published_at(html, &WECHAT).unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M").to_string(), "2024-03-08 09:15");
    }

    #[test]
    fn wechat_unix_create_time_parses() {
        let html = r#"<script>var ct = "1709860500";</script>"#;
        let dt = extract_published_at(html, &WECHAT).unwrap();
        assert_eq!(dt.timestamp(), 1_709_860_500);
    }

    #[test]
    fn juejin_created_at_parses() {
        let html = r#"{"article_info":{"createdAt":"2023-11-02T08:30:00.000Z"}}"#;
        let dt = extract_published_at(html, &JUEJIN).unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2023, 11, 2));
    }

    #[test]
    fn generic_patterns_apply_in_priority_order() {
        let html = r#"
            <meta property="article:published_time" content="2025-05-10T14:00:00Z">
            <script type="application/ld+json">{"datePublished":"2025-01-01T00:00:00Z"}</script>
        "#;
        let dt = extract_published_at(html, &GENERIC).unwrap();
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2025-01-01");
    }

    #[test]
    fn bare_date_scan_is_last_resort() {
        let html = "<p>发布于 2024年1月5日 北京</p>";
        let dt = extract_published_at(html, &GENERIC).unwrap();
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2024-01-05");
    }

    #[test]
    fn no_timestamp_is_none() {
        assert!(extract_published_at("<p>undated</p>", &GENERIC).is_none());
        assert!(extract_published_at("<p>build 9999-99-99</p>", &GENERIC).is_none());
    }

    #[test]
    fn parse_timestamp_shapes() {
        assert!(parse_timestamp("1709860500000").is_some());
        assert!(parse_timestamp("Tue, 1 Jul 2003 10:52:37 +0200").is_some());
        assert!(parse_timestamp("2024/03/08").is_some());
        assert!(parse_timestamp("June 15, 2025").is_some());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("12345").is_none());
    }

    #[test]
    fn images_skip_inline_icons_and_trackers() {
        let html = r#"
            <img src="data:image/png;base64,AAAA">
            <img src="/static/favicon.ico">
            <img src="https://cdn.example.com/app-icon-32.png">
            <img src="https://stats.example.com/pixel.gif?id=1">
            <img src="/images/silicon-wafer.jpg">
            <img class="lazy" src="data:image/gif;base64,R0l" data-src="https://mmbiz.qpic.cn/a/640?wx_fmt=png&amp;from=appmsg">
            <img src="//cdn.example.com/b.png">
            <img src="/images/silicon-wafer.jpg">
        "#;
        let images = extract_images(html, "https://example.com/posts/1");
        assert_eq!(
            images,
            vec![
                "https://example.com/images/silicon-wafer.jpg",
                "https://mmbiz.qpic.cn/a/640?wx_fmt=png&from=appmsg",
                "https://cdn.example.com/b.png",
            ]
        );
    }

    #[test]
    fn lazy_source_wins_and_blank_values_fall_back() {
        let html = r#"
            <img src="/thumb/a.jpg" data-src="  /full/a.jpg  ">
            <img data-src=" " src="/full/b.jpg">
        "#;
        let images = extract_images(html, "https://example.com/posts/1");
        assert_eq!(
            images,
            vec!["https://example.com/full/a.jpg", "https://example.com/full/b.jpg"]
        );
    }

    #[test]
    fn normalize_collapses_blank_runs() {
        assert_eq!(normalize_text("a  \n\n\n\nb\n\n"), "a\n\nb");
    }

    #[test]
    fn non_content_blocks_are_removed_before_conversion() {
        let html = "<p>keep</p><script>var leaked = 1;</script><style>.x{color:red}</style><!-- note -->";
        let cleaned = NON_CONTENT_RE.replace_all(html, "");
        assert_eq!(cleaned, "<p>keep</p>");
    }
}

// Per-platform rule table: verification signatures, readiness waits,
// timestamp fields and remediation category, keyed by host pattern.
// Lookups that match no host fall through to GENERIC.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    WeChat,
    Zhihu,
    Juejin,
    Generic,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::WeChat => "WeChat",
            Platform::Zhihu => "Zhihu",
            Platform::Juejin => "Juejin",
            Platform::Generic => "generic",
        };
        f.write_str(name)
    }
}

/// Which flavour of "please submit it by hand" message a blocked platform gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationCategory {
    MicroblogArticle,
    QuestionAnswer,
    Generic,
}

/// Navigation completion signal used before readiness selectors are polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    NetworkIdle,
    DomReady,
}

impl WaitUntil {
    /// Puppeteer-style name understood by Browserless `gotoOptions.waitUntil`.
    pub fn as_puppeteer(&self) -> &'static str {
        match self {
            WaitUntil::NetworkIdle => "networkidle2",
            WaitUntil::DomReady => "domcontentloaded",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReadinessRule {
    pub wait_until: WaitUntil,
    /// Any one of these appearing means the dynamic content has rendered.
    pub selectors: &'static [&'static str],
    /// Upper bound on waiting for a selector; rendering proceeds afterwards regardless.
    pub selector_timeout: Duration,
    /// Extra delay after readiness for late scripts.
    pub settle: Duration,
}

#[derive(Debug)]
pub struct PlatformProfile {
    pub platform: Platform,
    pub host_patterns: &'static [&'static str],
    pub remediation: RemediationCategory,
    pub verification_signatures: &'static [&'static str],
    pub readiness: ReadinessRule,
    /// Regexes with one capture group holding a timestamp, in priority order.
    pub timestamp_patterns: &'static [&'static str],
}

impl PlatformProfile {
    pub fn is_generic(&self) -> bool {
        self.platform == Platform::Generic
    }

    pub fn matches_host(&self, host: &str) -> bool {
        self.host_patterns
            .iter()
            .any(|p| host == *p || host.ends_with(&format!(".{p}")))
    }

    pub fn remediation_message(&self) -> String {
        match self.remediation {
            RemediationCategory::MicroblogArticle => format!(
                "{} articles cannot be fetched automatically right now. Copy the article text and \
                 submit it manually; it will be classified and saved directly.",
                self.platform
            ),
            RemediationCategory::QuestionAnswer => format!(
                "{} answers and posts cannot be fetched automatically right now. Copy the content \
                 and submit it manually; it will be classified and saved directly.",
                self.platform
            ),
            RemediationCategory::Generic => "This page cannot be fetched automatically. Copy its \
                 content and submit it manually; it will be classified and saved directly."
                .to_string(),
        }
    }
}

const SELECTOR_TIMEOUT: Duration = Duration::from_secs(10);

pub static WECHAT: PlatformProfile = PlatformProfile {
    platform: Platform::WeChat,
    host_patterns: &["mp.weixin.qq.com"],
    remediation: RemediationCategory::MicroblogArticle,
    verification_signatures: &["环境异常", "完成验证后即可继续访问", "去验证", "security_verify"],
    readiness: ReadinessRule {
        wait_until: WaitUntil::NetworkIdle,
        selectors: &[".rich_media_content", "#js_content", ".article-content"],
        selector_timeout: SELECTOR_TIMEOUT,
        settle: Duration::from_secs(3),
    },
    timestamp_patterns: &[
        r#""publish_time"\s*:\s*"([^"]+)""#,
        r#"var\s+ct\s*=\s*"(\d{10})""#,
        r#"id="publish_time"[^>]*>\s*([^<]+?)\s*<"#,
    ],
};

pub static ZHIHU: PlatformProfile = PlatformProfile {
    platform: Platform::Zhihu,
    host_patterns: &["zhihu.com"],
    remediation: RemediationCategory::QuestionAnswer,
    verification_signatures: &["安全验证", "人机验证", "captcha", "verification"],
    readiness: ReadinessRule {
        wait_until: WaitUntil::NetworkIdle,
        selectors: &[".ContentItem", ".AnswerItem", ".QuestionPage", ".Post-RichText"],
        selector_timeout: SELECTOR_TIMEOUT,
        settle: Duration::from_secs(2),
    },
    timestamp_patterns: &[
        r#""created(?:Time)?"\s*:\s*(\d{10})"#,
        r#"itemprop="dateCreated"\s+content="([^"]+)""#,
    ],
};

pub static JUEJIN: PlatformProfile = PlatformProfile {
    platform: Platform::Juejin,
    host_patterns: &["juejin.cn"],
    remediation: RemediationCategory::Generic,
    verification_signatures: &[],
    readiness: ReadinessRule {
        wait_until: WaitUntil::NetworkIdle,
        selectors: &[".article-content", ".markdown-body"],
        selector_timeout: SELECTOR_TIMEOUT,
        settle: Duration::from_secs(2),
    },
    timestamp_patterns: &[r#""createdAt"\s*:\s*"([^"]+)""#, r#""ctime"\s*:\s*"?(\d{10})"#],
};

pub static GENERIC: PlatformProfile = PlatformProfile {
    platform: Platform::Generic,
    host_patterns: &[],
    remediation: RemediationCategory::Generic,
    verification_signatures: &[
        "verify you are human",
        "please complete security check",
        "anti-bot",
        "robot verification",
        "are you a robot",
        "checking your browser before accessing",
    ],
    readiness: ReadinessRule {
        wait_until: WaitUntil::DomReady,
        selectors: &[],
        selector_timeout: SELECTOR_TIMEOUT,
        settle: Duration::from_secs(2),
    },
    timestamp_patterns: &[
        r#""datePublished"\s*:\s*"([^"]+)""#,
        r#""pubDate"\s*:\s*"([^"]+)""#,
        r#""publishTime"\s*:\s*"([^"]+)""#,
        r#"(?i)<meta[^>]*property\s*=\s*["']article:published_time["'][^>]*content\s*=\s*["']([^"']+)["']"#,
        r#"(?i)<meta[^>]*content\s*=\s*["']([^"']+)["'][^>]*property\s*=\s*["']article:published_time["']"#,
        r#"(?i)<meta[^>]*name\s*=\s*["'](?:publish_date|pubdate|publish-date|date)["'][^>]*content\s*=\s*["']([^"']+)["']"#,
        r#"(?i)<time[^>]*datetime\s*=\s*["']([^"']+)["']"#,
    ],
};

/// Platform-specific entries; GENERIC is the explicit fallback and not listed here.
pub static PROFILES: [&PlatformProfile; 3] = [&WECHAT, &ZHIHU, &JUEJIN];

/// Host of a URL, lowercased. Unparseable input yields `None`.
pub fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url.trim())
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// Rule set for a URL: the first platform whose host pattern matches, else GENERIC.
pub fn profile_for(url: &str) -> &'static PlatformProfile {
    let Some(host) = host_of(url) else {
        return &GENERIC;
    };
    PROFILES
        .iter()
        .copied()
        .find(|p| p.matches_host(&host))
        .unwrap_or(&GENERIC)
}

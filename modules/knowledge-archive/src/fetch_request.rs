use std::fmt;

use knowledge_common::Identity;
use serde::Serialize;

/// Which strategy produced (or is about to produce) a fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyTag {
    Direct,
    Browser,
}

impl fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StrategyTag::Direct => "direct",
            StrategyTag::Browser => "browser",
        })
    }
}

/// One attempt's input. Built fresh per attempt, never mutated.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub identity: Identity,
    pub strategy: StrategyTag,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, identity: Identity, strategy: StrategyTag) -> Self {
        Self {
            url: url.into(),
            identity,
            strategy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchErrorKind {
    Timeout,
    Network { message: String },
    Http { status: u16 },
    Navigation { message: String },
    VerificationBlocked { signature: String },
    Cancelled,
}

impl FetchErrorKind {
    /// Whether another attempt with a fresh identity could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchErrorKind::Timeout
            | FetchErrorKind::Network { .. }
            | FetchErrorKind::Navigation { .. }
            | FetchErrorKind::VerificationBlocked { .. } => true,
            FetchErrorKind::Http { status } => {
                matches!(status, 403 | 408 | 429) || (500..=599).contains(status)
            }
            FetchErrorKind::Cancelled => false,
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchErrorKind::Timeout => write!(f, "timeout"),
            FetchErrorKind::Network { message } => write!(f, "network error: {message}"),
            FetchErrorKind::Http { status } => write!(f, "HTTP {status}"),
            FetchErrorKind::Navigation { message } => write!(f, "navigation failed: {message}"),
            FetchErrorKind::VerificationBlocked { signature } => {
                write!(f, "verification page ({signature})")
            }
            FetchErrorKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of one attempt, or the orchestrator's terminal outcome.
/// Success means `error` is `None` and `raw_document` is present.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub strategy: StrategyTag,
    pub final_url: String,
    pub http_status: Option<u16>,
    pub raw_document: Option<String>,
    pub error: Option<FetchErrorKind>,
}

impl FetchResult {
    pub fn success(
        strategy: StrategyTag,
        final_url: impl Into<String>,
        http_status: Option<u16>,
        raw_document: String,
    ) -> Self {
        Self {
            strategy,
            final_url: final_url.into(),
            http_status,
            raw_document: Some(raw_document),
            error: None,
        }
    }

    pub fn failure(
        strategy: StrategyTag,
        final_url: impl Into<String>,
        http_status: Option<u16>,
        error: FetchErrorKind,
    ) -> Self {
        Self {
            strategy,
            final_url: final_url.into(),
            http_status,
            raw_document: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.raw_document.is_some()
    }

    pub fn is_verification_blocked(&self) -> bool {
        matches!(self.error, Some(FetchErrorKind::VerificationBlocked { .. }))
    }

    /// Turn a delivered document into a blocked failure, dropping the challenge page.
    pub(crate) fn into_blocked(self, signature: String) -> Self {
        Self {
            raw_document: None,
            error: Some(FetchErrorKind::VerificationBlocked { signature }),
            ..self
        }
    }
}

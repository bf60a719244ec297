// Test mocks for the fetch layer.
//
// - ScriptedStrategy (FetchStrategy): replays queued results, records requests
// - HangingStrategy (FetchStrategy): never completes, for cancellation tests
// - FixedIdentities (IdentitySource): deterministic identity sequence
//
// Plus helpers for building identities and results.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use knowledge_common::{Identity, Viewport};

use crate::fetch_request::{FetchErrorKind, FetchRequest, FetchResult, StrategyTag};
use crate::fetchers::FetchStrategy;
use crate::identity::IdentitySource;

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

pub fn test_identity(n: usize) -> Identity {
    Identity {
        user_agent: format!("TestAgent/{n}"),
        viewport: Viewport {
            width: 1280 + n as u32,
            height: 800,
            device_scale_factor: 1.0,
        },
        accept_language: "en-US".to_string(),
    }
}

/// Hands out identities in order, wrapping around.
pub struct FixedIdentities {
    identities: Vec<Identity>,
    cursor: Mutex<usize>,
}

impl FixedIdentities {
    pub fn new(identities: Vec<Identity>) -> Self {
        assert!(!identities.is_empty(), "FixedIdentities needs at least one identity");
        Self {
            identities,
            cursor: Mutex::new(0),
        }
    }

    /// `n` distinct identities from `test_identity`.
    pub fn numbered(n: usize) -> Self {
        Self::new((0..n).map(test_identity).collect())
    }
}

impl IdentitySource for FixedIdentities {
    fn next(&self) -> Identity {
        let mut cursor = self.cursor.lock().unwrap();
        let identity = self.identities[*cursor % self.identities.len()].clone();
        *cursor += 1;
        identity
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

pub fn html_result(strategy: StrategyTag, url: &str, html: &str) -> FetchResult {
    FetchResult::success(strategy, url, Some(200), html.to_string())
}

pub fn failed_result(strategy: StrategyTag, url: &str, error: FetchErrorKind) -> FetchResult {
    let status = match error {
        FetchErrorKind::Http { status } => Some(status),
        _ => None,
    };
    FetchResult::failure(strategy, url, status, error)
}

// ---------------------------------------------------------------------------
// ScriptedStrategy
// ---------------------------------------------------------------------------

/// Returns queued results in order. When the script runs out, every further
/// call fails with a network error naming the exhausted script.
pub struct ScriptedStrategy {
    tag: StrategyTag,
    script: Mutex<VecDeque<FetchResult>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl ScriptedStrategy {
    pub fn new(tag: StrategyTag) -> Self {
        Self {
            tag,
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, result: FetchResult) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    pub fn then_html(self, url: &str, html: &str) -> Self {
        let tag = self.tag;
        self.then(html_result(tag, url, html))
    }

    pub fn then_fail(self, url: &str, error: FetchErrorKind) -> Self {
        let tag = self.tag;
        self.then(failed_result(tag, url, error))
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl FetchStrategy for ScriptedStrategy {
    fn tag(&self) -> StrategyTag {
        self.tag
    }

    async fn fetch(&self, request: &FetchRequest) -> FetchResult {
        self.requests.lock().unwrap().push(request.clone());
        self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
            failed_result(
                self.tag,
                &request.url,
                FetchErrorKind::Network {
                    message: format!("ScriptedStrategy({}): script exhausted", self.tag),
                },
            )
        })
    }
}

// ---------------------------------------------------------------------------
// HangingStrategy
// ---------------------------------------------------------------------------

/// Never returns. Counts calls and how many in-flight fetches were dropped.
pub struct HangingStrategy {
    tag: StrategyTag,
    calls: std::sync::atomic::AtomicUsize,
    dropped: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

impl HangingStrategy {
    pub fn new(tag: StrategyTag) -> Self {
        Self {
            tag,
            calls: Default::default(),
            dropped: Default::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// In-flight fetch futures that were dropped (i.e. torn down by cancellation).
    pub fn dropped(&self) -> usize {
        self.dropped.load(std::sync::atomic::Ordering::SeqCst)
    }
}

struct DropCounter(std::sync::Arc<std::sync::atomic::AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl FetchStrategy for HangingStrategy {
    fn tag(&self) -> StrategyTag {
        self.tag
    }

    async fn fetch(&self, _request: &FetchRequest) -> FetchResult {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let _guard = DropCounter(self.dropped.clone());
        std::future::pending::<FetchResult>().await
    }
}

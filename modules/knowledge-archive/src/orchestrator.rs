// Fetch orchestration: one direct attempt, then escalation to the browser
// strategy with bounded retries, fresh identities and jittered backoff.
//
//   Direct --(blocked | failed)--> Browser --(blocked | failed, retries left)--> Browser ...
//                                         \--(retries exhausted | not retryable)--> Failed
//
// Every delivered document passes the verification detector before it counts
// as a success. Cancellation aborts the in-flight attempt (dropping its future,
// which releases any rendering session) and any pending backoff sleep.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use crate::backoff::{Backoff, JitterBackoff};
use crate::fetch_request::{FetchErrorKind, FetchRequest, FetchResult, StrategyTag};
use crate::fetchers::FetchStrategy;
use crate::identity::{IdentityPool, IdentitySource};
use crate::verification::VerificationDetector;

/// Browser attempts after the first one.
pub const BROWSER_RETRIES: u32 = 2;

#[derive(TypedBuilder)]
pub struct FetchOrchestrator {
    direct: Arc<dyn FetchStrategy>,
    browser: Arc<dyn FetchStrategy>,
    #[builder(default = Arc::new(IdentityPool::default()) as Arc<dyn IdentitySource>)]
    identities: Arc<dyn IdentitySource>,
    #[builder(default = Arc::new(VerificationDetector::default()))]
    detector: Arc<VerificationDetector>,
    #[builder(default = Arc::new(JitterBackoff::default()) as Arc<dyn Backoff>)]
    backoff: Arc<dyn Backoff>,
    #[builder(default = BROWSER_RETRIES)]
    browser_retries: u32,
}

impl FetchOrchestrator {
    /// Acquire a document for `url`. Always terminal: success or a definitive failure.
    pub async fn acquire(&self, url: &str) -> FetchResult {
        self.acquire_with_cancel(url, &CancellationToken::new()).await
    }

    pub async fn acquire_with_cancel(&self, url: &str, cancel: &CancellationToken) -> FetchResult {
        let direct = self.attempt(self.direct.as_ref(), url, cancel).await;
        if direct.is_success() || is_cancelled(&direct) {
            return direct;
        }

        info!(
            url,
            reason = %describe(&direct),
            "Escalating to browser fetch"
        );

        let mut last = direct;
        for attempt in 0..=self.browser_retries {
            if attempt > 0 {
                let retryable = last.error.as_ref().is_some_and(FetchErrorKind::is_retryable);
                if !retryable {
                    info!(url, reason = %describe(&last), "Not retryable, giving up");
                    break;
                }

                let delay = self.backoff.delay(attempt);
                info!(
                    url,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    reason = %describe(&last),
                    "Retrying browser fetch after backoff"
                );
                if !delay.is_zero() {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return cancelled(self.browser.tag(), url);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }

            last = self.attempt(self.browser.as_ref(), url, cancel).await;
            if last.is_success() || is_cancelled(&last) {
                return last;
            }
        }

        warn!(url, reason = %describe(&last), "Fetch failed after all attempts");
        last
    }

    /// One strategy call with a fresh identity, then verification of what came back.
    async fn attempt(
        &self,
        strategy: &dyn FetchStrategy,
        url: &str,
        cancel: &CancellationToken,
    ) -> FetchResult {
        let tag = strategy.tag();
        if cancel.is_cancelled() {
            return cancelled(tag, url);
        }

        let request = FetchRequest::new(url, self.identities.next(), tag);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(url, strategy = %tag, "Fetch cancelled");
                return cancelled(tag, url);
            }
            result = strategy.fetch(&request) => result,
        };

        if !result.is_success() {
            return result;
        }

        let verdict = self
            .detector
            .detect(result.raw_document.as_deref().unwrap_or_default(), url);
        match verdict.matched_signature {
            Some(signature) if verdict.is_blocked => {
                warn!(
                    url,
                    strategy = %tag,
                    platform = %verdict.platform,
                    signature = %signature,
                    "Verification page detected"
                );
                result.into_blocked(signature)
            }
            _ => result,
        }
    }
}

fn cancelled(tag: StrategyTag, url: &str) -> FetchResult {
    FetchResult::failure(tag, url, None, FetchErrorKind::Cancelled)
}

fn is_cancelled(result: &FetchResult) -> bool {
    matches!(result.error, Some(FetchErrorKind::Cancelled))
}

fn describe(result: &FetchResult) -> String {
    match &result.error {
        Some(e) => format!("{} {e}", result.strategy),
        None => format!("{} ok", result.strategy),
    }
}

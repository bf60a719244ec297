pub mod backoff;
pub mod error;
pub mod extractor;
pub mod fetch_request;
pub mod fetchers;
pub mod identity;
pub mod orchestrator;
mod readability;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod verification;

pub use backoff::{Backoff, JitterBackoff, NoDelay};
pub use error::RenderError;
pub use extractor::extract;
pub use fetch_request::{FetchErrorKind, FetchRequest, FetchResult, StrategyTag};
pub use fetchers::browser::{session_pool, BrowserFetchStrategy, RenderedPage, Renderer};
pub use fetchers::browserless::BrowserlessRenderer;
pub use fetchers::chromium::ChromiumRenderer;
pub use fetchers::direct::DirectFetchStrategy;
pub use fetchers::FetchStrategy;
pub use identity::{IdentityPool, IdentitySource};
pub use orchestrator::FetchOrchestrator;
pub use verification::{SignatureRules, VerificationDetector, VerificationVerdict};

pub mod browser;
pub mod browserless;
pub mod chromium;
pub mod direct;

use async_trait::async_trait;

use crate::fetch_request::{FetchRequest, FetchResult, StrategyTag};

/// One way of retrieving a document. Implementations never retry or escalate;
/// every failure is reported in the returned `FetchResult`.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    fn tag(&self) -> StrategyTag;

    async fn fetch(&self, request: &FetchRequest) -> FetchResult;
}

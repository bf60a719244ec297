// Browser fetch: full rendering through a `Renderer` backend.
//
// Rendering sessions are heavy, so a process-wide semaphore bounds how many
// run at once. Each attempt is bounded by one timeout that covers navigation,
// readiness waits and settling.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use knowledge_common::{profile_for, Identity, ReadinessRule};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::error::RenderError;
use crate::fetch_request::{FetchErrorKind, FetchRequest, FetchResult, StrategyTag};
use crate::fetchers::FetchStrategy;

pub const BROWSER_TIMEOUT: Duration = Duration::from_secs(45);
pub const DEFAULT_MAX_SESSIONS: usize = 2;

/// Resource types never loaded while rendering.
pub const BLOCKED_RESOURCE_TYPES: [&str; 3] = ["image", "media", "font"];

#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub html: String,
    pub final_url: Option<String>,
    /// Status of the main document response, when the backend can see it.
    pub status: Option<u16>,
}

/// A rendering backend. One call is one isolated session, released before returning
/// and also when the returned future is dropped.
#[async_trait]
pub trait Renderer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn render(
        &self,
        url: &str,
        identity: &Identity,
        readiness: &ReadinessRule,
    ) -> Result<RenderedPage, RenderError>;
}

static SESSION_POOL: OnceLock<(usize, Arc<Semaphore>)> = OnceLock::new();

/// The process-wide rendering session pool. The first caller sizes it; later
/// callers share it whatever size they ask for.
pub fn session_pool(max_sessions: usize) -> Arc<Semaphore> {
    let wanted = max_sessions.max(1);
    let (size, pool) = SESSION_POOL.get_or_init(|| (wanted, Arc::new(Semaphore::new(wanted))));
    if *size != wanted {
        warn!(requested = max_sessions, size, "Session pool already sized, sharing existing pool");
    }
    pool.clone()
}

pub struct BrowserFetchStrategy {
    renderer: Arc<dyn Renderer>,
    sessions: Arc<Semaphore>,
    timeout: Duration,
}

impl BrowserFetchStrategy {
    /// Strategies built over the same `sessions` pool share one concurrency bound.
    pub fn new(renderer: Arc<dyn Renderer>, sessions: Arc<Semaphore>) -> Self {
        info!(
            renderer = renderer.name(),
            available = sessions.available_permits(),
            "BrowserFetchStrategy initialized"
        );
        Self {
            renderer,
            sessions,
            timeout: BROWSER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl FetchStrategy for BrowserFetchStrategy {
    fn tag(&self) -> StrategyTag {
        StrategyTag::Browser
    }

    async fn fetch(&self, request: &FetchRequest) -> FetchResult {
        let url = request.url.as_str();
        let fetcher = self.renderer.name();

        let Ok(_permit) = self.sessions.acquire().await else {
            return FetchResult::failure(
                StrategyTag::Browser,
                url,
                None,
                FetchErrorKind::Navigation {
                    message: "rendering session pool closed".to_string(),
                },
            );
        };

        let readiness = profile_for(url).readiness;
        info!(url, fetcher, "Rendering page");

        let rendered = tokio::time::timeout(
            self.timeout,
            self.renderer.render(url, &request.identity, &readiness),
        )
        .await;

        let page = match rendered {
            Err(_) => {
                warn!(url, fetcher, timeout_secs = self.timeout.as_secs(), "Rendering timed out");
                return FetchResult::failure(StrategyTag::Browser, url, None, FetchErrorKind::Timeout);
            }
            Ok(Err(e)) => {
                warn!(url, fetcher, error = %e, "Rendering failed");
                return FetchResult::failure(StrategyTag::Browser, url, None, render_error_kind(e));
            }
            Ok(Ok(page)) => page,
        };

        let final_url = page.final_url.unwrap_or_else(|| url.to_string());

        if let Some(status) = page.status.filter(|s| *s >= 400) {
            warn!(url, fetcher, status, "HTTP error");
            return FetchResult::failure(
                StrategyTag::Browser,
                final_url,
                Some(status),
                FetchErrorKind::Http { status },
            );
        }

        if page.html.trim().is_empty() {
            warn!(url, fetcher, "Empty DOM output");
            return FetchResult::failure(
                StrategyTag::Browser,
                final_url,
                page.status,
                FetchErrorKind::Navigation {
                    message: "rendered document was empty".to_string(),
                },
            );
        }

        info!(url, fetcher, bytes = page.html.len(), "Fetched successfully");
        FetchResult::success(StrategyTag::Browser, final_url, page.status, page.html)
    }
}

fn render_error_kind(err: RenderError) -> FetchErrorKind {
    match err {
        RenderError::Timeout => FetchErrorKind::Timeout,
        RenderError::Network(message) => FetchErrorKind::Network { message },
        RenderError::Launch(message)
        | RenderError::Navigation(message)
        | RenderError::Protocol(message) => FetchErrorKind::Navigation { message },
    }
}

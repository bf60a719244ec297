// Local rendering backend: a fresh headless Chromium per attempt.
//
// Every attempt gets its own browser process and throwaway profile dir,
// owned by a `ChromiumSession`. The session is torn down exactly once:
// by `close()` on the normal path, or from `Drop` when the render future
// errors out or is dropped by cancellation.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    EnableParams as FetchEnableParams, EventRequestPaused, FailRequestParams, RequestPattern,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ErrorReason, EventRequestWillBeSent, EventResponseReceived, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::handler::viewport::Viewport as CdpViewport;
use chromiumoxide::Page;
use futures::{FutureExt, StreamExt};
use knowledge_common::{Identity, ReadinessRule, WaitUntil};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::RenderError;
use crate::fetchers::browser::{RenderedPage, Renderer};

const LAUNCH_ARGS: [&str; 8] = [
    "--no-sandbox",
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-extensions",
    "--disable-background-networking",
    "--no-first-run",
];

/// No new request for this long counts as network quiescence.
const QUIET_WINDOW: Duration = Duration::from_millis(500);
const SELECTOR_POLL: Duration = Duration::from_millis(250);
const CLOSE_GRACE: Duration = Duration::from_secs(5);

pub struct ChromiumRenderer {
    executable: String,
}

impl ChromiumRenderer {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    fn name(&self) -> &'static str {
        "chromium"
    }

    async fn render(
        &self,
        url: &str,
        identity: &Identity,
        readiness: &ReadinessRule,
    ) -> Result<RenderedPage, RenderError> {
        let parsed = url::Url::parse(url).map_err(|e| RenderError::Navigation(e.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(RenderError::Navigation(format!(
                "Only http/https URLs allowed, got: {}",
                parsed.scheme()
            )));
        }

        let mut session = ChromiumSession::launch(&self.executable, identity).await?;
        let outcome = session.render(url, identity, readiness).await;
        session.close().await;
        outcome
    }
}

/// One browser process with its event-handler task, helper tasks and profile dir.
pub struct ChromiumSession {
    parts: Option<SessionParts>,
    runtime: tokio::runtime::Handle,
}

struct SessionParts {
    browser: Browser,
    handler: JoinHandle<()>,
    tasks: Vec<JoinHandle<()>>,
    profile_dir: TempDir,
}

impl ChromiumSession {
    pub async fn launch(executable: &str, identity: &Identity) -> Result<Self, RenderError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RenderError::Launch(format!("no tokio runtime: {e}")))?;
        let profile_dir = tempfile::tempdir()
            .map_err(|e| RenderError::Launch(format!("failed to create temp profile dir: {e}")))?;

        let config = BrowserConfig::builder()
            .chrome_executable(executable)
            .user_data_dir(profile_dir.path())
            .viewport(Some(CdpViewport {
                width: identity.viewport.width,
                height: identity.viewport.height,
                device_scale_factor: Some(identity.viewport.device_scale_factor),
                ..Default::default()
            }))
            .args(LAUNCH_ARGS)
            .build()
            .map_err(RenderError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))?;
        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });

        debug!(executable, profile = %profile_dir.path().display(), "Chromium session started");

        Ok(Self {
            parts: Some(SessionParts {
                browser,
                handler,
                tasks: Vec::new(),
                profile_dir,
            }),
            runtime,
        })
    }

    async fn render(
        &mut self,
        url: &str,
        identity: &Identity,
        readiness: &ReadinessRule,
    ) -> Result<RenderedPage, RenderError> {
        let parts = self
            .parts
            .as_mut()
            .ok_or_else(|| RenderError::Launch("session already closed".to_string()))?;

        let page = parts.browser.new_page("about:blank").await?;

        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(stealth_script(
            &identity.accept_language,
        )))
        .await?;
        let user_agent = SetUserAgentOverrideParams::builder()
            .user_agent(identity.user_agent.clone())
            .accept_language(identity.accept_language.clone())
            .build()
            .map_err(RenderError::Protocol)?;
        page.execute(user_agent).await?;

        parts.tasks.push(block_heavy_resources(&page).await?);

        let mut responses = page.event_listener::<EventResponseReceived>().await?;
        let mut requests = page.event_listener::<EventRequestWillBeSent>().await?;

        page.goto(url).await.map_err(|e| match e {
            CdpError::Timeout => RenderError::Timeout,
            other => RenderError::Navigation(other.to_string()),
        })?;

        if readiness.wait_until == WaitUntil::NetworkIdle {
            let deadline = Instant::now() + readiness.selector_timeout;
            loop {
                match tokio::time::timeout(QUIET_WINDOW, requests.next()).await {
                    Err(_) | Ok(None) => break,
                    Ok(Some(_)) if Instant::now() >= deadline => {
                        debug!(url, "Network never went quiet, proceeding");
                        break;
                    }
                    Ok(Some(_)) => {}
                }
            }
        }

        wait_for_any_selector(&page, url, readiness).await;
        tokio::time::sleep(readiness.settle).await;

        let mut status = None;
        while let Some(Some(event)) = responses.next().now_or_never() {
            if event.r#type == ResourceType::Document {
                status = u16::try_from(event.response.status).ok();
                break;
            }
        }

        let html = page.content().await?;
        let final_url = page.url().await?;

        Ok(RenderedPage {
            html,
            final_url,
            status,
        })
    }

    /// Tear the session down now. Idempotent; later drops do nothing.
    pub async fn close(&mut self) {
        if let Some(parts) = self.parts.take() {
            parts.teardown().await;
        }
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if let Some(parts) = self.parts.take() {
            debug!("Chromium session dropped before close, tearing down in background");
            self.runtime.spawn(parts.teardown());
        }
    }
}

impl SessionParts {
    async fn teardown(self) {
        let SessionParts {
            mut browser,
            handler,
            tasks,
            profile_dir,
        } = self;

        for task in tasks {
            task.abort();
        }

        match tokio::time::timeout(CLOSE_GRACE, browser.close()).await {
            Ok(Ok(_)) => {
                if let Err(e) = browser.wait().await {
                    debug!(error = %e, "Waiting for chromium exit failed");
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Chromium close failed, killing process");
                let _ = browser.kill().await;
            }
            Err(_) => {
                warn!("Chromium close timed out, killing process");
                let _ = browser.kill().await;
            }
        }

        handler.abort();
        drop(profile_dir);
        debug!("Chromium session torn down");
    }
}

/// Fail every image, media and font request before it leaves the browser.
async fn block_heavy_resources(page: &Page) -> Result<JoinHandle<()>, RenderError> {
    let mut paused = page.event_listener::<EventRequestPaused>().await?;

    let patterns = [ResourceType::Image, ResourceType::Media, ResourceType::Font]
        .into_iter()
        .map(|resource_type| RequestPattern::builder().resource_type(resource_type).build())
        .collect::<Vec<_>>();
    page.execute(FetchEnableParams::builder().patterns(patterns).build())
        .await?;

    let page = page.clone();
    Ok(tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let fail = FailRequestParams::new(event.request_id.clone(), ErrorReason::BlockedByClient);
            if let Err(e) = page.execute(fail).await {
                debug!(error = %e, "Failed to abort paused request");
            }
        }
    }))
}

/// Poll the readiness selectors until one appears or the selector timeout passes.
/// Never fails: a missing selector only means rendering proceeds as-is.
async fn wait_for_any_selector(page: &Page, url: &str, readiness: &ReadinessRule) {
    if readiness.selectors.is_empty() {
        return;
    }
    let deadline = Instant::now() + readiness.selector_timeout;
    loop {
        for selector in readiness.selectors {
            if page.find_element(*selector).await.is_ok() {
                debug!(url, selector, "Readiness selector found");
                return;
            }
        }
        if Instant::now() >= deadline {
            info!(url, "Readiness selectors never appeared, proceeding");
            return;
        }
        tokio::time::sleep(SELECTOR_POLL).await;
    }
}

/// Script injected before any page script runs, hiding the usual automation tells.
pub fn stealth_script(accept_language: &str) -> String {
    let languages = accept_language
        .split(',')
        .filter_map(|part| part.split(';').next())
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .map(|lang| format!("'{}'", lang.replace('\'', "")))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"
        Object.defineProperty(navigator, 'webdriver', {{ get: () => undefined }});
        Object.defineProperty(navigator, 'plugins', {{ get: () => [1, 2, 3, 4, 5] }});
        Object.defineProperty(navigator, 'languages', {{ get: () => [{languages}] }});
        window.chrome = {{ runtime: {{}}, loadTimes: () => {{}} }};
        const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
        if (originalQuery) {{
            window.navigator.permissions.query = (parameters) =>
                parameters.name === 'notifications'
                    ? Promise.resolve({{ state: Notification.permission }})
                    : originalQuery(parameters);
        }}
        "#
    )
}

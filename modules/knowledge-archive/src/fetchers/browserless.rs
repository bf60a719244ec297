// Remote rendering backend: one Browserless `/content` call per attempt.
// The remote session lives exactly as long as the HTTP request, so dropping
// the request future releases it.

use std::time::Duration;

use async_trait::async_trait;
use browserless_client::{
    BrowserlessClient, ContentRequest, GotoOptions, Viewport as RemoteViewport, WaitForSelector,
};
use knowledge_common::{Identity, ReadinessRule};
use tracing::info;

use crate::error::RenderError;
use crate::fetchers::browser::{RenderedPage, Renderer, BLOCKED_RESOURCE_TYPES, BROWSER_TIMEOUT};

pub struct BrowserlessRenderer {
    client: BrowserlessClient,
    navigation_timeout: Duration,
}

impl BrowserlessRenderer {
    pub fn new(base_url: &str, token: Option<&str>) -> anyhow::Result<Self> {
        info!(base_url, "BrowserlessRenderer initialized");
        Ok(Self {
            client: BrowserlessClient::new(base_url, token, BROWSER_TIMEOUT)?,
            navigation_timeout: BROWSER_TIMEOUT,
        })
    }

    pub fn content_request(
        &self,
        url: &str,
        identity: &Identity,
        readiness: &ReadinessRule,
    ) -> ContentRequest {
        let wait_for_selector = (!readiness.selectors.is_empty()).then(|| WaitForSelector {
            // A selector list matches as soon as any member does.
            selector: readiness.selectors.join(", "),
            timeout: readiness.selector_timeout.as_millis() as u64,
            visible: false,
        });

        ContentRequest {
            url: url.to_string(),
            user_agent: Some(identity.user_agent.clone()),
            viewport: Some(RemoteViewport {
                width: identity.viewport.width,
                height: identity.viewport.height,
                device_scale_factor: identity.viewport.device_scale_factor,
            }),
            reject_resource_types: BLOCKED_RESOURCE_TYPES.iter().map(|t| t.to_string()).collect(),
            goto_options: Some(GotoOptions {
                wait_until: readiness.wait_until.as_puppeteer().to_string(),
                timeout: self.navigation_timeout.as_millis() as u64,
            }),
            wait_for_selector,
            wait_for_timeout: (!readiness.settle.is_zero())
                .then(|| readiness.settle.as_millis() as u64),
            best_attempt: Some(true),
        }
    }
}

#[async_trait]
impl Renderer for BrowserlessRenderer {
    fn name(&self) -> &'static str {
        "browserless"
    }

    async fn render(
        &self,
        url: &str,
        identity: &Identity,
        readiness: &ReadinessRule,
    ) -> Result<RenderedPage, RenderError> {
        let request = self.content_request(url, identity, readiness);
        let content = self.client.content(&request).await?;
        Ok(RenderedPage {
            html: content.html,
            final_url: content.final_url,
            status: content.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use knowledge_common::platform::{GENERIC, WECHAT};
    use knowledge_common::Viewport;

    use super::*;

    fn identity() -> Identity {
        Identity {
            user_agent: "TestAgent/1.0".into(),
            viewport: Viewport {
                width: 1440,
                height: 900,
                device_scale_factor: 2.0,
            },
            accept_language: "en-US".into(),
        }
    }

    #[test]
    fn wechat_request_waits_for_content_selectors() {
        let renderer = BrowserlessRenderer::new("http://browserless:3000", None).unwrap();
        let request = renderer.content_request(
            "https://mp.weixin.qq.com/s/abc",
            &identity(),
            &WECHAT.readiness,
        );
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["userAgent"], "TestAgent/1.0");
        assert_eq!(json["viewport"]["deviceScaleFactor"], 2.0);
        assert_eq!(json["gotoOptions"]["waitUntil"], "networkidle2");
        assert_eq!(
            json["waitForSelector"]["selector"],
            ".rich_media_content, #js_content, .article-content"
        );
        assert_eq!(json["waitForSelector"]["timeout"], 10_000);
        assert_eq!(json["waitForTimeout"], 3_000);
        assert_eq!(json["bestAttempt"], true);
        assert_eq!(
            json["rejectResourceTypes"],
            serde_json::json!(["image", "media", "font"])
        );
    }

    #[test]
    fn generic_request_has_no_selector_wait() {
        let renderer = BrowserlessRenderer::new("http://browserless:3000", Some("t")).unwrap();
        let request = renderer.content_request("https://example.com", &identity(), &GENERIC.readiness);
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("waitForSelector").is_none());
        assert_eq!(json["gotoOptions"]["waitUntil"], "domcontentloaded");
    }
}

pub mod error;

pub use error::{BrowserlessError, Result};

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

/// Body of a Browserless `/content` request. Unset fields are omitted so the
/// service applies its own defaults.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRequest {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reject_resource_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goto_options: Option<GotoOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_for_selector: Option<WaitForSelector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_for_timeout: Option<u64>,
    /// Return whatever rendered so far when a wait condition fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_attempt: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GotoOptions {
    /// "load", "domcontentloaded", "networkidle0" or "networkidle2".
    pub wait_until: String,
    /// Navigation timeout in milliseconds.
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WaitForSelector {
    pub selector: String,
    /// Milliseconds.
    pub timeout: u64,
    pub visible: bool,
}

/// Rendered page as returned by `/content`.
#[derive(Debug, Clone)]
pub struct RenderedContent {
    pub html: String,
    /// Status of the navigated document, when the service reports it.
    pub status: Option<u16>,
    /// URL after redirects, when the service reports it.
    pub final_url: Option<String>,
}

pub struct BrowserlessClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserlessClient {
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    /// `/content` with the service's stealth launch mode always on.
    fn endpoint(&self) -> String {
        match self.token {
            Some(ref token) => format!("{}/content?token={token}&stealth=true", self.base_url),
            None => format!("{}/content?stealth=true", self.base_url),
        }
    }

    /// Fetch fully-rendered HTML content for a URL via Browserless /content endpoint.
    pub async fn content(&self, request: &ContentRequest) -> Result<RenderedContent> {
        debug!(url = %request.url, "Browserless content request");

        let resp = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserlessError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let header = |name: &str| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let page_status = header("x-response-code").and_then(|v| v.parse().ok());
        let final_url = header("x-response-url");

        Ok(RenderedContent {
            html: resp.text().await?,
            status: page_status,
            final_url,
        })
    }
}

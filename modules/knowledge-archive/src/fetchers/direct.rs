// Direct fetch: one plain HTTP GET with browser-like headers. No rendering.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, USER_AGENT};
use tracing::{info, warn};

use crate::fetch_request::{FetchErrorKind, FetchRequest, FetchResult, StrategyTag};
use crate::fetchers::FetchStrategy;

pub const DIRECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const MAX_REDIRECTS: usize = 5;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

pub struct DirectFetchStrategy {
    client: reqwest::Client,
}

impl DirectFetchStrategy {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_timeout(DIRECT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FetchStrategy for DirectFetchStrategy {
    fn tag(&self) -> StrategyTag {
        StrategyTag::Direct
    }

    async fn fetch(&self, request: &FetchRequest) -> FetchResult {
        let url = request.url.as_str();
        let identity = &request.identity;

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &identity.user_agent)
            .header(ACCEPT, ACCEPT_HTML)
            .header(ACCEPT_LANGUAGE, &identity.accept_language)
            .header(CACHE_CONTROL, "max-age=0")
            .header("Upgrade-Insecure-Requests", "1")
            .header("Sec-Fetch-Dest", "document")
            .header("Sec-Fetch-Mode", "navigate")
            .header("Sec-Fetch-Site", "none")
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(url, fetcher = "direct", error = %e, "Request failed");
                return FetchResult::failure(StrategyTag::Direct, url, None, classify(&e));
            }
        };

        let status = response.status().as_u16();
        let final_url = response.url().to_string();

        if response.status().is_client_error() || response.status().is_server_error() {
            warn!(url, fetcher = "direct", status, "HTTP error");
            return FetchResult::failure(
                StrategyTag::Direct,
                final_url,
                Some(status),
                FetchErrorKind::Http { status },
            );
        }

        match response.text().await {
            Ok(body) => {
                info!(url, fetcher = "direct", status, bytes = body.len(), "Fetched successfully");
                FetchResult::success(StrategyTag::Direct, final_url, Some(status), body)
            }
            Err(e) => {
                warn!(url, fetcher = "direct", error = %e, "Failed to read body");
                FetchResult::failure(StrategyTag::Direct, final_url, Some(status), classify(&e))
            }
        }
    }
}

/// Connection and timeout failures are both reported as timeouts; everything
/// else on the transport is a network error.
fn classify(err: &reqwest::Error) -> FetchErrorKind {
    if err.is_timeout() || err.is_connect() {
        FetchErrorKind::Timeout
    } else {
        FetchErrorKind::Network {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use knowledge_common::{Identity, Viewport};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    fn identity() -> Identity {
        Identity {
            user_agent: "TestAgent/1.0".into(),
            viewport: Viewport {
                width: 1280,
                height: 800,
                device_scale_factor: 1.0,
            },
            accept_language: "en-US".into(),
        }
    }

    /// Serve one canned response and hand back the raw request text.
    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });
        (format!("http://{addr}/article"), handle)
    }

    #[tokio::test]
    async fn success_returns_body_and_sends_identity_headers() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 20\r\nConnection: close\r\n\r\n<p>hello world!</p>\n",
        )
        .await;

        let strategy = DirectFetchStrategy::new().unwrap();
        let result = strategy
            .fetch(&FetchRequest::new(&url, identity(), StrategyTag::Direct))
            .await;

        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.http_status, Some(200));
        assert!(result.raw_document.unwrap().contains("hello world"));

        let request = server.await.unwrap().to_lowercase();
        assert!(request.contains("user-agent: testagent/1.0"));
        assert!(request.contains("accept-language: en-us"));
    }

    #[tokio::test]
    async fn not_found_maps_to_http_error() {
        let (url, _server) = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let result = DirectFetchStrategy::new()
            .unwrap()
            .fetch(&FetchRequest::new(&url, identity(), StrategyTag::Direct))
            .await;

        assert_eq!(result.error, Some(FetchErrorKind::Http { status: 404 }));
        assert_eq!(result.http_status, Some(404));
        assert!(result.raw_document.is_none());
    }

    #[tokio::test]
    async fn refused_connection_maps_to_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = DirectFetchStrategy::new()
            .unwrap()
            .fetch(&FetchRequest::new(
                format!("http://{addr}/"),
                identity(),
                StrategyTag::Direct,
            ))
            .await;

        assert_eq!(result.error, Some(FetchErrorKind::Timeout));
    }
}

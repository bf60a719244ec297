/// Failure of one rendering session. Mapped onto a `FetchErrorKind` by the browser strategy.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Failed to start rendering session: {0}")]
    Launch(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Rendering timed out")]
    Timeout,

    #[error("Browser protocol error: {0}")]
    Protocol(String),

    #[error("Rendering service unreachable: {0}")]
    Network(String),
}

impl From<browserless_client::BrowserlessError> for RenderError {
    fn from(err: browserless_client::BrowserlessError) -> Self {
        use browserless_client::BrowserlessError;
        match err {
            BrowserlessError::Timeout => RenderError::Timeout,
            BrowserlessError::Network(e) => RenderError::Network(e),
            BrowserlessError::Api { status, message } => {
                RenderError::Navigation(format!("browserless returned {status}: {message}"))
            }
        }
    }
}

impl From<chromiumoxide::error::CdpError> for RenderError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        match err {
            chromiumoxide::error::CdpError::Timeout => RenderError::Timeout,
            other => RenderError::Protocol(other.to_string()),
        }
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserlessError>;

#[derive(Debug, Error)]
pub enum BrowserlessError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

impl From<reqwest::Error> for BrowserlessError {
    // Connect failures count as timeouts: the service never answered.
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            BrowserlessError::Timeout
        } else {
            BrowserlessError::Network(err.to_string())
        }
    }
}

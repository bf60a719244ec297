use thiserror::Error;

use crate::platform::Platform;

/// Terminal failure of one ingest run. Every variant maps onto one `ErrorKind`.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error (status {status})")]
    Http { status: u16 },

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Blocked by a verification page on {platform} (matched {signature:?})")]
    VerificationBlocked {
        platform: Platform,
        signature: String,
        remediation: String,
    },

    #[error("Model error: {0}")]
    Model(String),

    #[error("Could not parse model response: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cancelled before completion")]
    Cancelled,
}

/// Payload-free discriminant of `IngestError`, for callers that only branch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    NetworkError,
    HttpError,
    NavigationFailure,
    VerificationBlocked,
    ModelError,
    ParseError,
    ValidationError,
    StorageError,
    Cancelled,
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Timeout(_) => ErrorKind::Timeout,
            IngestError::Network(_) => ErrorKind::NetworkError,
            IngestError::Http { .. } => ErrorKind::HttpError,
            IngestError::Navigation(_) => ErrorKind::NavigationFailure,
            IngestError::VerificationBlocked { .. } => ErrorKind::VerificationBlocked,
            IngestError::Model(_) => ErrorKind::ModelError,
            IngestError::Parse(_) => ErrorKind::ParseError,
            IngestError::Validation(_) => ErrorKind::ValidationError,
            IngestError::Storage(_) => ErrorKind::StorageError,
            IngestError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// User-facing remediation text, present only for verification blocks.
    pub fn remediation(&self) -> Option<&str> {
        match self {
            IngestError::VerificationBlocked { remediation, .. } => Some(remediation),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(IngestError::Http { status: 404 }.kind(), ErrorKind::HttpError);
        assert_eq!(IngestError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            IngestError::Validation("too short".into()).kind(),
            ErrorKind::ValidationError
        );
    }

    #[test]
    fn only_verification_blocks_carry_remediation() {
        let blocked = IngestError::VerificationBlocked {
            platform: Platform::Zhihu,
            signature: "captcha".into(),
            remediation: "submit manually".into(),
        };
        assert_eq!(blocked.remediation(), Some("submit manually"));
        assert!(IngestError::Timeout("45s".into()).remediation().is_none());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::VerificationBlocked).unwrap();
        assert_eq!(json, "\"verification_blocked\"");
    }
}

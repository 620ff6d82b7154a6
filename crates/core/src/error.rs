//! Error types shared by the marking core.

use thiserror::Error;

/// Errors raised by the marking core and its collaborators.
#[derive(Debug, Error)]
pub enum MarkingError {
    /// Transport-level failure talking to a collaborator
    #[error("network error: {0}")]
    Network(String),

    /// Collaborator answered with a non-success status
    #[error("server returned {status}: {message}")]
    Http { status: u16, message: String },

    /// Page element has not been rendered yet
    #[error("page {0} is not rendered yet")]
    NotReady(u32),

    /// Percentage geometry outside the 0..=100 page box
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// Payload that does not match the wire format
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for MarkingError {
    fn from(err: serde_json::Error) -> Self {
        MarkingError::Serialization(err.to_string())
    }
}

impl MarkingError {
    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            MarkingError::Network(_) | MarkingError::NotReady(_) => true,
            MarkingError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Result type for marking operations
pub type Result<T> = std::result::Result<T, MarkingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(MarkingError::Network("reset".into()).is_transient());
        assert!(MarkingError::NotReady(2).is_transient());
        assert!(MarkingError::Http { status: 503, message: String::new() }.is_transient());
        assert!(!MarkingError::Http { status: 404, message: String::new() }.is_transient());
        assert!(!MarkingError::Validation("too short".into()).is_transient());
        assert!(!MarkingError::Serialization("missing field `page`".into()).is_transient());
    }

    #[test]
    fn test_json_errors_convert() {
        let err: MarkingError = serde_json::from_str::<u32>("\"x\"").unwrap_err().into();
        assert!(matches!(err, MarkingError::Serialization(_)));
    }

    #[test]
    fn test_display_includes_status() {
        let err = MarkingError::Http { status: 403, message: "forbidden".into() };
        assert_eq!(err.to_string(), "server returned 403: forbidden");
    }
}

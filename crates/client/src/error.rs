use marking_core::MarkingError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),
    #[error("server returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("no API base URL configured")]
    MissingBaseUrl,
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Map a ureq failure. Status errors keep the server's message body.
    pub(crate) fn from_ureq(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, resp) => {
                let message = resp.into_string().unwrap_or_default();
                ClientError::from_status(status, &message)
            }
            ureq::Error::Transport(t) => ClientError::Network(t.to_string()),
        }
    }

    pub(crate) fn from_status(status: u16, body: &str) -> Self {
        // API errors are `{"error": "..."}`; anything else is passed through.
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or_else(|| body.trim().to_string());
        ClientError::Http { status, message }
    }
}

impl From<ClientError> for MarkingError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Network(msg) => MarkingError::Network(msg),
            ClientError::Http { status: 404, message } => MarkingError::NotFound(message),
            ClientError::Http { status: 400 | 422, message } => MarkingError::Validation(message),
            ClientError::Http { status, message } => MarkingError::Http { status, message },
            ClientError::InvalidResponse(msg) => MarkingError::Serialization(msg),
            missing @ ClientError::MissingBaseUrl => MarkingError::Validation(missing.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_error_body_is_unwrapped() {
        let err = ClientError::from_status(422, r#"{"error":"mark not offered"}"#);
        assert_eq!(err.to_string(), "server returned 422: mark not offered");
    }

    #[test]
    fn plain_error_body_is_kept() {
        let err = ClientError::from_status(502, "bad gateway\n");
        assert!(matches!(err, ClientError::Http { status: 502, ref message } if message == "bad gateway"));
    }

    #[test]
    fn maps_onto_marking_errors() {
        let not_found: MarkingError = ClientError::from_status(404, "gone").into();
        assert!(matches!(not_found, MarkingError::NotFound(_)));

        let invalid: MarkingError = ClientError::from_status(400, "too short").into();
        assert!(matches!(invalid, MarkingError::Validation(_)));

        let server: MarkingError = ClientError::from_status(503, "").into();
        assert!(server.is_transient());

        let network: MarkingError = ClientError::Network("reset".into()).into();
        assert!(network.is_transient());

        let malformed: MarkingError = ClientError::InvalidResponse("expected value".into()).into();
        assert!(matches!(malformed, MarkingError::Serialization(_)));
        assert!(!malformed.is_transient());
    }
}

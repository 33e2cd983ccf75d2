//! Error types for the transport and stream decoder.

use thiserror::Error;

/// Message used when a failed request carries no usable detail.
pub const GENERIC_FAILURE: &str = "Network response was not ok";

/// A result type using `ClientError`.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors raised while talking to the assistant service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The request failed, returned a non-2xx status, or its body could not be read.
    ///
    /// `detail` is the server-supplied description when there is one.
    #[error("{detail}")]
    Request {
        /// HTTP status, if a response was received.
        status: Option<u16>,
        /// Human-readable description.
        detail: String,
    },

    /// A record of the response stream was not valid JSON of the expected shape.
    #[error("malformed stream record: {reason}")]
    Decode {
        /// The offending line, lossily decoded.
        line: String,
        /// Parser message.
        reason: String,
    },

    /// The client could not be constructed from its configuration.
    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// A request failure with the given status and optional server detail.
    #[must_use]
    pub fn request(status: Option<u16>, detail: Option<String>) -> Self {
        Self::Request {
            status,
            detail: detail.unwrap_or_else(|| GENERIC_FAILURE.to_string()),
        }
    }

    /// Text suitable for showing to the user.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Request { detail, .. } => detail.clone(),
            other => other.to_string(),
        }
    }

    /// HTTP status of the failed response, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Request { status, .. } => *status,
            Self::Decode { .. } | Self::Config(_) => None,
        }
    }

    /// Whether this is a request failure.
    #[must_use]
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request { .. })
    }

    /// Whether this is a stream decoding failure.
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        tracing::debug!(error = %err, "HTTP request failed");
        Self::request(err.status().map(|s| s.as_u16()), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_without_detail_uses_generic_text() {
        let err = ClientError::request(Some(500), None);
        assert_eq!(err.to_string(), GENERIC_FAILURE);
        assert_eq!(err.status(), Some(500));
        assert!(err.is_request());
    }

    #[test]
    fn request_detail_is_displayed_verbatim() {
        let err = ClientError::request(Some(429), Some("quota exceeded".into()));
        assert_eq!(err.to_string(), "quota exceeded");
        assert_eq!(err.detail(), "quota exceeded");
    }

    #[test]
    fn decode_error_display() {
        let err = ClientError::Decode {
            line: "{oops".into(),
            reason: "key must be a string".into(),
        };
        assert!(err.is_decode());
        assert_eq!(err.status(), None);
        assert_eq!(err.to_string(), "malformed stream record: key must be a string");
    }
}

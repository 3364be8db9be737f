//! Unified error system for the Postern runtime.
//!
//! A single error type crosses every crate boundary so callers receive one
//! terminal error per logical request. Variants carry cloneable payloads:
//! single-flight followers all observe the same failure value.

use serde::{Deserialize, Serialize};

/// Machine code returned when the server demands a device assertion.
pub const CODE_REQUIRES_ASSERTION: &str = "requires_assertion";
/// Machine code returned when the server demands device attestation.
pub const CODE_REQUIRES_DEVICE_ATTESTATION: &str = "requires_device_attestation";
/// Machine code returned when the client state is no longer authenticated.
pub const CODE_AUTHENTICATION_INVALID: &str = "authentication_invalid";
/// Machine code returned when a referenced resource does not exist.
pub const CODE_RESOURCE_NOT_FOUND: &str = "resource_not_found";

/// Classification of a transport-level failure (no response received).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportErrorKind {
    /// The request or response timed out.
    Timeout,
    /// The connection could not be established.
    Connect,
    /// Name resolution failed.
    Dns,
    /// The connection was reset mid-flight.
    Reset,
    /// Any other transport failure.
    Other,
}

impl TransportErrorKind {
    /// Whether this kind of failure is worth retrying.
    ///
    /// Mirrors the URL-error-code allowlist: transient network conditions
    /// retry, everything else propagates.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            TransportErrorKind::Timeout
                | TransportErrorKind::Connect
                | TransportErrorKind::Dns
                | TransportErrorKind::Reset
        )
    }
}

/// Structured error decoded from a non-2xx response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("API error {code} (status {status}): {message}")]
pub struct ApiError {
    /// Machine-readable error code.
    pub code: String,
    /// Short human-readable message.
    pub message: String,
    /// Longer explanation, when the server supplies one.
    pub long_message: Option<String>,
    /// Server-side trace identifier for support correlation.
    pub trace_id: Option<String>,
    /// HTTP status the error arrived with.
    pub status: u16,
}

/// Unified error type for all Postern operations.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum Error {
    /// No response was received from the server.
    #[error("Transport error ({kind:?}): {message}")]
    Transport {
        /// Description of the underlying failure.
        message: String,
        /// Classification used by the retry policy.
        kind: TransportErrorKind,
    },

    /// The server answered with a decodable structured error body.
    #[error(transparent)]
    Api(ApiError),

    /// Non-2xx response with no decodable structured error body.
    #[error("Unexpected response with status {status}")]
    UnexpectedResponse {
        /// HTTP status of the response.
        status: u16,
    },

    /// A 2xx response body did not match the expected shape.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of the mismatch.
        message: String,
    },

    /// The key-value store failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// Invalid configuration.
    #[error("Config error: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },

    /// A platform device-trust ceremony failed.
    #[error("Device trust error: {message}")]
    DeviceTrust {
        /// Description of the ceremony failure.
        message: String,
    },
}

impl Error {
    /// Create a transport error.
    pub fn transport(message: impl Into<String>, kind: TransportErrorKind) -> Self {
        Self::Transport {
            message: message.into(),
            kind,
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a device-trust error.
    pub fn device_trust(message: impl Into<String>) -> Self {
        Self::DeviceTrust {
            message: message.into(),
        }
    }

    /// The structured API error code, when this is an API error.
    pub fn api_code(&self) -> Option<&str> {
        match self {
            Self::Api(err) => Some(err.code.as_str()),
            _ => None,
        }
    }

    /// The HTTP status associated with this error, when one exists.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api(err) => Some(err.status),
            Self::UnexpectedResponse { status } => Some(*status),
            _ => None,
        }
    }
}

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Self {
        Self::Api(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::decode(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err.to_string())
    }
}

/// Standard Result type for Postern operations.
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP statuses the default retry policy treats as transient.
pub const RETRYABLE_STATUSES: [u16; 7] = [408, 425, 429, 500, 502, 503, 504];

/// Whether an HTTP status is in the transient allowlist.
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_code_surfaces_only_for_api_errors() {
        let err = Error::Api(ApiError {
            code: CODE_AUTHENTICATION_INVALID.into(),
            message: "session lost".into(),
            long_message: None,
            trace_id: Some("trace-1".into()),
            status: 401,
        });
        assert_eq!(err.api_code(), Some(CODE_AUTHENTICATION_INVALID));
        assert_eq!(err.status(), Some(401));

        let err = Error::decode("bad body");
        assert_eq!(err.api_code(), None);
        assert_eq!(err.status(), None);
    }

    #[test]
    fn retryable_status_allowlist() {
        for status in RETRYABLE_STATUSES {
            assert!(is_retryable_status(status));
        }
        assert!(!is_retryable_status(200));
        assert!(!is_retryable_status(401));
        assert!(!is_retryable_status(404));
    }

    #[test]
    fn transport_kind_retryability() {
        assert!(TransportErrorKind::Timeout.is_retryable());
        assert!(TransportErrorKind::Reset.is_retryable());
        assert!(!TransportErrorKind::Other.is_retryable());
    }
}

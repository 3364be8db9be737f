//! Received response and structured-error decoding.

use indexmap::IndexMap;
use postern_core::{ApiError, Error, ResponseMeta, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// One network round trip's worth of response data.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers; keys are stored as received.
    pub headers: IndexMap<String, String>,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Retry-relevant metadata for the pure retry policy.
    pub fn meta(&self) -> ResponseMeta {
        ResponseMeta {
            status: self.status,
            retry_after: self.header("retry-after").map(str::to_string),
            rate_limit_reset: self.header("x-ratelimit-reset").map(str::to_string),
        }
    }

    /// Decode the body into the expected result type.
    ///
    /// A 2xx body that does not match the declared shape is a decode error
    /// and is never retried.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|err| Error::decode(err.to_string()))
    }

    /// Decode a structured API error from a non-2xx body.
    ///
    /// Returns the structured error when the body matches the error schema,
    /// or the generic unexpected-response fallback otherwise.
    pub fn decode_error(&self) -> Error {
        match serde_json::from_slice::<ErrorBody>(&self.body) {
            Ok(body) => match body.errors.into_iter().next() {
                Some(entry) => Error::Api(ApiError {
                    code: entry.code,
                    message: entry.message,
                    long_message: entry.long_message,
                    trace_id: body.trace_id,
                    status: self.status,
                }),
                None => Error::UnexpectedResponse {
                    status: self.status,
                },
            },
            Err(_) => Error::UnexpectedResponse {
                status: self.status,
            },
        }
    }
}

/// Wire schema of a structured error body.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    errors: Vec<ErrorEntry>,
    #[serde(default)]
    trace_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    code: String,
    message: String,
    #[serde(default)]
    long_message: Option<String>,
}

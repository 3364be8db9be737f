//! Built-in response validators.

use crate::middleware::{PipelineContext, ResponseValidator};
use crate::response::TransportResponse;
use async_trait::async_trait;
use postern_core::{keys, KeyValueStore, Result};
use std::sync::Arc;
use tracing::debug;

/// Persists a rotated device token from the `Authorization` response header.
///
/// The write happens on a detached task so the response is never delayed by
/// storage latency; a lost write only costs one extra rotation round trip.
pub struct DeviceTokenValidator {
    store: Arc<dyn KeyValueStore>,
}

impl DeviceTokenValidator {
    /// Create a validator writing to the given store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ResponseValidator for DeviceTokenValidator {
    fn name(&self) -> &'static str {
        "device_token"
    }

    async fn validate(&self, response: &TransportResponse, ctx: &PipelineContext) -> Result<()> {
        if let Some(token) = response.header("authorization") {
            let store = Arc::clone(&self.store);
            let token = token.to_string();
            let request_id = ctx.request_id;
            tokio::spawn(async move {
                if let Err(err) = store.set(keys::DEVICE_TOKEN, token.into_bytes()).await {
                    debug!(%request_id, error = %err, "failed to persist rotated device token");
                }
            });
        }
        Ok(())
    }
}

/// Raises the structured API error (or the unexpected-response fallback)
/// for non-2xx responses.
///
/// Registered last among validators so side-effecting validators still see
/// the response before the attempt aborts.
pub struct ErrorDecodeValidator;

#[async_trait]
impl ResponseValidator for ErrorDecodeValidator {
    fn name(&self) -> &'static str {
        "error_decode"
    }

    async fn validate(&self, response: &TransportResponse, ctx: &PipelineContext) -> Result<()> {
        if response.is_success() {
            return Ok(());
        }
        let error = response.decode_error();
        debug!(
            request_id = %ctx.request_id,
            attempt = ctx.attempt,
            status = response.status,
            code = error.api_code().unwrap_or("<none>"),
            "request failed with error response"
        );
        Err(error)
    }
}

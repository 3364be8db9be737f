//! Session-aware middleware registered into the request pipeline.

use crate::client_sync::{ClientSync, CLIENT_PATH};
use crate::device_trust::DeviceTrustService;
use async_trait::async_trait;
use postern_core::{
    Error, Result, RetryDecision, CODE_AUTHENTICATION_INVALID, CODE_REQUIRES_ASSERTION,
    CODE_REQUIRES_DEVICE_ATTESTATION,
};
use postern_transport::{
    Method, PipelineContext, ResponseValidator, RetryDecider, TransportResponse,
};
use tracing::{debug, warn};

/// Triggers a client re-sync when the server reports the client state
/// invalid.
///
/// The re-sync is fire-and-forget: the failing response still aborts with
/// its own error, and a GET of the client endpoint itself never triggers a
/// re-sync (the re-sync *is* that request, and recursing would loop).
pub struct ClientSyncValidator {
    sync: ClientSync,
}

impl ClientSyncValidator {
    /// Create a validator driving the given sync service.
    pub fn new(sync: ClientSync) -> Self {
        Self { sync }
    }

    fn is_get_client_request(ctx: &PipelineContext) -> bool {
        ctx.request.method == Method::Get && ctx.request.path.ends_with(CLIENT_PATH)
    }
}

#[async_trait]
impl ResponseValidator for ClientSyncValidator {
    fn name(&self) -> &'static str {
        "client_sync"
    }

    async fn validate(&self, response: &TransportResponse, ctx: &PipelineContext) -> Result<()> {
        if response.is_success() {
            return Ok(());
        }
        let error = response.decode_error();
        if error.api_code() != Some(CODE_AUTHENTICATION_INVALID) {
            return Ok(());
        }
        if Self::is_get_client_request(ctx) {
            debug!(
                request_id = %ctx.request_id,
                "authentication_invalid on get-client request, skipping re-sync"
            );
            return Ok(());
        }

        let sync = self.sync.clone();
        let request_id = ctx.request_id;
        tokio::spawn(async move {
            if let Err(err) = sync.resync().await {
                warn!(%request_id, error = %err, "client re-sync failed");
            }
        });
        Ok(())
    }
}

/// Stable correction key for the device-proof retrier.
pub const DEVICE_PROOF_CORRECTION: &str = "device_proof";

/// Performs the device proof the server demanded, then allows one retry.
///
/// The proof runs through the single-flight coordinators in
/// [`DeviceTrustService`]; a proof failure is logged and the original
/// error propagates.
pub struct DeviceProofRetrier {
    device: DeviceTrustService,
}

impl DeviceProofRetrier {
    /// Create a retrier driving the given device-trust service.
    pub fn new(device: DeviceTrustService) -> Self {
        Self { device }
    }
}

#[async_trait]
impl RetryDecider for DeviceProofRetrier {
    fn name(&self) -> &'static str {
        "device_proof"
    }

    fn correction_key(&self) -> Option<&'static str> {
        Some(DEVICE_PROOF_CORRECTION)
    }

    async fn decide(&self, ctx: &PipelineContext, error: &Error) -> RetryDecision {
        let outcome = match error.api_code() {
            Some(CODE_REQUIRES_ASSERTION) => self.device.assert_device().await,
            Some(CODE_REQUIRES_DEVICE_ATTESTATION) => self.device.attest_device().await,
            _ => return RetryDecision::DoNotRetry,
        };

        match outcome {
            Ok(()) => {
                debug!(
                    request_id = %ctx.request_id,
                    attempt = ctx.attempt,
                    "device proof complete, retrying request"
                );
                RetryDecision::retry_now()
            }
            Err(err) => {
                // The proof failure stays internal; the caller sees the
                // original error.
                warn!(
                    request_id = %ctx.request_id,
                    error = %err,
                    "device proof failed, not retrying"
                );
                RetryDecision::DoNotRetry
            }
        }
    }
}

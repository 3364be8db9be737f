//! Device attestation and assertion flows.
//!
//! The platform ceremony (App Attest, Play Integrity, TPM, ...) is an
//! injected [`DeviceAttestor`]; this service wraps it with the server
//! challenge/verify round trips and single-flight coordination so
//! concurrent triggers collapse into one ceremony.

use crate::single_flight::SingleFlight;
use async_trait::async_trait;
use postern_core::{Result, CODE_REQUIRES_DEVICE_ATTESTATION};
use postern_transport::{ApiClient, ApiRequest};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Proof produced by a platform key-attestation ceremony.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationProof {
    /// Platform key identifier.
    pub key_id: String,
    /// Attestation object, base64-encoded.
    pub attestation: String,
}

/// Proof produced by a platform assertion ceremony.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionProof {
    /// Platform key identifier.
    pub key_id: String,
    /// Assertion object, base64-encoded.
    pub assertion: String,
}

/// Platform device-trust ceremonies, bridged to futures.
///
/// Implementations wrap callback-style platform APIs; each call resolves
/// exactly once with the ceremony outcome.
#[async_trait]
pub trait DeviceAttestor: Send + Sync {
    /// Attest the device key against a server-issued challenge.
    async fn attest(&self, challenge: &str) -> Result<AttestationProof>;

    /// Produce an assertion over a server-issued challenge.
    async fn assert_challenge(&self, challenge: &str) -> Result<AssertionProof>;
}

#[derive(Debug, Deserialize)]
struct ChallengeResponse {
    challenge: String,
}

struct DeviceTrustInner {
    api: Arc<ApiClient>,
    attestor: Arc<dyn DeviceAttestor>,
    attest_flight: SingleFlight<()>,
    assert_flight: SingleFlight<()>,
}

impl DeviceTrustInner {
    /// One uncoordinated attestation: challenge, ceremony, verify.
    async fn attest_once(&self) -> Result<()> {
        let challenge: ChallengeResponse = self
            .api
            .send(ApiRequest::post("/v1/client/device_attestation/challenge"))
            .await?;
        let proof = self.attestor.attest(&challenge.challenge).await?;
        self.api
            .execute(
                &ApiRequest::post("/v1/client/device_attestation/verify").with_json(
                    &serde_json::json!({
                        "key_id": proof.key_id,
                        "attestation": proof.attestation,
                    }),
                ),
            )
            .await?;
        info!("device attestation verified");
        Ok(())
    }

    /// One uncoordinated assertion: challenge, ceremony, verify.
    async fn assert_once(&self) -> Result<()> {
        let challenge: ChallengeResponse = self
            .api
            .send(ApiRequest::post("/v1/client/device_assertion/challenge"))
            .await?;
        let proof = self.attestor.assert_challenge(&challenge.challenge).await?;
        self.api
            .execute(
                &ApiRequest::post("/v1/client/device_assertion/verify").with_json(
                    &serde_json::json!({
                        "key_id": proof.key_id,
                        "assertion": proof.assertion,
                    }),
                ),
            )
            .await?;
        debug!("device assertion verified");
        Ok(())
    }
}

/// Coordinated device-trust operations.
#[derive(Clone)]
pub struct DeviceTrustService {
    inner: Arc<DeviceTrustInner>,
}

impl DeviceTrustService {
    /// Create a service issuing its round trips through `api`.
    pub fn new(api: Arc<ApiClient>, attestor: Arc<dyn DeviceAttestor>) -> Self {
        Self {
            inner: Arc::new(DeviceTrustInner {
                api,
                attestor,
                attest_flight: SingleFlight::new(),
                assert_flight: SingleFlight::new(),
            }),
        }
    }

    /// Run device attestation; concurrent callers share one ceremony.
    pub async fn attest_device(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .attest_flight
            .run(move || async move { inner.attest_once().await })
            .await
    }

    /// Run a device assertion; concurrent callers share one ceremony.
    ///
    /// An assertion rejected with `requires_device_attestation` escalates:
    /// attestation runs once (through its own coordinator, so it never
    /// coalesces with unrelated assertions) and the assertion is retried
    /// exactly once, uncoordinated, inside the already-running operation.
    pub async fn assert_device(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .assert_flight
            .run(move || async move {
                match inner.assert_once().await {
                    Err(err) if err.api_code() == Some(CODE_REQUIRES_DEVICE_ATTESTATION) => {
                        debug!("assertion requires attestation, escalating once");
                        let attest_inner = Arc::clone(&inner);
                        inner
                            .attest_flight
                            .run(move || async move { attest_inner.attest_once().await })
                            .await?;
                        inner.assert_once().await
                    }
                    other => other,
                }
            })
            .await
    }
}

//! Caller-facing runtime facade.

use async_trait::async_trait;
use postern_core::Result;
use postern_session::{
    ClientSync, DeviceTrustService, GetTokenOptions, SessionPoller, SessionRefresher,
    SessionService, SessionToken,
};
use postern_telemetry::{TelemetryEventRaw, TelemetryPipeline};
use postern_transport::{ApiClient, ApiRequest, TransportResponse};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Shared slot holding the currently active session id.
pub type ActiveSession = Arc<Mutex<Option<String>>>;

/// Refresher wired into the polling loop: refreshes the active session's
/// token with the cache bypassed, and does nothing when no session is
/// active.
pub struct RuntimeRefresher {
    sessions: Arc<SessionService>,
    active: ActiveSession,
}

impl RuntimeRefresher {
    /// Create a refresher over the shared active-session slot.
    pub fn new(sessions: Arc<SessionService>, active: ActiveSession) -> Self {
        Self { sessions, active }
    }
}

#[async_trait]
impl SessionRefresher for RuntimeRefresher {
    async fn refresh_active_session(&self) -> Result<()> {
        let session_id = { self.active.lock().await.clone() };
        let Some(session_id) = session_id else {
            return Ok(());
        };
        self.sessions
            .get_token(
                &session_id,
                None,
                GetTokenOptions {
                    skip_cache: true,
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }
}

/// The assembled client runtime.
///
/// Every method is safe to call from any task; serialization happens
/// inside the owning components.
pub struct Runtime {
    api: Arc<ApiClient>,
    sessions: Arc<SessionService>,
    sync: ClientSync,
    device: Option<DeviceTrustService>,
    poller: SessionPoller,
    telemetry: TelemetryPipeline,
    active_session: ActiveSession,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime").finish_non_exhaustive()
    }
}

impl Runtime {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        api: Arc<ApiClient>,
        sessions: Arc<SessionService>,
        sync: ClientSync,
        device: Option<DeviceTrustService>,
        poller: SessionPoller,
        telemetry: TelemetryPipeline,
        active_session: ActiveSession,
    ) -> Self {
        Self {
            api,
            sessions,
            sync,
            device,
            poller,
            telemetry,
            active_session,
        }
    }

    /// Send a request through the pipeline and decode the response.
    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        self.api.send(request).await
    }

    /// Send a request and return the raw response.
    pub async fn execute(&self, request: &ApiRequest) -> Result<TransportResponse> {
        self.api.execute(request).await
    }

    /// Get a session token, served from the cache while fresh.
    pub async fn get_token(
        &self,
        session_id: &str,
        template: Option<&str>,
        options: GetTokenOptions,
    ) -> Result<SessionToken> {
        self.sessions.get_token(session_id, template, options).await
    }

    /// Set (or clear) the session the polling loop keeps alive.
    pub async fn set_active_session(&self, session_id: Option<String>) {
        let mut active = self.active_session.lock().await;
        debug!(
            session_id = session_id.as_deref().unwrap_or("<none>"),
            "active session updated"
        );
        *active = session_id;
    }

    /// Mark a session active, extending its server-side lifetime.
    pub async fn touch_session(&self, session_id: &str) -> Result<()> {
        self.sessions.touch(session_id).await
    }

    /// Start the background session refresh loop (idempotent).
    pub async fn start_polling(&self) {
        self.poller.start().await;
    }

    /// Stop the background session refresh loop (idempotent).
    pub async fn stop_polling(&self) {
        self.poller.stop().await;
    }

    /// Record a telemetry event; best-effort, never fails.
    pub async fn record(&self, event: TelemetryEventRaw) {
        self.telemetry.record(event).await;
    }

    /// Flush buffered telemetry now.
    pub async fn flush_telemetry(&self) {
        self.telemetry.flush().await;
    }

    /// Force a client re-sync.
    pub async fn resync_client(&self) -> Result<()> {
        self.sync.resync().await
    }

    /// Fetch and cache the environment blob.
    pub async fn fetch_environment(&self) -> Result<serde_json::Value> {
        self.sync.fetch_environment().await
    }

    /// Run device attestation, when an attestor is configured.
    pub async fn attest_device(&self) -> Result<()> {
        match &self.device {
            Some(device) => device.attest_device().await,
            None => Err(postern_core::Error::config(
                "no device attestor configured",
            )),
        }
    }

    /// End the active session and drop cached state.
    pub async fn sign_out(&self) -> Result<()> {
        let session_id = { self.active_session.lock().await.clone() };
        if let Some(session_id) = session_id {
            self.sessions.remove(&session_id).await?;
        }
        self.set_active_session(None).await;
        self.sessions.clear_cache().await;
        Ok(())
    }
}

//! Client and environment re-sync.
//!
//! The cached client blob is the runtime's picture of its authenticated
//! state; when the server reports it invalid, a single-flight re-sync
//! replaces the cache with the server's truth.

use crate::single_flight::SingleFlight;
use postern_core::{keys, KeyValueStore, Result};
use postern_transport::{ApiClient, ApiRequest};
use std::sync::Arc;
use tracing::{debug, info};

/// Path of the get-client endpoint; also used for re-sync loop prevention.
pub const CLIENT_PATH: &str = "/v1/client";
/// Path of the get-environment endpoint.
pub const ENVIRONMENT_PATH: &str = "/v1/environment";

struct ClientSyncInner {
    api: Arc<ApiClient>,
    store: Arc<dyn KeyValueStore>,
    flight: SingleFlight<()>,
}

/// Single-flight refresh of the cached client and environment blobs.
#[derive(Clone)]
pub struct ClientSync {
    inner: Arc<ClientSyncInner>,
}

impl ClientSync {
    /// Create a service issuing requests through `api` and caching into
    /// `store`.
    pub fn new(api: Arc<ApiClient>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            inner: Arc::new(ClientSyncInner {
                api,
                store,
                flight: SingleFlight::new(),
            }),
        }
    }

    /// Re-fetch the client from the server and replace the cached blob.
    ///
    /// Concurrent triggers coalesce into one fetch.
    pub async fn resync(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .flight
            .run(move || async move {
                let response = inner.api.execute(&ApiRequest::get(CLIENT_PATH)).await?;
                inner.store.set(keys::CACHED_CLIENT, response.body).await?;
                info!("client re-sync complete");
                Ok(())
            })
            .await
    }

    /// Fetch the environment and replace the cached blob.
    pub async fn fetch_environment(&self) -> Result<serde_json::Value> {
        let response = self
            .inner
            .api
            .execute(&ApiRequest::get(ENVIRONMENT_PATH))
            .await?;
        self.inner
            .store
            .set(keys::CACHED_ENVIRONMENT, response.body.clone())
            .await?;
        debug!("environment cached");
        serde_json::from_slice(&response.body).map_err(Into::into)
    }

    /// The cached client blob, when one has been stored.
    pub async fn cached_client(&self) -> Result<Option<serde_json::Value>> {
        match self.inner.store.get(keys::CACHED_CLIENT).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

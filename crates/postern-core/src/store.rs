//! Opaque durable key-value storage seam.
//!
//! Secure credential storage is an external collaborator; this runtime only
//! sees get/set/delete by string key. JSON helpers cover the cached blobs
//! (client, environment, throttle cache) that are stored as serialized
//! values.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Well-known storage keys used by the runtime.
pub mod keys {
    /// Device token issued after attestation, sent on every request.
    pub const DEVICE_TOKEN: &str = "postern.device_token";
    /// Cached client blob from the last successful client sync.
    pub const CACHED_CLIENT: &str = "postern.client";
    /// Cached environment blob.
    pub const CACHED_ENVIRONMENT: &str = "postern.environment";
    /// Telemetry throttle cache (fingerprint -> last-seen timestamp).
    pub const TELEMETRY_THROTTLE: &str = "postern.telemetry_throttle";
}

/// Durable, opaque byte storage keyed by string.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Store bytes under a key, overwriting any previous value.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Fetch the bytes stored under a key, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove a key; removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// JSON helpers layered over the raw byte interface.
#[async_trait]
pub trait KeyValueStoreExt: KeyValueStore {
    /// Serialize a value as JSON and store it.
    async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).map_err(|err| Error::storage(err.to_string()))?;
        self.set(key, bytes).await
    }

    /// Fetch and deserialize a JSON value, treating a missing key as `None`.
    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(bytes) => {
                let value =
                    serde_json::from_slice(&bytes).map_err(|err| Error::storage(err.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStoreExt for T {}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        (**self).set(key, value).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }
}

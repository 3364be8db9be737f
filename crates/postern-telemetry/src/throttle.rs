//! Event throttling with a persistent 24h TTL cache.

use postern_core::{keys, Clock, KeyValueStore, KeyValueStoreExt, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// How long an identical event fingerprint stays suppressed.
pub const THROTTLE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Fingerprint → last-seen map, cached in memory and persisted through the
/// key-value store so throttling survives restarts.
pub struct ThrottleCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    entries: Mutex<Option<HashMap<String, u64>>>,
}

impl ThrottleCache {
    /// Create a cache backed by `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            entries: Mutex::new(None),
        }
    }

    /// Whether `fingerprint` was seen within the TTL.
    ///
    /// A miss (or an entry older than the TTL) records the current
    /// timestamp and persists the pruned map; the event is accepted.
    pub async fn is_throttled(&self, fingerprint: &str) -> Result<bool> {
        let now = self.clock.unix_seconds();
        let ttl = THROTTLE_TTL.as_secs();

        let mut slot = self.entries.lock().await;
        if slot.is_none() {
            let loaded: HashMap<String, u64> = self
                .store
                .get_json(keys::TELEMETRY_THROTTLE)
                .await?
                .unwrap_or_default();
            *slot = Some(loaded);
        }
        let Some(entries) = slot.as_mut() else {
            return Ok(false);
        };

        let last_seen = entries.get(fingerprint).copied();
        if let Some(seen) = last_seen {
            if now.saturating_sub(seen) < ttl {
                return Ok(true);
            }
        }

        // Expired entries are treated as absent and refreshed together
        // with the new fingerprint.
        entries.retain(|_, seen| now.saturating_sub(*seen) < ttl);
        entries.insert(fingerprint.to_string(), now);
        let snapshot = entries.clone();
        drop(slot);

        if let Err(err) = self.store.set_json(keys::TELEMETRY_THROTTLE, &snapshot).await {
            debug!(error = %err, "failed to persist throttle cache");
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;
    use std::time::SystemTime;

    struct TestStore {
        values: Mutex<StdHashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl KeyValueStore for TestStore {
        async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
            self.values.lock().await.insert(key.to_string(), value);
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.values.lock().await.get(key).cloned())
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.values.lock().await.remove(key);
            Ok(())
        }
    }

    struct TestClock {
        now: std::sync::Mutex<SystemTime>,
    }

    impl Clock for TestClock {
        fn now(&self) -> SystemTime {
            *self.now.lock().unwrap()
        }
    }

    #[tokio::test]
    async fn duplicate_within_ttl_is_throttled_and_released_after() {
        let store = Arc::new(TestStore {
            values: Mutex::new(StdHashMap::new()),
        });
        let clock = Arc::new(TestClock {
            now: std::sync::Mutex::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000)),
        });
        let cache = ThrottleCache::new(store.clone() as _, clock.clone() as _);

        assert!(!cache.is_throttled("fp-1").await.unwrap());
        assert!(cache.is_throttled("fp-1").await.unwrap());

        // One second short of the TTL: still throttled.
        *clock.now.lock().unwrap() += THROTTLE_TTL - Duration::from_secs(1);
        assert!(cache.is_throttled("fp-1").await.unwrap());

        // Past the TTL: treated as absent and refreshed.
        *clock.now.lock().unwrap() += Duration::from_secs(2);
        assert!(!cache.is_throttled("fp-1").await.unwrap());
        assert!(cache.is_throttled("fp-1").await.unwrap());
    }

    #[tokio::test]
    async fn persisted_entries_survive_a_new_cache_instance() {
        let store = Arc::new(TestStore {
            values: Mutex::new(StdHashMap::new()),
        });
        let clock = Arc::new(TestClock {
            now: std::sync::Mutex::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000)),
        });

        let cache = ThrottleCache::new(store.clone() as _, clock.clone() as _);
        assert!(!cache.is_throttled("fp-1").await.unwrap());

        let rehydrated = ThrottleCache::new(store as _, clock as _);
        assert!(rehydrated.is_throttled("fp-1").await.unwrap());
    }
}

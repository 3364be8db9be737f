//! Telemetry events and their stable fingerprints.

use postern_core::InstanceKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An event as handed to [`crate::TelemetryPipeline::record`].
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEventRaw {
    /// Event name, e.g. `method_invoked`.
    pub event: String,
    /// Arbitrary JSON payload.
    pub payload: serde_json::Value,
    /// Optional per-event sampling rate in [0, 1], applied on top of the
    /// global rate.
    pub sampling_rate: Option<f64>,
}

impl TelemetryEventRaw {
    /// Build an event with an empty payload.
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            payload: serde_json::json!({}),
            sampling_rate: None,
        }
    }

    /// Attach a payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Attach a per-event sampling rate.
    pub fn with_sampling_rate(mut self, rate: f64) -> Self {
        self.sampling_rate = Some(rate);
        self
    }
}

/// Ambient environment folded into every event at record time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkEnvironment {
    /// Instance kind of the configured publishable key.
    pub instance_kind: InstanceKind,
    /// SDK identifier.
    pub sdk: String,
    /// SDK version.
    pub sdk_version: String,
    /// Publishable key, when one is configured.
    pub publishable_key: Option<String>,
}

impl SdkEnvironment {
    /// Environment for this crate's identity and the given key.
    pub fn new(instance_kind: InstanceKind, publishable_key: Option<String>) -> Self {
        Self {
            instance_kind,
            sdk: "postern-rust".into(),
            sdk_version: env!("CARGO_PKG_VERSION").into(),
            publishable_key,
        }
    }
}

/// A decorated event ready for the buffer and the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Event name.
    pub event: String,
    /// Instance kind tag (`development` / `production`).
    pub instance_kind: String,
    /// SDK identifier.
    pub sdk: String,
    /// SDK version.
    pub sdk_version: String,
    /// Publishable key, when configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publishable_key: Option<String>,
    /// Event payload.
    pub payload: serde_json::Value,
}

impl TelemetryEvent {
    /// Decorate a raw event with the ambient environment.
    pub fn decorate(raw: &TelemetryEventRaw, environment: &SdkEnvironment) -> Self {
        Self {
            event: raw.event.clone(),
            instance_kind: environment.instance_kind.as_str().to_string(),
            sdk: environment.sdk.clone(),
            sdk_version: environment.sdk_version.clone(),
            publishable_key: environment.publishable_key.clone(),
            payload: raw.payload.clone(),
        }
    }

    /// Stable fingerprint used by the throttle cache.
    ///
    /// Canonical JSON with sorted keys at every level (serde_json's default
    /// map keeps keys ordered), hashed to a SHA-256 hex digest, so the same
    /// logical event always maps to the same entry.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::json!({
            "event": self.event,
            "instance_kind": self.instance_kind,
            "payload": self.payload,
            "publishable_key": self.publishable_key,
            "sdk": self.sdk,
            "sdk_version": self.sdk_version,
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn environment() -> SdkEnvironment {
        SdkEnvironment::new(InstanceKind::Development, Some("pk_test_abc".into()))
    }

    #[test]
    fn fingerprint_ignores_payload_key_order() {
        let env = environment();
        let a = TelemetryEvent::decorate(
            &TelemetryEventRaw::new("method_invoked")
                .with_payload(serde_json::json!({"a": 1, "b": 2})),
            &env,
        );
        let b = TelemetryEvent::decorate(
            &TelemetryEventRaw::new("method_invoked")
                .with_payload(serde_json::json!({"b": 2, "a": 1})),
            &env,
        );
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_distinguishes_payloads_and_names() {
        let env = environment();
        let a = TelemetryEvent::decorate(
            &TelemetryEventRaw::new("method_invoked").with_payload(serde_json::json!({"a": 1})),
            &env,
        );
        let b = TelemetryEvent::decorate(
            &TelemetryEventRaw::new("method_invoked").with_payload(serde_json::json!({"a": 2})),
            &env,
        );
        let c = TelemetryEvent::decorate(&TelemetryEventRaw::new("component_mounted"), &env);
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn decoration_carries_the_environment() {
        let event = TelemetryEvent::decorate(&TelemetryEventRaw::new("method_invoked"), &environment());
        assert_eq!(event.instance_kind, "development");
        assert_eq!(event.sdk, "postern-rust");
        assert_eq!(event.publishable_key.as_deref(), Some("pk_test_abc"));
    }
}

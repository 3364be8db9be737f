//! End-to-end tests over the assembled runtime.

use async_trait::async_trait;
use postern_core::{Clock, KeyValueStore, Result, RuntimeConfig, TelemetryConfig};
use postern_runtime::{GetTokenOptions, Runtime, RuntimeBuilder};
use postern_session::{AssertionProof, AttestationProof, DeviceAttestor};
use postern_telemetry::{TelemetryCollector, TelemetryEvent, TelemetryEventRaw};
use postern_testkit::{error_response, ok_json, test_jwt, ManualClock, MemoryStore, MockTransport};
use postern_transport::{ApiRequest, Body};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Publishable key for a development instance of `api.example.dev`.
fn test_key() -> String {
    use base64::engine::general_purpose::STANDARD_NO_PAD;
    use base64::Engine as _;
    format!("pk_test_{}", STANDARD_NO_PAD.encode("api.example.dev$"))
}

#[derive(Default)]
struct RecordingCollector {
    batches: Mutex<Vec<Vec<TelemetryEvent>>>,
}

#[async_trait]
impl TelemetryCollector for RecordingCollector {
    async fn publish(&self, events: Vec<TelemetryEvent>) -> Result<()> {
        self.batches.lock().unwrap().push(events);
        Ok(())
    }
}

struct StaticAttestor;

#[async_trait]
impl DeviceAttestor for StaticAttestor {
    async fn attest(&self, challenge: &str) -> Result<AttestationProof> {
        Ok(AttestationProof {
            key_id: "key-1".into(),
            attestation: format!("att:{challenge}"),
        })
    }

    async fn assert_challenge(&self, challenge: &str) -> Result<AssertionProof> {
        Ok(AssertionProof {
            key_id: "key-1".into(),
            assertion: format!("asrt:{challenge}"),
        })
    }
}

struct Fixture {
    runtime: Runtime,
    transport: Arc<MockTransport>,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    collector: Arc<RecordingCollector>,
}

fn fixture(mut config: RuntimeConfig) -> Fixture {
    config.telemetry = TelemetryConfig {
        sampling_rate: 1.0,
        flush_interval_ms: 60_000,
        ..config.telemetry.clone()
    };
    let transport = Arc::new(MockTransport::new());
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new());
    let collector = Arc::new(RecordingCollector::default());
    let runtime = RuntimeBuilder::new(config)
        .with_store(store.clone() as _)
        .with_transport(transport.clone() as _)
        .with_clock(clock.clone() as _)
        .with_attestor(Arc::new(StaticAttestor))
        .with_collector(collector.clone() as _)
        .build()
        .unwrap();
    Fixture {
        runtime,
        transport,
        store,
        clock,
        collector,
    }
}

#[tokio::test]
async fn builder_requires_a_store() {
    let err = RuntimeBuilder::new(RuntimeConfig::new(test_key()))
        .build()
        .unwrap_err();
    assert!(matches!(err, postern_runtime::Error::Config { .. }));
}

#[tokio::test]
async fn builder_rejects_unknown_key_prefixes() {
    let err = RuntimeBuilder::new(RuntimeConfig::new("sk_live_nope"))
        .with_store(Arc::new(MemoryStore::new()) as _)
        .build()
        .unwrap_err();
    assert!(matches!(err, postern_runtime::Error::Config { .. }));
}

#[tokio::test]
async fn requests_carry_the_standard_preparation() {
    let mut config = RuntimeConfig::new(test_key());
    config.locale = Some("en-US".into());
    let fx = fixture(config);

    fx.store
        .set("postern.device_token", b"Bearer device-jwt".to_vec())
        .await
        .unwrap();
    fx.transport
        .stub("/v1/me", Ok(ok_json(serde_json::json!({"id": "user_1"}))));

    let _: serde_json::Value = fx
        .runtime
        .send(
            ApiRequest::post("/v1/me").with_json(&serde_json::json!({"first_name": "Ada"})),
        )
        .await
        .unwrap();

    let calls = fx.transport.calls();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.headers.get("x-postern-sdk").map(String::as_str), Some("postern-rust"));
    assert_eq!(
        call.headers.get("accept-language").map(String::as_str),
        Some("en-US")
    );
    assert_eq!(
        call.headers.get("authorization").map(String::as_str),
        Some("Bearer device-jwt")
    );
    assert!(call
        .query
        .contains(&("_is_native".to_string(), "1".to_string())));
    // The JSON body was form-encoded for the mutating method.
    assert!(matches!(&call.body, Body::Form(pairs)
        if pairs.contains(&("first_name".to_string(), "Ada".to_string()))));
}

#[tokio::test]
async fn rotated_device_tokens_are_captured_from_responses() {
    let fx = fixture(RuntimeConfig::new(test_key()));

    let mut response = ok_json(serde_json::json!({"id": "user_1"}));
    response
        .headers
        .insert("authorization".to_string(), "Bearer rotated".to_string());
    fx.transport.stub("/v1/me", Ok(response));

    let _: serde_json::Value = fx.runtime.send(ApiRequest::get("/v1/me")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        fx.store.get_string("postern.device_token").await.as_deref(),
        Some("Bearer rotated")
    );
}

#[tokio::test]
async fn get_token_flows_through_the_cache() {
    let fx = fixture(RuntimeConfig::new(test_key()));
    let exp = fx.clock.unix_seconds() + 3600;
    fx.transport.stub(
        "/tokens",
        Ok(ok_json(serde_json::json!({"jwt": test_jwt(exp)}))),
    );

    let token = fx
        .runtime
        .get_token("sess_1", None, GetTokenOptions::default())
        .await
        .unwrap();
    assert_eq!(token.expires_at, exp);

    fx.runtime
        .get_token("sess_1", None, GetTokenOptions::default())
        .await
        .unwrap();
    assert_eq!(fx.transport.calls_to("/tokens"), 1);
}

#[tokio::test]
async fn polling_refreshes_the_active_session() {
    let mut config = RuntimeConfig::new(test_key());
    config.polling.base_interval_ms = 10;
    config.polling.max_interval_ms = 40;
    let fx = fixture(config);

    let exp = fx.clock.unix_seconds() + 3600;
    fx.transport.stub(
        "/tokens",
        Ok(ok_json(serde_json::json!({"jwt": test_jwt(exp)}))),
    );

    // No active session: the loop idles without hitting the network.
    fx.runtime.start_polling().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fx.transport.calls_to("/tokens"), 0);

    fx.runtime.set_active_session(Some("sess_1".into())).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    fx.runtime.stop_polling().await;

    assert!(fx.transport.calls_to("/tokens") >= 2);
}

#[tokio::test]
async fn device_proof_demands_are_corrected_transparently() {
    let fx = fixture(RuntimeConfig::new(test_key()));

    fx.transport.push(
        "/v1/me",
        Ok(error_response(403, "requires_assertion", "assert first")),
    );
    fx.transport
        .stub("/v1/me", Ok(ok_json(serde_json::json!({"id": "user_1"}))));
    fx.transport.stub(
        "/v1/client/device_assertion/challenge",
        Ok(ok_json(serde_json::json!({"challenge": "c1"}))),
    );
    fx.transport.stub(
        "/v1/client/device_assertion/verify",
        Ok(ok_json(serde_json::json!({}))),
    );

    let value: serde_json::Value = fx.runtime.send(ApiRequest::get("/v1/me")).await.unwrap();
    assert_eq!(value["id"], "user_1");
    assert_eq!(fx.transport.calls_to("/v1/me"), 2);
    assert_eq!(fx.transport.calls_to("device_assertion/verify"), 1);
}

#[tokio::test]
async fn telemetry_records_and_flushes_through_the_runtime() {
    let fx = fixture(RuntimeConfig::new(test_key()));

    fx.runtime
        .record(TelemetryEventRaw::new("method_invoked"))
        .await;
    fx.runtime.flush_telemetry().await;

    let batches = fx.collector.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0][0].event, "method_invoked");
    assert_eq!(batches[0][0].instance_kind, "development");
}

#[tokio::test]
async fn touch_marks_the_session_active_on_the_server() {
    let fx = fixture(RuntimeConfig::new(test_key()));
    fx.transport
        .stub("/touch", Ok(ok_json(serde_json::json!({}))));

    fx.runtime.touch_session("sess_1").await.unwrap();
    assert_eq!(fx.transport.calls_to("/v1/client/sessions/sess_1/touch"), 1);
}

#[tokio::test]
async fn sign_out_removes_the_session_and_clears_state() {
    let fx = fixture(RuntimeConfig::new(test_key()));
    fx.transport
        .stub("/remove", Ok(ok_json(serde_json::json!({}))));

    fx.runtime.set_active_session(Some("sess_1".into())).await;
    fx.runtime.sign_out().await.unwrap();

    assert_eq!(fx.transport.calls_to("/v1/client/sessions/sess_1/remove"), 1);
}

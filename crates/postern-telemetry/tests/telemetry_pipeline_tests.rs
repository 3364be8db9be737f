//! Integration tests for the telemetry pipeline: gating, throttling, and
//! buffer flush behaviour.

use async_trait::async_trait;
use postern_core::{InstanceKind, KeyValueStore, Result, TelemetryConfig};
use postern_telemetry::{
    FixedSampler, SdkEnvironment, TelemetryCollector, TelemetryEvent, TelemetryEventRaw,
    TelemetryPipeline, THROTTLE_TTL,
};
use postern_testkit::{ManualClock, MemoryStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Collector recording every published batch.
#[derive(Default)]
struct RecordingCollector {
    batches: Mutex<Vec<Vec<TelemetryEvent>>>,
}

impl RecordingCollector {
    fn batches(&self) -> Vec<Vec<TelemetryEvent>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetryCollector for RecordingCollector {
    async fn publish(&self, events: Vec<TelemetryEvent>) -> Result<()> {
        self.batches.lock().unwrap().push(events);
        Ok(())
    }
}

struct Fixture {
    pipeline: TelemetryPipeline,
    collector: Arc<RecordingCollector>,
    clock: Arc<ManualClock>,
}

fn fixture(config: TelemetryConfig, kind: InstanceKind) -> Fixture {
    let collector = Arc::new(RecordingCollector::default());
    let clock = Arc::new(ManualClock::new());
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let pipeline = TelemetryPipeline::with_sampler(
        config,
        SdkEnvironment::new(kind, Some("pk_test_abc".into())),
        store,
        clock.clone() as _,
        collector.clone() as _,
        Box::new(FixedSampler { accept: true }),
    );
    Fixture {
        pipeline,
        collector,
        clock,
    }
}

fn always_pass_config() -> TelemetryConfig {
    TelemetryConfig {
        sampling_rate: 1.0,
        // Keep the periodic timer far away unless a test wants it.
        flush_interval_ms: 60_000,
        ..Default::default()
    }
}

#[tokio::test]
async fn production_instances_record_nothing() {
    let fx = fixture(always_pass_config(), InstanceKind::Production);
    fx.pipeline.record(TelemetryEventRaw::new("method_invoked")).await;
    assert_eq!(fx.pipeline.buffered(), 0);
}

#[tokio::test]
async fn disabled_pipeline_records_nothing() {
    let config = TelemetryConfig {
        enabled: false,
        ..always_pass_config()
    };
    let fx = fixture(config, InstanceKind::Development);
    fx.pipeline.record(TelemetryEventRaw::new("method_invoked")).await;
    assert_eq!(fx.pipeline.buffered(), 0);
}

#[tokio::test]
async fn identical_events_throttle_within_ttl_and_release_after() {
    let fx = fixture(always_pass_config(), InstanceKind::Development);

    fx.pipeline.record(TelemetryEventRaw::new("method_invoked")).await;
    fx.pipeline.record(TelemetryEventRaw::new("method_invoked")).await;
    assert_eq!(fx.pipeline.buffered(), 1);

    fx.clock.advance(THROTTLE_TTL + Duration::from_secs(1));
    fx.pipeline.record(TelemetryEventRaw::new("method_invoked")).await;
    assert_eq!(fx.pipeline.buffered(), 2);
}

#[tokio::test]
async fn distinct_payloads_are_not_throttled_against_each_other() {
    let fx = fixture(always_pass_config(), InstanceKind::Development);

    for n in 0..3 {
        fx.pipeline
            .record(
                TelemetryEventRaw::new("method_invoked")
                    .with_payload(serde_json::json!({"method": format!("m{n}")})),
            )
            .await;
    }
    assert_eq!(fx.pipeline.buffered(), 3);
}

#[tokio::test]
async fn sampling_gate_drops_events() {
    let collector = Arc::new(RecordingCollector::default());
    let clock = Arc::new(ManualClock::new());
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let pipeline = TelemetryPipeline::with_sampler(
        always_pass_config(),
        SdkEnvironment::new(InstanceKind::Development, None),
        store,
        clock as _,
        collector as _,
        Box::new(FixedSampler { accept: false }),
    );

    pipeline.record(TelemetryEventRaw::new("method_invoked")).await;
    assert_eq!(pipeline.buffered(), 0);
}

#[tokio::test]
async fn disable_throttling_bypasses_sampling_and_throttle() {
    let config = TelemetryConfig {
        disable_throttling: true,
        max_buffer_size: 100,
        ..always_pass_config()
    };
    let collector = Arc::new(RecordingCollector::default());
    let clock = Arc::new(ManualClock::new());
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let pipeline = TelemetryPipeline::with_sampler(
        config,
        SdkEnvironment::new(InstanceKind::Development, None),
        store,
        clock as _,
        collector as _,
        // Sampler that would reject everything: must not be consulted.
        Box::new(FixedSampler { accept: false }),
    );

    pipeline.record(TelemetryEventRaw::new("method_invoked")).await;
    pipeline.record(TelemetryEventRaw::new("method_invoked")).await;
    assert_eq!(pipeline.buffered(), 2);
}

#[tokio::test]
async fn reaching_capacity_flushes_exactly_one_full_batch() {
    let config = TelemetryConfig {
        max_buffer_size: 5,
        disable_throttling: true,
        ..always_pass_config()
    };
    let fx = fixture(config, InstanceKind::Development);

    for n in 0..5 {
        fx.pipeline
            .record(
                TelemetryEventRaw::new("method_invoked")
                    .with_payload(serde_json::json!({"n": n})),
            )
            .await;
    }

    // The capacity flush runs on a spawned task.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let batches = fx.collector.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 5);
    assert_eq!(fx.pipeline.buffered(), 0);
}

#[tokio::test]
async fn periodic_timer_flushes_a_partial_buffer() {
    let config = TelemetryConfig {
        flush_interval_ms: 40,
        disable_throttling: true,
        ..always_pass_config()
    };
    let fx = fixture(config, InstanceKind::Development);

    fx.pipeline.record(TelemetryEventRaw::new("method_invoked")).await;
    assert_eq!(fx.pipeline.buffered(), 1);

    tokio::time::sleep(Duration::from_millis(120)).await;
    let batches = fx.collector.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    assert_eq!(fx.pipeline.buffered(), 0);
}

#[tokio::test]
async fn explicit_flush_empties_the_buffer_and_ignores_failures() {
    /// Collector that always fails.
    struct FailingCollector;

    #[async_trait]
    impl TelemetryCollector for FailingCollector {
        async fn publish(&self, _events: Vec<TelemetryEvent>) -> Result<()> {
            Err(postern_core::Error::transport(
                "collector offline",
                postern_core::TransportErrorKind::Connect,
            ))
        }
    }

    let clock = Arc::new(ManualClock::new());
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let pipeline = TelemetryPipeline::with_sampler(
        always_pass_config(),
        SdkEnvironment::new(InstanceKind::Development, None),
        store,
        clock as _,
        Arc::new(FailingCollector) as _,
        Box::new(FixedSampler { accept: true }),
    );

    pipeline.record(TelemetryEventRaw::new("method_invoked")).await;
    // Failure is swallowed; the batch is dropped, not re-buffered.
    pipeline.flush().await;
    assert_eq!(pipeline.buffered(), 0);
}

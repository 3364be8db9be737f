//! The record → sample → throttle → buffer → flush pipeline.

use crate::event::{SdkEnvironment, TelemetryEvent, TelemetryEventRaw};
use crate::sampler::{RandomSampler, Sampler};
use crate::throttle::ThrottleCache;
use async_trait::async_trait;
use postern_core::{Clock, Error, InstanceKind, KeyValueStore, Result, TelemetryConfig};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Sink the flushed batches are posted to.
#[async_trait]
pub trait TelemetryCollector: Send + Sync {
    /// Deliver a batch. Failures are swallowed by the pipeline.
    async fn publish(&self, events: Vec<TelemetryEvent>) -> Result<()>;
}

/// Production collector POSTing batches as JSON.
#[derive(Debug, Clone)]
pub struct HttpCollector {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCollector {
    /// Create a collector targeting `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| Error::config(format!("telemetry client build failed: {err}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl TelemetryCollector for HttpCollector {
    async fn publish(&self, events: Vec<TelemetryEvent>) -> Result<()> {
        self.client
            .post(&self.endpoint)
            .json(&events)
            .send()
            .await
            .map_err(|err| {
                Error::transport(err.to_string(), postern_core::TransportErrorKind::Other)
            })?;
        Ok(())
    }
}

struct TelemetryInner {
    config: TelemetryConfig,
    environment: SdkEnvironment,
    sampler: Box<dyn Sampler>,
    throttle: ThrottleCache,
    collector: Arc<dyn TelemetryCollector>,
    buffer: Mutex<Vec<TelemetryEvent>>,
    pending_flush: Mutex<Option<JoinHandle<()>>>,
    periodic: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for TelemetryInner {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.pending_flush.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        if let Ok(mut slot) = self.periodic.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

/// Best-effort telemetry sink.
///
/// `record` never fails and never blocks on the network; `flush` swaps the
/// buffer and posts the batch, silently dropping it on failure.
#[derive(Clone)]
pub struct TelemetryPipeline {
    inner: Arc<TelemetryInner>,
}

impl TelemetryPipeline {
    /// Create a pipeline with the production sampler.
    pub fn new(
        config: TelemetryConfig,
        environment: SdkEnvironment,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        collector: Arc<dyn TelemetryCollector>,
    ) -> Self {
        Self::with_sampler(config, environment, store, clock, collector, Box::new(RandomSampler))
    }

    /// Create a pipeline with an explicit sampler (tests inject a fixed one).
    pub fn with_sampler(
        config: TelemetryConfig,
        environment: SdkEnvironment,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        collector: Arc<dyn TelemetryCollector>,
        sampler: Box<dyn Sampler>,
    ) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                config,
                environment,
                sampler,
                throttle: ThrottleCache::new(store, clock),
                collector,
                buffer: Mutex::new(Vec::new()),
                pending_flush: Mutex::new(None),
                periodic: Mutex::new(None),
            }),
        }
    }

    /// Number of buffered events (test hook).
    pub fn buffered(&self) -> usize {
        self.inner.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    /// Record an event.
    ///
    /// The event is decorated with the ambient environment, then dropped
    /// unless it clears the enabled/instance gate, global and per-event
    /// sampling, and the 24h throttle. Acceptance appends to the buffer;
    /// a full buffer triggers an eager flush.
    pub async fn record(&self, raw: TelemetryEventRaw) {
        self.ensure_periodic_flush();

        if !self.inner.config.enabled
            || self.inner.environment.instance_kind != InstanceKind::Development
        {
            trace!(event = %raw.event, "telemetry disabled for this instance, dropping event");
            return;
        }

        let event = TelemetryEvent::decorate(&raw, &self.inner.environment);

        if !self.inner.config.disable_throttling {
            if !self.inner.sampler.sample(self.inner.config.sampling_rate) {
                trace!(event = %event.event, "event dropped by global sampling");
                return;
            }
            if let Some(rate) = raw.sampling_rate {
                if !self.inner.sampler.sample(rate) {
                    trace!(event = %event.event, rate, "event dropped by per-event sampling");
                    return;
                }
            }
            match self.inner.throttle.is_throttled(&event.fingerprint()).await {
                Ok(true) => {
                    trace!(event = %event.event, "event throttled");
                    return;
                }
                Ok(false) => {}
                Err(err) => {
                    // Throttle storage trouble never costs events.
                    debug!(error = %err, "throttle cache unavailable, accepting event");
                }
            }
        }

        let should_flush = {
            let mut buffer = match self.inner.buffer.lock() {
                Ok(buffer) => buffer,
                Err(_) => return,
            };
            buffer.push(event);
            buffer.len() >= self.inner.config.max_buffer_size
        };

        if should_flush {
            self.schedule_flush();
        }
    }

    /// Flush the buffer now.
    ///
    /// Swaps the buffer for an empty one before publishing, so events
    /// recorded during the POST land in the next batch. Delivery failures
    /// are logged and dropped; this sink never retries and never surfaces
    /// errors.
    pub async fn flush(&self) {
        let batch = {
            let Ok(mut buffer) = self.inner.buffer.lock() else {
                return;
            };
            std::mem::take(&mut *buffer)
        };
        if batch.is_empty() {
            return;
        }

        let count = batch.len();
        if let Err(err) = self.inner.collector.publish(batch).await {
            debug!(error = %err, count, "telemetry flush failed, dropping batch");
        } else {
            trace!(count, "telemetry batch flushed");
        }
    }

    /// Schedule an async flush, replacing any previously scheduled one so a
    /// rapid burst of capacity hits sends a single batch.
    fn schedule_flush(&self) {
        let Ok(mut slot) = self.inner.pending_flush.lock() else {
            return;
        };
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        let pipeline = self.clone();
        *slot = Some(tokio::spawn(async move {
            pipeline.flush().await;
        }));
    }

    /// Lazily start the periodic flush timer on first use.
    ///
    /// The task holds a weak reference so dropping the last pipeline handle
    /// ends the loop instead of keeping it alive.
    fn ensure_periodic_flush(&self) {
        let Ok(mut slot) = self.inner.periodic.lock() else {
            return;
        };
        if slot.is_some() {
            return;
        }
        let interval = Duration::from_millis(self.inner.config.flush_interval_ms);
        let weak = Arc::downgrade(&self.inner);
        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else { break };
                let pipeline = TelemetryPipeline { inner };
                if pipeline.buffered() > 0 {
                    pipeline.flush().await;
                }
            }
        }));
    }
}

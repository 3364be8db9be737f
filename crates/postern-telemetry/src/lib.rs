//! Best-effort telemetry for the Postern client runtime.
//!
//! Events flow through sampling, a persistent 24h throttle, and a bounded
//! buffer that flushes on capacity or on a periodic timer. The whole sink
//! is fire-and-forget: it never surfaces errors and never retries.

pub mod event;
pub mod pipeline;
pub mod sampler;
pub mod throttle;

pub use event::{SdkEnvironment, TelemetryEvent, TelemetryEventRaw};
pub use pipeline::{HttpCollector, TelemetryCollector, TelemetryPipeline};
pub use sampler::{FixedSampler, RandomSampler, Sampler};
pub use throttle::{ThrottleCache, THROTTLE_TTL};

//! Core types for the Postern client runtime.
//!
//! This crate holds everything the other Postern crates share: the unified
//! error taxonomy, runtime configuration, the wall-clock and key-value
//! storage seams, and the pure retry/backoff policy. It performs no I/O of
//! its own.

pub mod clock;
pub mod config;
pub mod error;
pub mod retry;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use config::{InstanceKind, PollingConfig, RuntimeConfig, TelemetryConfig};
pub use error::{
    is_retryable_status, ApiError, Error, Result, TransportErrorKind, CODE_AUTHENTICATION_INVALID,
    CODE_REQUIRES_ASSERTION, CODE_REQUIRES_DEVICE_ATTESTATION, CODE_RESOURCE_NOT_FOUND,
};
pub use retry::{
    apply_jitter, exponential_interval, parse_retry_after, rate_limit_delay, ResponseMeta,
    RetryConfig, RetryDecision, RetryPolicy,
};
pub use store::{keys, KeyValueStore, KeyValueStoreExt};

//! Runtime composition for the Postern client.
//!
//! [`RuntimeBuilder`] takes every collaborator explicitly (store,
//! transport, clock, attestor, collector) and wires the standard
//! middleware order around the pipeline; [`Runtime`] is the caller-facing
//! facade over requests, tokens, polling, and telemetry.

pub mod builder;
pub mod runtime;

pub use builder::RuntimeBuilder;
pub use runtime::{ActiveSession, Runtime, RuntimeRefresher};

// The request and options types callers hand to the facade.
pub use postern_core::{
    ApiError, Error, InstanceKind, PollingConfig, Result, RetryConfig, RuntimeConfig,
    TelemetryConfig,
};
pub use postern_session::{GetTokenOptions, SessionToken};
pub use postern_telemetry::TelemetryEventRaw;
pub use postern_transport::{ApiRequest, Body, Method};

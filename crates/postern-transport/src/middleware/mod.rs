//! Middleware seams for the request pipeline.
//!
//! A pipeline holds one ordered list of tagged middleware variants; the
//! executor dispatches each variant at its phase of an attempt. Ordering is
//! therefore a plain array decided at registration time, not an artifact of
//! type registration.

mod prepare;
mod validate;

pub use prepare::{
    AuthorizationPreparer, FormEncodePreparer, LocalePreparer, PathPrefixPreparer,
    SdkHeadersPreparer, StaticQueryPreparer,
};
pub use validate::{DeviceTokenValidator, ErrorDecodeValidator};

use crate::request::PreparedRequest;
use crate::response::TransportResponse;
use async_trait::async_trait;
use postern_core::{Error, Result, RetryDecision};
use uuid::Uuid;

/// Read-only view of one pipeline attempt.
///
/// Created fresh per attempt; validators and retry deciders must treat it
/// as a snapshot.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// The fully prepared request that was (or will be) sent.
    pub request: PreparedRequest,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// Stable id correlating every attempt of one logical request in logs.
    pub request_id: Uuid,
}

/// Mutates the per-attempt request copy before the transport call.
///
/// Preparers run in registration order on every attempt and must be
/// idempotent under re-application (set semantics, not append).
#[async_trait]
pub trait RequestPreparer: Send + Sync {
    /// Short name used in tracing output.
    fn name(&self) -> &'static str;

    /// Apply this preparer's mutation.
    async fn prepare(&self, request: &mut PreparedRequest) -> Result<()>;
}

/// Inspects a received response.
///
/// Validators run in registration order and must not assume exclusivity:
/// several validators may react to the same response. A validator either
/// continues (`Ok`), performs an internal fire-and-forget side effect and
/// continues, or aborts the attempt with a domain error.
#[async_trait]
pub trait ResponseValidator: Send + Sync {
    /// Short name used in tracing output.
    fn name(&self) -> &'static str;

    /// Inspect the response; `Err` aborts validation for this attempt.
    async fn validate(&self, response: &TransportResponse, ctx: &PipelineContext) -> Result<()>;
}

/// Decides whether a failed attempt should be retried.
///
/// Deciders are consulted in registration order with the attempt's terminal
/// error; the first `Retry` wins. A decider that performs a corrective side
/// effect (device proof, client re-sync) declares a correction key so the
/// pipeline can cap it at one corrective retry per logical request.
#[async_trait]
pub trait RetryDecider: Send + Sync {
    /// Short name used in tracing output.
    fn name(&self) -> &'static str;

    /// Stable key identifying this decider's corrective action, when it has
    /// one. The pipeline skips the decider once the key has been consumed
    /// within the current logical request.
    fn correction_key(&self) -> Option<&'static str> {
        None
    }

    /// Decide whether to retry. Corrective failures are handled internally
    /// (logged, mapped to `DoNotRetry`) so the caller only ever sees the
    /// original error.
    async fn decide(&self, ctx: &PipelineContext, error: &Error) -> RetryDecision;
}

/// One registered middleware stage.
pub enum Middleware {
    /// Request preparer, applied before the transport call.
    Prepare(Box<dyn RequestPreparer>),
    /// Response validator, applied after a response is received.
    Validate(Box<dyn ResponseValidator>),
    /// Retry decider, consulted when an attempt fails.
    Retry(Box<dyn RetryDecider>),
}

impl Middleware {
    /// Wrap a preparer.
    pub fn prepare(preparer: impl RequestPreparer + 'static) -> Self {
        Self::Prepare(Box::new(preparer))
    }

    /// Wrap a validator.
    pub fn validate(validator: impl ResponseValidator + 'static) -> Self {
        Self::Validate(Box::new(validator))
    }

    /// Wrap a retry decider.
    pub fn retry(decider: impl RetryDecider + 'static) -> Self {
        Self::Retry(Box::new(decider))
    }
}

impl std::fmt::Debug for Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Middleware::Prepare(p) => write!(f, "Prepare({})", p.name()),
            Middleware::Validate(v) => write!(f, "Validate({})", v.name()),
            Middleware::Retry(r) => write!(f, "Retry({})", r.name()),
        }
    }
}

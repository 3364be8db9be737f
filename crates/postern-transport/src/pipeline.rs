//! Pipeline executor.
//!
//! One [`ApiClient`] instance owns a fixed, ordered middleware list and a
//! default retry policy. Concurrent `send` calls are fully independent;
//! nothing here takes a global lock across requests.

use crate::middleware::{Middleware, PipelineContext};
use crate::request::ApiRequest;
use crate::response::TransportResponse;
use crate::transport::HttpTransport;
use postern_core::{Clock, Error, ResponseMeta, Result, RetryDecision, RetryPolicy, SystemClock};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Executes logical requests through the ordered middleware pipeline.
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    middleware: Vec<Middleware>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl ApiClient {
    /// Create a client with the default retry policy and system clock.
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            middleware: Vec::new(),
            policy: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the default retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the clock (tests use a manual clock).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register middleware; called once at assembly time, order is final.
    pub fn with_middleware(mut self, middleware: Vec<Middleware>) -> Self {
        self.middleware = middleware;
        self
    }

    /// Append a single middleware stage.
    pub fn push_middleware(&mut self, middleware: Middleware) {
        self.middleware.push(middleware);
    }

    /// Execute a request and decode the response body into `T`.
    ///
    /// A 2xx body that fails to decode is a terminal decode error, never
    /// retried.
    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let response = self.execute(&request).await?;
        response.json()
    }

    /// Execute a request, returning the raw successful response.
    ///
    /// Per attempt: preparers run in registration order over a fresh copy
    /// of the request, the transport fires once, validators run in order,
    /// and on failure the retry deciders (then the default policy) choose
    /// between a delayed retry and propagation. Corrective deciders are
    /// consulted at most once per logical request.
    pub async fn execute(&self, request: &ApiRequest) -> Result<TransportResponse> {
        let policy = request.retry.map(RetryPolicy::new).unwrap_or(self.policy);
        let request_id = Uuid::new_v4();
        let mut attempt: u32 = 1;
        let mut consumed_corrections: HashSet<&'static str> = HashSet::new();

        loop {
            let mut prepared = request.to_prepared();
            for stage in &self.middleware {
                if let Middleware::Prepare(preparer) = stage {
                    preparer.prepare(&mut prepared).await?;
                }
            }
            let ctx = PipelineContext {
                request: prepared.clone(),
                attempt,
                request_id,
            };
            debug!(
                %request_id,
                attempt,
                method = prepared.method.as_str(),
                path = %prepared.path,
                "executing request"
            );

            let (failure, meta) = match self.transport.execute(&prepared).await {
                Ok(response) => match self.validate(&response, &ctx).await {
                    Ok(()) if response.is_success() => return Ok(response),
                    Ok(()) => {
                        // No validator claimed the failure; apply the
                        // generic fallback so callers never see a raw
                        // non-2xx as success.
                        let meta = response.meta();
                        (
                            Error::UnexpectedResponse {
                                status: response.status,
                            },
                            Some(meta),
                        )
                    }
                    Err(err) => (err, Some(response.meta())),
                },
                Err(err) => (err, None),
            };

            let decision = self
                .decide_retry(&ctx, &failure, meta.as_ref(), &policy, &mut consumed_corrections)
                .await;

            match decision {
                RetryDecision::Retry { after } => {
                    warn!(
                        %request_id,
                        attempt,
                        path = %ctx.request.path,
                        delay_ms = after.map(|d| d.as_millis() as u64).unwrap_or(0),
                        error = %failure,
                        "retrying request"
                    );
                    if let Some(delay) = after {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                RetryDecision::DoNotRetry => {
                    debug!(
                        %request_id,
                        attempt,
                        path = %ctx.request.path,
                        error = %failure,
                        "request failed terminally"
                    );
                    return Err(failure);
                }
            }
        }
    }

    /// Run validators in registration order; the first error aborts.
    async fn validate(&self, response: &TransportResponse, ctx: &PipelineContext) -> Result<()> {
        for stage in &self.middleware {
            if let Middleware::Validate(validator) = stage {
                validator.validate(response, ctx).await?;
            }
        }
        Ok(())
    }

    /// Consult retry-decider middleware in order, then the default policy.
    async fn decide_retry(
        &self,
        ctx: &PipelineContext,
        failure: &Error,
        meta: Option<&ResponseMeta>,
        policy: &RetryPolicy,
        consumed_corrections: &mut HashSet<&'static str>,
    ) -> RetryDecision {
        for stage in &self.middleware {
            let Middleware::Retry(decider) = stage else {
                continue;
            };
            if let Some(key) = decider.correction_key() {
                if consumed_corrections.contains(key) {
                    continue;
                }
            }
            if let RetryDecision::Retry { after } = decider.decide(ctx, failure).await {
                if let Some(key) = decider.correction_key() {
                    consumed_corrections.insert(key);
                }
                debug!(
                    request_id = %ctx.request_id,
                    decider = decider.name(),
                    "retry decider requested retry"
                );
                return RetryDecision::Retry { after };
            }
        }

        policy.decide(ctx.attempt, meta, failure, self.clock.now())
    }
}

//! Resilient request pipeline for the Postern client runtime.
//!
//! Callers build an [`ApiRequest`], the [`ApiClient`] applies its ordered
//! middleware list (preparers, validators, retry deciders) around the
//! [`HttpTransport`] seam, and the result is a decoded value or a single
//! terminal error. Retries, delays, and corrective actions stay internal.

pub mod middleware;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod transport;

pub use middleware::{
    AuthorizationPreparer, DeviceTokenValidator, ErrorDecodeValidator, FormEncodePreparer,
    LocalePreparer, Middleware, PathPrefixPreparer, PipelineContext, RequestPreparer,
    ResponseValidator, RetryDecider, SdkHeadersPreparer, StaticQueryPreparer,
};
pub use pipeline::ApiClient;
pub use request::{ApiRequest, Body, Method, PreparedRequest};
pub use response::TransportResponse;
pub use transport::{HttpTransport, ReqwestTransport};

//! HTTP transport seam.
//!
//! A transport performs exactly one network round trip for a fully
//! prepared request. Retry and mutation logic live in the pipeline, never
//! here.

use crate::request::{Body, Method, PreparedRequest};
use crate::response::TransportResponse;
use async_trait::async_trait;
use indexmap::IndexMap;
use postern_core::{Error, Result, TransportErrorKind};
use std::time::Duration;

/// Executes one round trip for a prepared request.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform the round trip, raising a transport error when no response
    /// was received.
    async fn execute(&self, request: &PreparedRequest) -> Result<TransportResponse>;
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for std::sync::Arc<T> {
    async fn execute(&self, request: &PreparedRequest) -> Result<TransportResponse> {
        (**self).execute(request).await
    }
}

/// Production transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    /// Default connect/read timeout applied to the underlying client.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

    /// Create a transport targeting the given base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(Error::config("transport base URL must not be empty"));
        }
        let client = reqwest::Client::builder()
            .timeout(Self::DEFAULT_TIMEOUT)
            .build()
            .map_err(|err| Error::config(format!("http client build failed: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn method_for(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }

    fn classify(err: &reqwest::Error) -> TransportErrorKind {
        if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else {
            TransportErrorKind::Other
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &PreparedRequest) -> Result<TransportResponse> {
        let mut builder = self
            .client
            .request(Self::method_for(request.method), self.url_for(&request.path));

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        builder = match &request.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(value),
            Body::Form(pairs) => builder.form(pairs),
            Body::Raw {
                content_type,
                bytes,
            } => builder
                .header("content-type", content_type)
                .body(bytes.clone()),
        };

        let response = builder
            .send()
            .await
            .map_err(|err| Error::transport(err.to_string(), Self::classify(&err)))?;

        let status = response.status().as_u16();
        let mut headers = IndexMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| Error::transport(err.to_string(), Self::classify(&err)))?
            .to_vec();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

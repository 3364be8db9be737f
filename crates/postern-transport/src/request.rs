//! Logical request model.
//!
//! An [`ApiRequest`] is immutable once built; every pipeline attempt derives
//! a fresh [`PreparedRequest`] copy for the preparer middleware to mutate,
//! so retried attempts never observe leftover state from earlier ones.

use indexmap::IndexMap;
use postern_core::RetryConfig;
use serde::Serialize;

/// HTTP method of a logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl Method {
    /// Canonical wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Whether this method mutates server state.
    pub fn is_mutating(self) -> bool {
        !matches!(self, Method::Get)
    }
}

/// Request body variants understood by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// No body.
    Empty,
    /// JSON-encoded value.
    Json(serde_json::Value),
    /// URL-encoded form pairs.
    Form(Vec<(String, String)>),
    /// Raw bytes with an explicit content type.
    Raw {
        /// MIME type sent in the `Content-Type` header.
        content_type: String,
        /// Body bytes.
        bytes: Vec<u8>,
    },
}

impl Body {
    /// Whether this body carries no payload.
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

/// A logical API request as issued by a caller.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Request path relative to the base URL, e.g. `/v1/client`.
    pub path: String,
    /// HTTP method.
    pub method: Method,
    /// Ordered headers with unique keys.
    pub headers: IndexMap<String, String>,
    /// Query items in append order.
    pub query: Vec<(String, String)>,
    /// Request body.
    pub body: Body,
    /// Per-request retry override; the pipeline default applies when absent.
    pub retry: Option<RetryConfig>,
}

impl ApiRequest {
    /// Start building a request with the given method and path.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            headers: IndexMap::new(),
            query: Vec::new(),
            body: Body::Empty,
            retry: None,
        }
    }

    /// Convenience constructor for a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// Convenience constructor for a POST request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// Convenience constructor for a DELETE request.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Set a header, replacing any existing value for the key.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Append a query item.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Attach a JSON body.
    pub fn with_json<T: Serialize>(mut self, value: &T) -> Self {
        // Serialization of caller-provided values into a Value cannot fail
        // for the plain data types used on this API surface.
        self.body = Body::Json(serde_json::to_value(value).unwrap_or(serde_json::Value::Null));
        self
    }

    /// Attach pre-encoded form pairs.
    pub fn with_form(mut self, pairs: Vec<(String, String)>) -> Self {
        self.body = Body::Form(pairs);
        self
    }

    /// Override the retry configuration for this request only.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Derive the mutable per-attempt copy handed to request preparers.
    pub fn to_prepared(&self) -> PreparedRequest {
        PreparedRequest {
            method: self.method,
            path: self.path.clone(),
            headers: self.headers.clone(),
            query: self.query.clone(),
            body: self.body.clone(),
        }
    }
}

/// The concrete wire request built fresh for each attempt.
///
/// Preparers mutate this copy in registration order; once the transport is
/// invoked the snapshot inside [`crate::middleware::PipelineContext`]
/// becomes read-only.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// HTTP method.
    pub method: Method,
    /// Request path, possibly rewritten by preparers.
    pub path: String,
    /// Ordered headers with unique keys.
    pub headers: IndexMap<String, String>,
    /// Query items.
    pub query: Vec<(String, String)>,
    /// Request body.
    pub body: Body,
}

impl PreparedRequest {
    /// Set a header, replacing any existing value for the key.
    ///
    /// Replacement (not append) keeps preparer re-application idempotent
    /// across retried attempts.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    /// Set a query item, replacing any existing item with the same name.
    pub fn set_query(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(existing) = self.query.iter_mut().find(|(n, _)| *n == name) {
            existing.1 = value;
        } else {
            self.query.push((name, value));
        }
    }

    /// Prefix the path unless the prefix is already applied.
    pub fn apply_path_prefix(&mut self, prefix: &str) {
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() || self.path.starts_with(prefix) {
            return;
        }
        self.path = format!("{prefix}{}", self.path);
    }
}

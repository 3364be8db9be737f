//! Built-in request preparers.

use crate::middleware::RequestPreparer;
use crate::request::{Body, PreparedRequest};
use async_trait::async_trait;
use postern_core::{keys, KeyValueStore, Result};
use std::sync::Arc;

/// Prefixes every request path, used when requests route through a proxy.
pub struct PathPrefixPreparer {
    prefix: String,
}

impl PathPrefixPreparer {
    /// Create a preparer for the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl RequestPreparer for PathPrefixPreparer {
    fn name(&self) -> &'static str {
        "path_prefix"
    }

    async fn prepare(&self, request: &mut PreparedRequest) -> Result<()> {
        request.apply_path_prefix(&self.prefix);
        Ok(())
    }
}

/// Identifies the SDK to the server on every request.
pub struct SdkHeadersPreparer {
    sdk: &'static str,
    version: &'static str,
}

impl SdkHeadersPreparer {
    /// Create a preparer advertising this crate's identity.
    pub fn new() -> Self {
        Self {
            sdk: "postern-rust",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

impl Default for SdkHeadersPreparer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestPreparer for SdkHeadersPreparer {
    fn name(&self) -> &'static str {
        "sdk_headers"
    }

    async fn prepare(&self, request: &mut PreparedRequest) -> Result<()> {
        request.set_header("x-postern-sdk", self.sdk);
        request.set_header("x-postern-sdk-version", self.version);
        Ok(())
    }
}

/// Injects the configured locale as `Accept-Language`.
pub struct LocalePreparer {
    locale: String,
}

impl LocalePreparer {
    /// Create a preparer for the given BCP 47 locale.
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
        }
    }
}

#[async_trait]
impl RequestPreparer for LocalePreparer {
    fn name(&self) -> &'static str {
        "locale"
    }

    async fn prepare(&self, request: &mut PreparedRequest) -> Result<()> {
        request.set_header("accept-language", self.locale.clone());
        Ok(())
    }
}

/// Appends fixed query parameters to every request.
pub struct StaticQueryPreparer {
    pairs: Vec<(String, String)>,
}

impl StaticQueryPreparer {
    /// Create a preparer for the given name/value pairs.
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }
}

#[async_trait]
impl RequestPreparer for StaticQueryPreparer {
    fn name(&self) -> &'static str {
        "static_query"
    }

    async fn prepare(&self, request: &mut PreparedRequest) -> Result<()> {
        for (name, value) in &self.pairs {
            request.set_query(name.clone(), value.clone());
        }
        Ok(())
    }
}

/// Attaches the cached device token as the `Authorization` header.
///
/// Requests go out bare when no token has been stored yet; the server
/// responds with a rotation header once the device is attested.
pub struct AuthorizationPreparer {
    store: Arc<dyn KeyValueStore>,
}

impl AuthorizationPreparer {
    /// Create a preparer reading from the given store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RequestPreparer for AuthorizationPreparer {
    fn name(&self) -> &'static str {
        "authorization"
    }

    async fn prepare(&self, request: &mut PreparedRequest) -> Result<()> {
        if let Some(bytes) = self.store.get(keys::DEVICE_TOKEN).await? {
            if let Ok(token) = String::from_utf8(bytes) {
                request.set_header("authorization", token);
            }
        }
        Ok(())
    }
}

/// Re-encodes JSON object bodies as URL-encoded forms for mutating methods.
///
/// The identity service accepts form submissions on its mutation endpoints;
/// scalar fields map directly, nested values are carried as compact JSON.
pub struct FormEncodePreparer;

#[async_trait]
impl RequestPreparer for FormEncodePreparer {
    fn name(&self) -> &'static str {
        "form_encode"
    }

    async fn prepare(&self, request: &mut PreparedRequest) -> Result<()> {
        if !request.method.is_mutating() {
            return Ok(());
        }
        let Body::Json(serde_json::Value::Object(fields)) = &request.body else {
            return Ok(());
        };
        let pairs = fields
            .iter()
            .map(|(name, value)| {
                let encoded = match value {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                (name.clone(), encoded)
            })
            .collect();
        request.body = Body::Form(pairs);
        Ok(())
    }
}

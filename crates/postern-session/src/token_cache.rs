//! Per-session token cache with coalesced refreshes.

use crate::single_flight::SingleFlight;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use postern_core::{Clock, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::debug;

/// Upper clamp for the expiration buffer.
pub const MAX_EXPIRATION_BUFFER: Duration = Duration::from_secs(60);

/// Cache key: one slot per (session, template-or-none) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenCacheKey {
    /// Session the token belongs to.
    pub session_id: String,
    /// Optional token template name.
    pub template: Option<String>,
}

impl TokenCacheKey {
    /// Build a key.
    pub fn new(session_id: impl Into<String>, template: Option<&str>) -> Self {
        Self {
            session_id: session_id.into(),
            template: template.map(str::to_string),
        }
    }
}

/// A short-lived session token and its expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    /// Raw JWT value handed to callers.
    pub jwt: String,
    /// Expiry as seconds since the Unix epoch, read from the `exp` claim.
    pub expires_at: u64,
}

impl SessionToken {
    /// Build a token from a raw JWT, reading the expiry from its payload.
    pub fn from_jwt(jwt: impl Into<String>) -> Result<Self> {
        let jwt = jwt.into();
        let payload = jwt
            .split('.')
            .nth(1)
            .ok_or_else(|| Error::decode("token is not a JWT"))?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|err| Error::decode(format!("JWT payload is not base64: {err}")))?;
        #[derive(Deserialize)]
        struct Claims {
            exp: u64,
        }
        let claims: Claims = serde_json::from_slice(&bytes)
            .map_err(|err| Error::decode(format!("JWT payload has no usable exp claim: {err}")))?;
        Ok(Self {
            jwt,
            expires_at: claims.exp,
        })
    }

    /// Expiry as a [`SystemTime`].
    pub fn expires_at_time(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(self.expires_at)
    }
}

/// Options for a token lookup.
#[derive(Debug, Clone, Copy)]
pub struct GetTokenOptions {
    /// A cached token within this buffer of its expiry is treated as
    /// expired and refreshed instead. Clamped to [0, 60] seconds.
    pub expiration_buffer: Duration,
    /// Bypass the cache and always fetch fresh.
    pub skip_cache: bool,
}

impl Default for GetTokenOptions {
    fn default() -> Self {
        Self {
            expiration_buffer: Duration::from_secs(10),
            skip_cache: false,
        }
    }
}

/// Cache of session tokens with per-key single-flight refreshes.
///
/// The token map and the in-flight map are only touched behind this
/// struct's own locks; callers across tasks share it through an `Arc`.
pub struct SessionTokenCache {
    clock: Arc<dyn Clock>,
    tokens: Mutex<HashMap<TokenCacheKey, SessionToken>>,
    flights: Mutex<HashMap<TokenCacheKey, Arc<SingleFlight<SessionToken>>>>,
}

impl SessionTokenCache {
    /// Create an empty cache reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            tokens: Mutex::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a token, fetching through `fetch` when the cached value is
    /// missing, within the expiration buffer of its expiry, or skipped.
    ///
    /// Concurrent callers for the same key are coalesced into one fetch;
    /// distinct keys fetch independently.
    pub async fn get_with<F, Fut>(
        &self,
        key: TokenCacheKey,
        options: GetTokenOptions,
        fetch: F,
    ) -> Result<SessionToken>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SessionToken>> + Send + 'static,
    {
        let buffer = options.expiration_buffer.min(MAX_EXPIRATION_BUFFER);

        if !options.skip_cache {
            let tokens = self.tokens.lock().await;
            if let Some(token) = tokens.get(&key) {
                let deadline = token.expires_at_time();
                if self.clock.now() + buffer < deadline {
                    return Ok(token.clone());
                }
            }
        }

        let flight = {
            let mut flights = self.flights.lock().await;
            Arc::clone(
                flights
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(SingleFlight::new())),
            )
        };

        debug!(
            session_id = %key.session_id,
            template = key.template.as_deref().unwrap_or("<none>"),
            skip_cache = options.skip_cache,
            "fetching fresh session token"
        );
        let token = flight.run(fetch).await?;
        self.tokens.lock().await.insert(key, token.clone());
        Ok(token)
    }

    /// Drop every cached token for a session, templates included.
    pub async fn invalidate_session(&self, session_id: &str) {
        self.tokens
            .lock()
            .await
            .retain(|key, _| key.session_id != session_id);
    }

    /// Drop all cached tokens.
    pub async fn clear(&self) {
        self.tokens.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Unsigned test JWT with the given exp claim.
    pub(crate) fn jwt_with_exp(exp: u64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn token_expiry_comes_from_the_exp_claim() {
        let token = SessionToken::from_jwt(jwt_with_exp(1_700_000_100)).unwrap();
        assert_eq!(token.expires_at, 1_700_000_100);
    }

    #[test]
    fn malformed_jwts_are_decode_errors() {
        assert!(SessionToken::from_jwt("not-a-jwt").is_err());
        assert!(SessionToken::from_jwt("a.%%%.c").is_err());
    }
}

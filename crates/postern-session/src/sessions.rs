//! Session operations against the identity service.

use crate::token_cache::{GetTokenOptions, SessionToken, SessionTokenCache, TokenCacheKey};
use postern_core::{Clock, Result};
use postern_transport::{ApiClient, ApiRequest};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Wire shape of a token creation response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    jwt: String,
}

/// Session touch/remove/token operations plus the token cache.
pub struct SessionService {
    api: Arc<ApiClient>,
    cache: SessionTokenCache,
}

impl SessionService {
    /// Create a service issuing requests through `api`.
    pub fn new(api: Arc<ApiClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            api,
            cache: SessionTokenCache::new(clock),
        }
    }

    fn token_path(session_id: &str, template: Option<&str>) -> String {
        match template {
            Some(template) => format!("/v1/client/sessions/{session_id}/tokens/{template}"),
            None => format!("/v1/client/sessions/{session_id}/tokens"),
        }
    }

    /// Get a session token, serving from the cache when it is still fresh.
    ///
    /// Concurrent callers for the same (session, template) pair share one
    /// fetch; see [`SessionTokenCache`].
    pub async fn get_token(
        &self,
        session_id: &str,
        template: Option<&str>,
        options: GetTokenOptions,
    ) -> Result<SessionToken> {
        let key = TokenCacheKey::new(session_id, template);
        let api = Arc::clone(&self.api);
        let path = Self::token_path(session_id, template);
        self.cache
            .get_with(key, options, move || async move {
                let response: TokenResponse = api.send(ApiRequest::post(path)).await?;
                SessionToken::from_jwt(response.jwt)
            })
            .await
    }

    /// Mark the session as active, extending its server-side lifetime.
    pub async fn touch(&self, session_id: &str) -> Result<()> {
        let path = format!("/v1/client/sessions/{session_id}/touch");
        self.api.execute(&ApiRequest::post(path)).await?;
        Ok(())
    }

    /// End the session on the server and drop its cached tokens.
    pub async fn remove(&self, session_id: &str) -> Result<()> {
        let path = format!("/v1/client/sessions/{session_id}/remove");
        self.api.execute(&ApiRequest::post(path)).await?;
        self.cache.invalidate_session(session_id).await;
        debug!(%session_id, "session removed");
        Ok(())
    }

    /// Drop every cached token (used on sign-out).
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }
}

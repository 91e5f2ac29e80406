//! Usage: Request pipeline (cache check -> attach credential -> dispatch -> 401 refresh/replay -> cache write).

use crate::http::cache_key::CacheKey;
use crate::http::cache_store::CacheStore;
use crate::http::credentials::CredentialManager;
use crate::http::request::{ApiRequest, ApiResponse};
use crate::http::transport::Transport;
use crate::shared::error::{ClientError, ClientResult};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use std::sync::Arc;

/// Outcome of the cache stage. `Miss` carries the key to store under when the
/// request is cacheable.
#[derive(Debug)]
pub(crate) enum CacheCheck {
    Hit(ApiResponse),
    Miss(Option<CacheKey>),
}

pub struct RequestPipeline {
    cache: Arc<CacheStore<ApiResponse>>,
    credentials: CredentialManager,
    transport: Arc<dyn Transport>,
}

impl RequestPipeline {
    pub fn new(
        cache: Arc<CacheStore<ApiResponse>>,
        credentials: CredentialManager,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            cache,
            credentials,
            transport,
        }
    }

    pub async fn execute(&self, request: ApiRequest) -> ClientResult<ApiResponse> {
        let cache_key = match self.check_cache(&request) {
            CacheCheck::Hit(response) => return Ok(response),
            CacheCheck::Miss(key) => key,
        };

        let attached = if request.authenticate {
            self.credentials.access_token()
        } else {
            None
        };
        let prepared = prepare(&request, attached.as_deref())?;
        let response = self.transport.send(prepared).await?;

        if !request.authenticate || !response.is_unauthorized() {
            self.store_if_cacheable(cache_key, &response);
            return Ok(response);
        }

        tracing::debug!(
            method = %request.method,
            path = %request.path,
            "request unauthorized; waiting for credential refresh"
        );
        let grant = self
            .credentials
            .refresh_after_unauthorized(attached.as_deref())
            .await?;
        if let Some(turn) = grant.turn.as_ref() {
            turn.ready().await;
        }

        let prepared = prepare(&request, Some(grant.access_token.as_str()))?;
        let pending = self.transport.send(prepared);
        // Hand-off order is fixed once `send` returns; let the next replay go.
        drop(grant);
        let response = pending.await?;

        if response.is_unauthorized() {
            tracing::warn!(
                method = %request.method,
                path = %request.path,
                "request still unauthorized after refresh; giving up"
            );
            return Err(ClientError::RetryExhausted {
                method: request.method.to_string(),
                path: request.path.clone(),
            });
        }

        self.store_if_cacheable(cache_key, &response);
        Ok(response)
    }

    pub fn invalidate(&self, request: &ApiRequest) -> bool {
        self.cache.invalidate(&CacheKey::for_request(request))
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub(crate) fn check_cache(&self, request: &ApiRequest) -> CacheCheck {
        if !request.is_read() {
            return CacheCheck::Miss(None);
        }

        let key = CacheKey::for_request(request);
        match self.cache.get(&key) {
            Some(entry) => {
                tracing::debug!(key = %key, "cache hit");
                CacheCheck::Hit(entry.payload.served_from_cache())
            }
            None => {
                tracing::debug!(key = %key, "cache miss");
                CacheCheck::Miss(Some(key))
            }
        }
    }

    fn store_if_cacheable(&self, key: Option<CacheKey>, response: &ApiResponse) {
        let Some(key) = key else {
            return;
        };
        if response.is_success() {
            self.cache.put(key, response.clone());
        }
    }
}

fn prepare(request: &ApiRequest, access_token: Option<&str>) -> ClientResult<ApiRequest> {
    let mut prepared = request.clone();
    if let Some(token) = access_token {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
            ClientError::InvalidRequest(format!("access credential is not a valid header: {e}"))
        })?;
        value.set_sensitive(true);
        prepared.headers.insert(AUTHORIZATION, value);
    }
    Ok(prepared)
}

//! Usage: In-process transport and refresh endpoint doubles for unit tests.

use crate::http::refresh::{RefreshEndpoint, TokenSet};
use crate::http::request::{ApiRequest, ApiResponse, ResponseSource};
use crate::http::transport::{BoxFuture, Transport};
use crate::shared::error::ClientResult;
use bytes::Bytes;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::StatusCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub(crate) struct FakeEndpoint {
    calls: AtomicUsize,
    pub(crate) seen: Mutex<Vec<String>>,
    release: Semaphore,
    result: ClientResult<TokenSet>,
}

impl FakeEndpoint {
    /// Every refresh blocks until `release` is called.
    pub(crate) fn held(result: ClientResult<TokenSet>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            release: Semaphore::new(0),
            result,
        })
    }

    pub(crate) fn immediate(result: ClientResult<TokenSet>) -> Arc<Self> {
        let endpoint = Self::held(result);
        endpoint.release.add_permits(Semaphore::MAX_PERMITS / 2);
        endpoint
    }

    pub(crate) fn release(&self) {
        self.release.add_permits(1);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RefreshEndpoint for FakeEndpoint {
    fn refresh(&self, refresh_token: String) -> BoxFuture<'_, ClientResult<TokenSet>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(refresh_token);
        Box::pin(async move {
            let permit = self.release.acquire().await.expect("semaphore open");
            permit.forget();
            self.result.clone()
        })
    }
}

pub(crate) fn tokens(access: &str, refresh: Option<&str>) -> ClientResult<TokenSet> {
    Ok(TokenSet {
        access_token: access.to_string(),
        refresh_token: refresh.map(str::to_string),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SentRequest {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) authorization: Option<String>,
}

type Responder = dyn Fn(&ApiRequest) -> ClientResult<(StatusCode, &'static str)> + Send + Sync;

/// Records every `send` in call order and answers from a closure.
pub(crate) struct ScriptedTransport {
    sent: Mutex<Vec<SentRequest>>,
    responder: Box<Responder>,
}

impl ScriptedTransport {
    pub(crate) fn new(
        responder: impl Fn(&ApiRequest) -> ClientResult<(StatusCode, &'static str)>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        })
    }

    /// 200 with `body` when the bearer credential is `valid_token`, 401 otherwise.
    pub(crate) fn accepting(valid_token: &'static str, body: &'static str) -> Arc<Self> {
        Self::new(move |request| {
            if bearer(request).as_deref() == Some(valid_token) {
                Ok((StatusCode::OK, body))
            } else {
                Ok((StatusCode::UNAUTHORIZED, r#"{"error":"token expired"}"#))
            }
        })
    }

    pub(crate) fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, ClientResult<ApiResponse>> {
        self.sent.lock().unwrap().push(SentRequest {
            method: request.method.to_string(),
            path: request.path.clone(),
            authorization: request
                .headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        });
        let outcome = (self.responder)(&request);
        Box::pin(async move {
            let (status, body) = outcome?;
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok(ApiResponse {
                status,
                headers: HeaderMap::new(),
                body: Bytes::from_static(body.as_bytes()),
                source: ResponseSource::Network,
            })
        })
    }
}

pub(crate) fn bearer(request: &ApiRequest) -> Option<String> {
    request
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

pub(crate) async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

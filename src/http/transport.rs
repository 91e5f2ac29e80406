//! Usage: Network dispatch seam (`Transport`) and its reqwest implementation.

use crate::http::request::{ApiRequest, ApiResponse, ResponseSource};
use crate::shared::error::{ClientError, ClientResult};
use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Sends one fully prepared request.
///
/// `send` itself must not await. The request is handed off when `send`
/// returns, so the order of `send` calls is the hand-off order; when bytes
/// reach the wire depends on how the returned future is polled.
pub trait Transport: Send + Sync {
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, ClientResult<ApiResponse>>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client, base_url: &str) -> ClientResult<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url)
            .map_err(|e| ClientError::Config(format!("invalid base_url {base_url}: {e}")))?;
        Ok(Self { client, base_url })
    }

    pub(crate) fn url_for(&self, path: &str) -> String {
        let path = path.trim();
        if path.is_empty() {
            return self.base_url.clone();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, ClientResult<ApiResponse>> {
        let ApiRequest {
            method,
            path,
            query,
            headers,
            body,
            ..
        } = request;
        let url = self.url_for(&path);
        let mut builder = self
            .client
            .request(method.clone(), url.as_str())
            .headers(headers);
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        Box::pin(async move {
            let response = builder
                .send()
                .await
                .map_err(|e| ClientError::Transport(format!("{method} {url} failed: {e}")))?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(|e| {
                ClientError::Transport(format!("{method} {url} body read failed: {e}"))
            })?;
            Ok(ApiResponse {
                status,
                headers,
                body,
                source: ResponseSource::Network,
            })
        })
    }
}

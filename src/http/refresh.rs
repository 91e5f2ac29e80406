//! Usage: Credential-issuing endpoint (refresh_token grant) behind the `RefreshEndpoint` seam.

use crate::http::transport::BoxFuture;
use crate::shared::error::{ClientError, ClientResult};
use crate::shared::security::mask_token;
use serde_json::Value;
use std::collections::HashMap;

const ERROR_BODY_SNIPPET_MAX_CHARS: usize = 500;
const ERROR_MESSAGE_MAX_CHARS: usize = 240;

/// Credentials minted by a successful refresh. A missing `refresh_token`
/// means the server did not rotate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

pub trait RefreshEndpoint: Send + Sync {
    fn refresh(&self, refresh_token: String) -> BoxFuture<'_, ClientResult<TokenSet>>;
}

#[derive(Debug, Clone)]
pub struct HttpRefreshEndpoint {
    client: reqwest::Client,
    token_url: String,
    client_id: Option<String>,
}

impl HttpRefreshEndpoint {
    pub fn new(client: reqwest::Client, token_url: &str, client_id: Option<String>) -> Self {
        Self {
            client,
            token_url: token_url.trim().to_string(),
            client_id: client_id
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        }
    }
}

impl RefreshEndpoint for HttpRefreshEndpoint {
    fn refresh(&self, refresh_token: String) -> BoxFuture<'_, ClientResult<TokenSet>> {
        Box::pin(async move {
            let mut form: HashMap<&str, String> = HashMap::new();
            form.insert("grant_type", "refresh_token".to_string());
            form.insert("refresh_token", refresh_token.trim().to_string());
            if let Some(client_id) = self.client_id.as_deref() {
                form.insert("client_id", client_id.to_string());
            }

            let response = self
                .client
                .post(self.token_url.as_str())
                .form(&form)
                .send()
                .await
                .map_err(|e| ClientError::RefreshFailed(format!("refresh request failed: {e}")))?;

            let status = response.status();
            let body = response.text().await.map_err(|e| {
                ClientError::RefreshFailed(format!("refresh response read failed: {e}"))
            })?;
            parse_token_response(status, &body)
        })
    }
}

pub(crate) fn parse_token_response(status: reqwest::StatusCode, body: &str) -> ClientResult<TokenSet> {
    if !status.is_success() {
        let (error_code, error_message) = parse_oauth_error_details(body);
        let mut msg = format!("token endpoint returned status={}", status.as_u16());
        if let Some(code) = error_code {
            msg.push_str(" code=");
            msg.push_str(code.as_str());
        }
        if let Some(detail) = error_message {
            msg.push_str(" message=");
            msg.push_str(truncate_chars(&detail, ERROR_MESSAGE_MAX_CHARS).as_str());
        }
        msg.push_str(" body=");
        msg.push_str(error_body_snippet(body).as_str());
        return Err(ClientError::RefreshFailed(msg));
    }

    let value: Value = serde_json::from_str(body)
        .map_err(|e| ClientError::RefreshFailed(format!("token response json invalid: {e}")))?;

    let access_token = first_non_empty_str(&value, &["access_token", "accessToken"])
        .ok_or_else(|| {
            ClientError::RefreshFailed("token response missing access_token".to_string())
        })?;
    let refresh_token = first_non_empty_str(&value, &["refresh_token", "refreshToken"]);

    Ok(TokenSet {
        access_token,
        refresh_token,
    })
}

fn first_non_empty_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        value
            .get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

/// Header and field names whose string values are credentials.
fn is_sensitive_key(key: &str) -> bool {
    let key = key.trim().to_ascii_lowercase();
    matches!(key.as_str(), "authorization" | "proxy-authorization")
        || key.contains("token")
        || key.contains("secret")
}

/// Masks credential-looking string values at any depth.
fn mask_credentials_in(value: &mut Value) {
    match value {
        Value::Object(map) => map.iter_mut().for_each(|(key, nested)| match nested {
            Value::String(raw) if is_sensitive_key(key) => *raw = mask_token(raw),
            other => mask_credentials_in(other),
        }),
        Value::Array(items) => items.iter_mut().for_each(mask_credentials_in),
        _ => {}
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Error bodies end up in `RefreshFailed` messages and logs; JSON bodies are
/// re-encoded with credentials masked, anything else is only truncated.
fn error_body_snippet(body: &str) -> String {
    let masked = serde_json::from_str::<Value>(body).ok().and_then(|mut value| {
        mask_credentials_in(&mut value);
        serde_json::to_string(&value).ok()
    });
    truncate_chars(masked.as_deref().unwrap_or(body), ERROR_BODY_SNIPPET_MAX_CHARS)
}

/// `(code, message)` from the shapes token endpoints use:
/// `{"error":"x","error_description":".."}`, `{"error":{"type":"x","message":".."}}`
/// and a top-level `code`/`message`.
fn parse_oauth_error_details(body: &str) -> (Option<String>, Option<String>) {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return (None, None);
    };
    let nested = value.get("error");

    let code = first_non_empty_str(&value, &["code"])
        .or_else(|| {
            nested
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
        .or_else(|| nested.and_then(|e| first_non_empty_str(e, &["code", "type"])));
    let message = first_non_empty_str(&value, &["error_description", "message"])
        .or_else(|| nested.and_then(|e| first_non_empty_str(e, &["message"])));

    (code, message)
}

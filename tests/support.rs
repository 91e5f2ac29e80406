#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use hub_http_client::ClientSettings;
use std::collections::HashMap;
use std::ffi::OsString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use tokio::sync::oneshot;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct EnvRestore {
    saved: Vec<(&'static str, Option<OsString>)>,
}

impl EnvRestore {
    fn save_once(&mut self, key: &'static str) {
        if self.saved.iter().any(|(k, _)| *k == key) {
            return;
        }
        self.saved.push((key, std::env::var_os(key)));
    }

    pub fn set_var(&mut self, key: &'static str, value: impl Into<OsString>) {
        self.save_once(key);
        std::env::set_var(key, value.into());
    }

    pub fn remove_var(&mut self, key: &'static str) {
        self.save_once(key);
        std::env::remove_var(key);
    }
}

impl Drop for EnvRestore {
    fn drop(&mut self) {
        for (key, value) in self.saved.drain(..).rev() {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
}

struct HubState {
    valid_token: Mutex<String>,
    requests: Mutex<Vec<Recorded>>,
    refresh_calls: AtomicUsize,
    refresh_tokens_seen: Mutex<Vec<String>>,
    refresh_delay: Duration,
    refresh_fails: bool,
}

impl HubState {
    fn record(&self, method: &Method, path: &str, headers: &HeaderMap) -> bool {
        let authorization = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let valid = format!("Bearer {}", self.valid_token.lock().unwrap());
        let authorized = authorization.as_deref() == Some(valid.as_str());
        self.requests.lock().unwrap().push(Recorded {
            method: method.to_string(),
            path: path.to_string(),
            authorization,
        });
        authorized
    }
}

/// Loopback course-hub API with a refresh endpoint at `/auth/refresh`.
pub struct MockHub {
    pub base_url: String,
    state: Arc<HubState>,
    shutdown: Option<oneshot::Sender<()>>,
}

pub struct MockHubOptions {
    pub valid_token: &'static str,
    pub refresh_delay: Duration,
    pub refresh_fails: bool,
}

impl Default for MockHubOptions {
    fn default() -> Self {
        Self {
            valid_token: "T2",
            refresh_delay: Duration::from_millis(0),
            refresh_fails: false,
        }
    }
}

impl MockHub {
    pub async fn start(options: MockHubOptions) -> Self {
        let state = Arc::new(HubState {
            valid_token: Mutex::new(options.valid_token.to_string()),
            requests: Mutex::new(Vec::new()),
            refresh_calls: AtomicUsize::new(0),
            refresh_tokens_seen: Mutex::new(Vec::new()),
            refresh_delay: options.refresh_delay,
            refresh_fails: options.refresh_fails,
        });

        let router = Router::new()
            .route("/courses", post(create_course))
            .route("/courses/:id", get(course))
            .route("/admin", get(admin))
            .route("/auth/refresh", post(refresh))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock hub");
        let addr = listener.local_addr().expect("local addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn settings(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.base_url.clone(),
            ..ClientSettings::default()
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.state.refresh_tokens_seen.lock().unwrap().clone()
    }
}

impl Drop for MockHub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn course(
    State(state): State<Arc<HubState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !state.record(&Method::GET, &format!("/courses/{id}"), &headers) {
        return unauthorized();
    }
    Json(serde_json::json!({ "id": id, "title": format!("Course {id}") })).into_response()
}

async fn create_course(State(state): State<Arc<HubState>>, headers: HeaderMap) -> Response {
    if !state.record(&Method::POST, "/courses", &headers) {
        return unauthorized();
    }
    (StatusCode::CREATED, Json(serde_json::json!({ "id": "new" }))).into_response()
}

async fn admin(State(state): State<Arc<HubState>>, headers: HeaderMap) -> Response {
    state.record(&Method::GET, "/admin", &headers);
    unauthorized()
}

async fn refresh(
    State(state): State<Arc<HubState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let refresh_token = form.get("refresh_token").cloned().unwrap_or_default();
    state
        .refresh_tokens_seen
        .lock()
        .unwrap()
        .push(refresh_token.clone());
    tokio::time::sleep(state.refresh_delay).await;

    if state.refresh_fails || form.get("grant_type").map(String::as_str) != Some("refresh_token") {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "refresh token revoked"
            })),
        )
            .into_response();
    }

    let access_token = state.valid_token.lock().unwrap().clone();
    Json(serde_json::json!({
        "access_token": access_token,
        "refresh_token": format!("{refresh_token}-next"),
        "token_type": "Bearer"
    }))
    .into_response()
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": "token expired" })),
    )
        .into_response()
}

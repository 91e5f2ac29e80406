//! Usage: `Client` facade (builder, request helpers, login/logout, lifecycle).

use crate::http::cache_store::CacheStore;
use crate::http::credentials::CredentialManager;
use crate::http::pipeline::RequestPipeline;
use crate::http::refresh::{HttpRefreshEndpoint, RefreshEndpoint};
use crate::http::request::{ApiRequest, ApiResponse};
use crate::http::session::{SessionEvent, SessionEvents};
use crate::http::transport::{ReqwestTransport, Transport};
use crate::infra::credential_store::{CredentialStore, MemoryCredentialStore, SqliteCredentialStore};
use crate::infra::db::Db;
use crate::infra::settings::ClientSettings;
use crate::shared::error::{ClientError, ClientResult};
use crate::shared::mutex_ext::MutexExt;
use crate::shared::time::{Clock, SystemClock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

pub struct ClientBuilder {
    settings: ClientSettings,
    credential_store: Option<Arc<dyn CredentialStore>>,
    clock: Option<Arc<dyn Clock>>,
    transport: Option<Arc<dyn Transport>>,
    refresh_endpoint: Option<Arc<dyn RefreshEndpoint>>,
}

impl ClientBuilder {
    pub fn new(settings: ClientSettings) -> Self {
        Self {
            settings,
            credential_store: None,
            clock: None,
            transport: None,
            refresh_endpoint: None,
        }
    }

    /// Overrides the store picked from `credentials_db`.
    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn refresh_endpoint(mut self, endpoint: Arc<dyn RefreshEndpoint>) -> Self {
        self.refresh_endpoint = Some(endpoint);
        self
    }

    /// Must run inside a tokio runtime when `cache_sweep_interval_secs > 0`.
    pub fn build(self) -> ClientResult<Client> {
        let mut settings = self.settings;
        settings.sanitize();
        settings.validate()?;

        let sweep_interval = settings.cache_sweep_interval();
        let runtime = match sweep_interval {
            Some(_) => Some(tokio::runtime::Handle::try_current().map_err(|_| {
                ClientError::Config("cache sweeping requires a tokio runtime".to_string())
            })?),
            None => None,
        };

        let request_timeout = settings.request_timeout();
        let mut http: Option<reqwest::Client> = None;
        let mut http_client = || -> ClientResult<reqwest::Client> {
            if let Some(client) = http.as_ref() {
                return Ok(client.clone());
            }
            let client = build_http_client(request_timeout)?;
            http = Some(client.clone());
            Ok(client)
        };

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(http_client()?, &settings.base_url)?),
        };
        let refresh_endpoint: Arc<dyn RefreshEndpoint> = match self.refresh_endpoint {
            Some(endpoint) => endpoint,
            None => Arc::new(HttpRefreshEndpoint::new(
                http_client()?,
                &settings.resolved_token_url(),
                settings.client_id.clone(),
            )),
        };

        let credential_store: Arc<dyn CredentialStore> = match self.credential_store {
            Some(store) => store,
            None => match settings.credentials_db.as_deref() {
                Some(path) => Arc::new(SqliteCredentialStore::new(Db::open(path)?)),
                None => Arc::new(MemoryCredentialStore::default()),
            },
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let events = SessionEvents::new();
        let cache = Arc::new(CacheStore::new(settings.cache_ttl(), clock));
        let credentials = CredentialManager::new(credential_store, refresh_endpoint, events.clone());
        let pipeline = RequestPipeline::new(Arc::clone(&cache), credentials.clone(), transport);

        let sweeper = match (sweep_interval, runtime) {
            (Some(interval), Some(runtime)) => {
                Some(spawn_sweeper(&runtime, Arc::clone(&cache), interval))
            }
            _ => None,
        };

        tracing::info!(
            base_url = %settings.base_url,
            cache_ttl_ms = settings.cache_ttl_ms,
            sweep_interval_secs = settings.cache_sweep_interval_secs,
            persistent_credentials = settings.credentials_db.is_some(),
            "client ready"
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                pipeline,
                credentials,
                cache,
                events,
                closed: AtomicBool::new(false),
                sweeper: Mutex::new(sweeper),
            }),
        })
    }
}

fn build_http_client(timeout: Option<Duration>) -> ClientResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| ClientError::Config(format!("failed to build http client: {e}")))
}

struct Sweeper {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

fn spawn_sweeper(
    runtime: &tokio::runtime::Handle,
    cache: Arc<CacheStore<ApiResponse>>,
    interval: Duration,
) -> Sweeper {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let task = runtime.spawn(async move {
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {
                    let pruned = cache.prune_expired();
                    if pruned > 0 {
                        tracing::debug!(pruned, remaining = cache.len(), "cache sweep");
                    }
                }
            }
        }
        tracing::debug!("cache sweeper stopped");
    });
    Sweeper {
        shutdown: shutdown_tx,
        task,
    }
}

struct ClientInner {
    pipeline: RequestPipeline,
    credentials: CredentialManager,
    cache: Arc<CacheStore<ApiResponse>>,
    events: SessionEvents,
    closed: AtomicBool,
    sweeper: Mutex<Option<Sweeper>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.lock_or_recover().take() {
            let _ = sweeper.shutdown.send(());
        }
    }
}

/// Cheap to clone; all clones share one cache and one credential session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("cached_entries", &self.inner.cache.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Client {
    pub fn builder(settings: ClientSettings) -> ClientBuilder {
        ClientBuilder::new(settings)
    }

    /// Settings from `HUB_CLIENT_*` only, real network and clock.
    pub fn from_env() -> ClientResult<Self> {
        ClientBuilder::new(ClientSettings::load(None)?).build()
    }

    pub async fn execute(&self, request: ApiRequest) -> ClientResult<ApiResponse> {
        self.ensure_open()?;
        self.inner.pipeline.execute(request).await
    }

    pub async fn get(&self, path: &str) -> ClientResult<ApiResponse> {
        self.execute(ApiRequest::get(path)).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> ClientResult<ApiResponse> {
        self.execute(ApiRequest::post(path).json(body)?).await
    }

    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> ClientResult<ApiResponse> {
        self.execute(ApiRequest::put(path).json(body)?).await
    }

    pub async fn delete(&self, path: &str) -> ClientResult<ApiResponse> {
        self.execute(ApiRequest::delete(path)).await
    }

    pub fn login(
        &self,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
    ) -> ClientResult<()> {
        self.ensure_open()?;
        self.inner.credentials.set_credentials(access_token, refresh_token)
    }

    /// Clears credentials only; cached reads stay until they expire or `clear_cache`.
    pub fn logout(&self) -> ClientResult<()> {
        self.ensure_open()?;
        self.inner.credentials.clear()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.credentials.access_token()
    }

    pub fn invalidate(&self, request: &ApiRequest) -> bool {
        self.inner.pipeline.invalidate(request)
    }

    pub fn clear_cache(&self) {
        self.inner.pipeline.clear_cache();
    }

    pub fn cached_entries(&self) -> usize {
        self.inner.cache.len()
    }

    pub fn subscribe_session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stops the sweeper and drops every cached entry. Idempotent. Calls
    /// already inside the pipeline finish normally.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let sweeper = self.inner.sweeper.lock_or_recover().take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.shutdown.send(());
            if let Err(err) = sweeper.task.await {
                tracing::warn!("cache sweeper ended abnormally: {err}");
            }
        }
        self.inner.cache.clear();
        tracing::info!("client closed");
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        Ok(())
    }
}

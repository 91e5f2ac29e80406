//! Usage: Client settings (schema, TOML read/write, env overrides, sanitize pass).

use crate::shared::error::{ClientError, ClientResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "HUB_CLIENT_";
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_TOKEN_PATH: &str = "/auth/refresh";
pub const DEFAULT_CACHE_TTL_MS: u64 = 5 * 60 * 1000;
const MAX_CACHE_TTL_MS: u64 = 24 * 60 * 60 * 1000;
const MAX_REQUEST_TIMEOUT_SECS: u64 = 10 * 60;
const MAX_CACHE_SWEEP_INTERVAL_SECS: u64 = 60 * 60;
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub base_url: String,
    /// Absolute URL, or a path resolved against `base_url`.
    pub token_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub cache_ttl_ms: u64,
    /// 0 = disabled.
    pub request_timeout_secs: u64,
    /// 0 = no background sweep; expired entries are still evicted on read.
    pub cache_sweep_interval_secs: u64,
    /// SQLite file for persisted credentials; in-memory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_db: Option<PathBuf>,
    pub log_filter: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token_url: DEFAULT_TOKEN_PATH.to_string(),
            client_id: None,
            cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
            request_timeout_secs: 0,
            cache_sweep_interval_secs: 0,
            credentials_db: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_dir: None,
        }
    }
}

impl ClientSettings {
    /// File (when given and present), then `HUB_CLIENT_*` overrides, then sanitize.
    pub fn load(path: Option<&Path>) -> ClientResult<Self> {
        let mut settings = match path {
            Some(path) => Self::read(path)?,
            None => Self::default(),
        };
        settings.apply_env_overrides();
        settings.sanitize();
        Ok(settings)
    }

    /// A missing file yields defaults.
    pub fn read(path: &Path) -> ClientResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "settings file not found; using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ClientResult<Self> {
        let mut settings: Self = toml::from_str(content)
            .map_err(|e| ClientError::Config(format!("failed to parse settings: {e}")))?;
        settings.sanitize();
        Ok(settings)
    }

    pub fn write(&self, path: &Path) -> ClientResult<()> {
        self.validate()?;
        let content = toml::to_string_pretty(self)
            .map_err(|e| ClientError::Config(format!("failed to serialize settings: {e}")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ClientError::Config(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, content).map_err(|e| {
            ClientError::Config(format!("failed to write {}: {e}", tmp_path.display()))
        })?;
        std::fs::rename(&tmp_path, path).map_err(|e| {
            ClientError::Config(format!("failed to replace {}: {e}", path.display()))
        })?;
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_get(|key| env::var(key).ok());
    }

    fn apply_env_overrides_get(&mut self, mut get: impl FnMut(&str) -> Option<String>) {
        let mut var = |name: &str| {
            get(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = var("BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = var("TOKEN_URL") {
            self.token_url = v;
        }
        if let Some(v) = var("CACHE_TTL_MS").as_deref().and_then(parse_u64_trimmed) {
            self.cache_ttl_ms = v;
        }
        if let Some(v) = var("REQUEST_TIMEOUT_SECS")
            .as_deref()
            .and_then(parse_u64_trimmed)
        {
            self.request_timeout_secs = v;
        }
        if let Some(v) = var("CACHE_SWEEP_INTERVAL_SECS")
            .as_deref()
            .and_then(parse_u64_trimmed)
        {
            self.cache_sweep_interval_secs = v;
        }
        if let Some(v) = var("CREDENTIALS_DB") {
            self.credentials_db = Some(PathBuf::from(v));
        }
        if let Some(v) = var("LOG_FILTER") {
            self.log_filter = v;
        }
        if let Some(v) = var("LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
    }

    /// Repairs out-of-range values in place. Returns whether anything changed.
    pub fn sanitize(&mut self) -> bool {
        let mut changed = false;

        let base_url = self.base_url.trim().trim_end_matches('/').to_string();
        if base_url != self.base_url {
            self.base_url = base_url;
            changed = true;
        }
        if self.base_url.is_empty() {
            self.base_url = DEFAULT_BASE_URL.to_string();
            changed = true;
        }

        let token_url = self.token_url.trim().to_string();
        if token_url.is_empty() {
            self.token_url = DEFAULT_TOKEN_PATH.to_string();
            changed = true;
        } else if token_url != self.token_url {
            self.token_url = token_url;
            changed = true;
        }

        if self.client_id.as_deref().is_some_and(|v| v.trim().is_empty()) {
            self.client_id = None;
            changed = true;
        }

        if self.cache_ttl_ms == 0 {
            self.cache_ttl_ms = DEFAULT_CACHE_TTL_MS;
            changed = true;
        }
        if self.cache_ttl_ms > MAX_CACHE_TTL_MS {
            self.cache_ttl_ms = MAX_CACHE_TTL_MS;
            changed = true;
        }
        if self.request_timeout_secs > MAX_REQUEST_TIMEOUT_SECS {
            self.request_timeout_secs = MAX_REQUEST_TIMEOUT_SECS;
            changed = true;
        }
        if self.cache_sweep_interval_secs > MAX_CACHE_SWEEP_INTERVAL_SECS {
            self.cache_sweep_interval_secs = MAX_CACHE_SWEEP_INTERVAL_SECS;
            changed = true;
        }

        if self.log_filter.trim().is_empty() {
            self.log_filter = DEFAULT_LOG_FILTER.to_string();
            changed = true;
        }

        changed
    }

    pub fn validate(&self) -> ClientResult<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ClientError::Config(format!(
                "base_url must be an http(s) URL: {}",
                self.base_url
            )));
        }
        if self.cache_ttl_ms == 0 || self.cache_ttl_ms > MAX_CACHE_TTL_MS {
            return Err(ClientError::Config(format!(
                "cache_ttl_ms must be between 1 and {MAX_CACHE_TTL_MS}"
            )));
        }
        if self.request_timeout_secs > MAX_REQUEST_TIMEOUT_SECS {
            return Err(ClientError::Config(format!(
                "request_timeout_secs must be <= {MAX_REQUEST_TIMEOUT_SECS}"
            )));
        }
        if self.cache_sweep_interval_secs > MAX_CACHE_SWEEP_INTERVAL_SECS {
            return Err(ClientError::Config(format!(
                "cache_sweep_interval_secs must be <= {MAX_CACHE_SWEEP_INTERVAL_SECS}"
            )));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn cache_sweep_interval(&self) -> Option<Duration> {
        (self.cache_sweep_interval_secs > 0)
            .then(|| Duration::from_secs(self.cache_sweep_interval_secs))
    }

    pub fn resolved_token_url(&self) -> String {
        if self.token_url.starts_with("http://") || self.token_url.starts_with("https://") {
            return self.token_url.clone();
        }
        let path = self.token_url.trim_start_matches('/');
        format!("{}/{path}", self.base_url)
    }
}

fn parse_u64_trimmed(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<u64>().ok()
}

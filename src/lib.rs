//! Authenticated HTTP client layer: TTL response cache, single-flight credential
//! refresh with FIFO replay, and a durable credential store.

mod client;
pub mod http;
pub mod infra;
pub mod shared;

pub use client::{Client, ClientBuilder};
pub use http::cache_key::CacheKey;
pub use http::cache_store::{CacheStore, CachedEntry, DEFAULT_CACHE_TTL};
pub use http::credentials::{CredentialManager, RefreshGrant};
pub use http::refresh::{HttpRefreshEndpoint, RefreshEndpoint, TokenSet};
pub use http::request::{ApiRequest, ApiResponse, ResponseSource};
pub use http::session::{SessionEvent, SessionEvents};
pub use http::transport::{BoxFuture, ReqwestTransport, Transport};
pub use infra::credential_store::{
    CredentialStore, MemoryCredentialStore, SqliteCredentialStore, StoredCredentials,
};
pub use infra::db::Db;
pub use infra::settings::ClientSettings;
pub use shared::error::{ClientError, ClientResult};
pub use shared::time::{Clock, ManualClock, SystemClock};

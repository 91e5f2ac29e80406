//! Usage: Durable mirror of the access/refresh credentials (memory or SQLite).

use crate::infra::db::Db;
use crate::shared::error::{db_err, ClientResult};
use crate::shared::mutex_ext::MutexExt;
use crate::shared::time::now_unix_seconds;
use rusqlite::{params, OptionalExtension};
use std::sync::Mutex;

const ACCESS_TOKEN_KEY: &str = "auth.access_token";
const REFRESH_TOKEN_KEY: &str = "auth.refresh_token";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredCredentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl StoredCredentials {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

/// Synchronous store; writes happen in the same critical section as the
/// in-memory credential change they mirror.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> ClientResult<StoredCredentials>;
    fn save(&self, credentials: &StoredCredentials) -> ClientResult<()>;
    fn clear(&self) -> ClientResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<StoredCredentials>,
}

impl MemoryCredentialStore {
    pub fn new(initial: StoredCredentials) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> ClientResult<StoredCredentials> {
        Ok(self.inner.lock_or_recover().clone())
    }

    fn save(&self, credentials: &StoredCredentials) -> ClientResult<()> {
        *self.inner.lock_or_recover() = credentials.clone();
        Ok(())
    }

    fn clear(&self) -> ClientResult<()> {
        *self.inner.lock_or_recover() = StoredCredentials::default();
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SqliteCredentialStore {
    db: Db,
}

impl SqliteCredentialStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn load(&self) -> ClientResult<StoredCredentials> {
        let conn = self.db.open_connection()?;
        let mut stmt = conn
            .prepare_cached("SELECT value FROM kv_store WHERE key = ?1")
            .map_err(|e| db_err!("failed to prepare credential query: {e}"))?;
        let mut read = |key: &str| -> ClientResult<Option<String>> {
            stmt.query_row(params![key], |row| row.get::<_, String>(0))
                .optional()
                .map_err(|e| db_err!("failed to read {key}: {e}"))
        };

        Ok(StoredCredentials {
            access_token: read(ACCESS_TOKEN_KEY)?,
            refresh_token: read(REFRESH_TOKEN_KEY)?,
        })
    }

    fn save(&self, credentials: &StoredCredentials) -> ClientResult<()> {
        let mut conn = self.db.open_connection()?;
        let tx = conn
            .transaction()
            .map_err(|e| db_err!("failed to start credential transaction: {e}"))?;
        let now = now_unix_seconds();

        for (key, value) in [
            (ACCESS_TOKEN_KEY, credentials.access_token.as_deref()),
            (REFRESH_TOKEN_KEY, credentials.refresh_token.as_deref()),
        ] {
            let written = match value {
                Some(value) => tx.execute(
                    r#"
INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
"#,
                    params![key, value, now],
                ),
                None => tx.execute("DELETE FROM kv_store WHERE key = ?1", params![key]),
            };
            written.map_err(|e| db_err!("failed to write {key}: {e}"))?;
        }

        tx.commit()
            .map_err(|e| db_err!("failed to commit credentials: {e}"))
    }

    fn clear(&self) -> ClientResult<()> {
        self.save(&StoredCredentials::default())
    }
}

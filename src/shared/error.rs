//! Usage: Unified client error model (stable codes + `CODE: message` display).

pub type ClientResult<T> = Result<T, ClientError>;

/// Every failure surfaced by the client. Payloads are plain strings so one
/// refresh failure can be cloned to every queued caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP_TRANSPORT: {0}")]
    Transport(String),
    #[error("AUTH_REFRESH_FAILED: {0}")]
    RefreshFailed(String),
    #[error("AUTH_RETRY_EXHAUSTED: {method} {path} still unauthorized after credential refresh")]
    RetryExhausted { method: String, path: String },
    #[error("HTTP_STATUS: status={status} body={body}")]
    Status { status: u16, body: String },
    #[error("STORAGE_ERROR: {0}")]
    Storage(String),
    #[error("CONFIG_INVALID: {0}")]
    Config(String),
    #[error("INVALID_REQUEST: {0}")]
    InvalidRequest(String),
    #[error("CLIENT_CLOSED: client has been closed")]
    Closed,
}

impl ClientError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "HTTP_TRANSPORT",
            Self::RefreshFailed(_) => "AUTH_REFRESH_FAILED",
            Self::RetryExhausted { .. } => "AUTH_RETRY_EXHAUSTED",
            Self::Status { .. } => "HTTP_STATUS",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Config(_) => "CONFIG_INVALID",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Closed => "CLIENT_CLOSED",
        }
    }

    /// True when the current session can no longer be used without a new login.
    pub fn is_session_lost(&self) -> bool {
        matches!(self, Self::RefreshFailed(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

impl From<rusqlite::Error> for ClientError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(value.to_string())
    }
}

macro_rules! db_err {
    ($($arg:tt)*) => {
        $crate::shared::error::ClientError::Storage(format!($($arg)*))
    };
}

pub(crate) use db_err;

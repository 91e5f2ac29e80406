//! Usage: Process-wide tracing setup (env filter, stderr, optional daily rolling file).

use crate::infra::settings::ClientSettings;
use crate::shared::error::{ClientError, ClientResult};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

pub const LOG_FILTER_ENV: &str = "HUB_CLIENT_LOG";
const LOG_FILE_PREFIX: &str = "hub-client.log";

/// Keeps the file writer flushing; drop it at shutdown.
#[must_use]
#[derive(Debug)]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Installs the global subscriber. `HUB_CLIENT_LOG` wins over `default_filter`.
/// Records from the `log` crate are forwarded into tracing.
pub fn init(default_filter: &str, log_dir: Option<&Path>) -> ClientResult<LoggingGuard> {
    let filter = build_filter(std::env::var(LOG_FILTER_ENV).ok(), default_filter)?;

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                ClientError::Config(format!("failed to create log dir {}: {e}", dir.display()))
            })?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(file_layer);

    tracing_log::LogTracer::init()
        .map_err(|e| ClientError::Config(format!("log bridge already installed: {e}")))?;
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| ClientError::Config(format!("tracing subscriber already installed: {e}")))?;

    tracing::info!(
        file = log_dir.map(|d| d.display().to_string()).unwrap_or_default(),
        "logging initialized"
    );
    Ok(LoggingGuard { _file: guard })
}

/// `init` driven by `log_filter` / `log_dir` (and their `HUB_CLIENT_*` overrides).
pub fn init_from_settings(settings: &ClientSettings) -> ClientResult<LoggingGuard> {
    init(&settings.log_filter, settings.log_dir.as_deref())
}

fn build_filter(from_env: Option<String>, default_filter: &str) -> ClientResult<EnvFilter> {
    let directives = from_env
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default_filter.to_string());
    EnvFilter::try_new(&directives)
        .map_err(|e| ClientError::Config(format!("invalid log filter {directives:?}: {e}")))
}

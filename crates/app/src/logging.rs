//! Dual stderr + rolling-file logging, following `coldvox-app`'s
//! `init_logging`: a daily-rotated file appender under `logs/`, an
//! `EnvFilter` seeded from `RUST_LOG` (falling back to the configured
//! level), and a non-blocking writer so log I/O never stalls the tick
//! loop.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

/// Caller must keep the returned guard alive for the process lifetime;
/// dropping it flushes and stops the background writer thread.
pub fn init_logging(log_dir: &Path, default_level: &str) -> WorkerGuard {
    std::fs::create_dir_all(log_dir).ok();

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "duet.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    guard
}

/// Delete rotated log files older than `retention_days`. Errors reading
/// the directory are logged and swallowed; pruning is best-effort.
pub fn prune_old_logs(log_dir: &Path, retention_days: u64) {
    let cutoff = std::time::SystemTime::now() - std::time::Duration::from_secs(retention_days * 86_400);

    let entries = match std::fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(?err, "failed to read log directory for pruning");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(metadata) = entry.metadata() else { continue };
        let Ok(modified) = metadata.modified() else { continue };
        if modified < cutoff {
            if let Err(err) = std::fs::remove_file(&path) {
                tracing::warn!(?err, path = %path.display(), "failed to prune old log file");
            }
        }
    }
}

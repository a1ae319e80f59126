//! Logger (spec §4.H, boundary only). A daily-rotating file is the primary
//! sink; stderr is mirrored so a human attached to the process still sees
//! activity. A retention sweep deletes daily files older than
//! `log_retention_days`.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Must be kept alive for the duration of the process — dropping it stops
/// the non-blocking file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

pub fn init(log_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "search");
    let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true);

    use tracing_subscriber::prelude::*;
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(file_layer)
        .with(stderr_layer)
        .try_init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Today's log file path, matching `tracing_appender::rolling::daily`'s
/// naming convention (`search.YYYY-MM-DD`), shown to the client per spec
/// §6's "🧾 运行日志" line.
pub fn today_log_path(log_dir: &Path) -> PathBuf {
    let today = chrono::Utc::now().format("%Y-%m-%d");
    log_dir.join(format!("search.{}", today))
}

/// Deletes daily log files older than `retention_days`. Best-effort: a
/// single unreadable or unremovable entry is logged and skipped, never
/// fatal.
pub async fn sweep_retention(log_dir: &Path, retention_days: u32) {
    let Ok(mut entries) = tokio::fs::read_dir(log_dir).await else {
        return;
    };
    let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days as i64);

    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let modified: chrono::DateTime<chrono::Utc> = modified.into();
        if modified < cutoff {
            let _ = tokio::fs::remove_file(entry.path()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn today_log_path_has_expected_prefix() {
        let path = today_log_path(Path::new("/tmp/logs"));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("search."));
    }

    #[tokio::test]
    async fn sweep_removes_old_files_and_keeps_recent() {
        let tmp = tempfile::tempdir().unwrap();
        let old = tmp.path().join("search.2000-01-01");
        let recent = tmp.path().join("search.today");
        tokio::fs::write(&old, b"old").await.unwrap();
        tokio::fs::write(&recent, b"new").await.unwrap();

        let ancient = std::time::SystemTime::now() - std::time::Duration::from_secs(60 * 60 * 24 * 365);
        let file = std::fs::File::open(&old).unwrap();
        file.set_modified(ancient).unwrap();

        sweep_retention(tmp.path(), 14).await;

        assert!(!old.exists());
        assert!(recent.exists());
    }
}

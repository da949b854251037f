use crate::config::AppConfig;
use crate::error::SyncError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::non_blocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_PREFIX: &str = "storesync";
const ERROR_LOG_PREFIX: &str = "error";
const LOG_SUFFIX: &str = "log";

/// Keeps the background log writers alive. Dropping it flushes whatever is
/// still buffered, so `main` holds it until the process exits.
#[must_use]
pub struct LogGuard {
    pub log_dir: PathBuf,
    _guards: Vec<WorkerGuard>,
}

/// Install the global subscriber: console output, a daily
/// `storesync.<date>.log` with every event and a daily `error.<date>.log`
/// with errors only, both under `cfg.log_dir`.
pub fn init(cfg: &AppConfig) -> Result<LogGuard, SyncError> {
    fs::create_dir_all(&cfg.log_dir)?;
    let (all_writer, all_guard) = non_blocking(daily_appender(&cfg.log_dir, LOG_PREFIX)?);
    let (error_writer, error_guard) =
        non_blocking(daily_appender(&cfg.log_dir, ERROR_LOG_PREFIX)?);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.log_level.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(all_writer),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(error_writer)
                .with_filter(LevelFilter::ERROR),
        )
        .init();

    Ok(LogGuard {
        log_dir: cfg.log_dir.clone(),
        _guards: vec![all_guard, error_guard],
    })
}

/// Console-only subscriber, used when configuration could not be loaded.
pub fn init_console(level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .try_init();
}

fn daily_appender(dir: &Path, prefix: &str) -> Result<RollingFileAppender, SyncError> {
    Ok(RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix(LOG_SUFFIX)
        .build(dir)?)
}

/// Delete regular files in `dir` whose last modification is older than
/// `max_age`. A missing directory and per-file failures are logged, never
/// raised. Returns how many files were removed.
pub fn clean_old_logs(dir: &Path, max_age: Duration) -> usize {
    if !dir.exists() {
        info!(path = %dir.display(), "log directory not found; nothing to clean");
        return 0;
    }
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "failed to read log directory");
            return 0;
        }
    };

    let now = SystemTime::now();
    entries
        .filter_map(|entry| {
            entry
                .inspect_err(|e| warn!(error = %e, "failed to read log dir entry"))
                .ok()
        })
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| is_older_than(path, now, max_age))
        .filter(|path| match fs::remove_file(path) {
            Ok(()) => {
                info!(path = %path.display(), "removed old log file");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to remove old log file");
                false
            }
        })
        .count()
}

fn is_older_than(path: &Path, now: SystemTime, max_age: Duration) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| now.duration_since(modified).ok())
        .is_some_and(|age| age > max_age)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(clean_old_logs(&missing, Duration::from_secs(0)), 0);
    }

    #[test]
    fn removes_only_files_past_max_age() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.log"), "x").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        // Nothing is a day old yet.
        assert_eq!(clean_old_logs(dir.path(), Duration::from_secs(86_400)), 0);
        assert!(dir.path().join("old.log").exists());

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(clean_old_logs(dir.path(), Duration::from_millis(1)), 1);
        assert!(!dir.path().join("old.log").exists());
        assert!(dir.path().join("nested").exists());
    }

    #[test]
    fn daily_files_are_prefixed_and_dated() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        for prefix in [LOG_PREFIX, ERROR_LOG_PREFIX] {
            let mut appender = daily_appender(dir.path(), prefix).unwrap();
            appender.write_all(b"line\n").unwrap();
            appender.flush().unwrap();
        }

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.len(), 2, "{names:?}");
        assert!(names[0].starts_with("error.") && names[0].ends_with(".log"));
        assert!(names[1].starts_with("storesync.") && names[1].ends_with(".log"));
    }
}

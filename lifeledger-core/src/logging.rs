//! Tracing setup for one-shot commands and the daemon.
//!
//! Every invocation appends to a daily file in the XDG state directory,
//! named `lifeledger.YYYY-MM-DD.log` after the UTC day it covers. The daemon
//! additionally echoes compact lines to stderr.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

const FILE_PREFIX: &str = "lifeledger";
const FILE_SUFFIX: &str = "log";

/// Where events go besides the rolling file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    /// File only; stderr stays reserved for command errors.
    FileOnly,
    /// Also write to stderr, for `lifeledger run`.
    Stderr,
}

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides `config.level` when set. Both accept full
/// `EnvFilter` directives such as `lifeledger_core::scheduler=debug,info`.
pub fn init(config: &LoggingConfig, dir: &Path, echo: Echo) -> Result<LoggingGuard> {
    let directives = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(from_env) if !from_env.trim().is_empty() => from_env,
        _ => config.level.clone(),
    };
    let filter = parse_filter(&directives)?;
    let (writer, guard) = file_writer(dir, config.max_files)?;

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);
    let stderr_layer = (echo == Echo::Stderr).then(|| {
        fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install log subscriber: {e}")))?;

    tracing::info!(
        log_dir = %dir.display(),
        filter = %directives,
        ?echo,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Parses filter directives, falling back to `info` for unmatched targets.
pub fn parse_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse(directives)
        .map_err(|e| Error::Config(format!("invalid log filter {directives:?}: {e}")))
}

fn file_writer(dir: &Path, max_files: usize) -> Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(FILE_PREFIX)
        .filename_suffix(FILE_SUFFIX)
        .max_log_files(max_files.max(1))
        .build(dir)
        .map_err(|e| {
            Error::Config(format!("failed to open log files in {}: {e}", dir.display()))
        })?;
    Ok(tracing_appender::non_blocking(appender))
}

/// The file in `dir` that receives events logged on `day` (UTC).
pub fn log_file_for(dir: &Path, day: NaiveDate) -> PathBuf {
    dir.join(format!("{FILE_PREFIX}.{}.{FILE_SUFFIX}", day.format("%Y-%m-%d")))
}

/// Initialize logging for tests (logs to the test writer)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Flushes buffered file writes when dropped.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_for_names_by_day() {
        let day = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let path = log_file_for(Path::new("/state/lifeledger"), day);
        assert_eq!(path, PathBuf::from("/state/lifeledger/lifeledger.2026-06-01.log"));
    }

    #[test]
    fn test_parse_filter() {
        assert!(parse_filter("info").is_ok());
        assert!(parse_filter("lifeledger_core::scheduler=debug,warn").is_ok());
        assert!(matches!(
            parse_filter("lifeledger_core=loudest"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_events_reach_the_daily_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("state");
        let (writer, guard) = file_writer(&dir, 3).unwrap();

        let subscriber = tracing_subscriber::fmt()
            .with_writer(writer)
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(job_key = "hard_mode.plan:s-1", "Claimed job");
        });
        drop(guard);

        let files: Vec<PathBuf> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1, "one file per day: {files:?}");

        let name = files[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("lifeledger.") && name.ends_with(".log"), "{name}");

        let contents = std::fs::read_to_string(&files[0]).unwrap();
        assert!(contents.contains("Claimed job"));
        assert!(contents.contains("hard_mode.plan:s-1"));
    }
}

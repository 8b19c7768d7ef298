//! Log output, driven by the `[logging]` section of [`BeaconConfig`].
//!
//! Stdout always gets a layer in the configured [`LogFormat`]. With
//! `logging.file` on, JSON lines also go to a rolling file written from a
//! background thread; the returned [`LogGuard`] flushes it on drop.
//!
//! [`BeaconConfig`]: beacon_core::BeaconConfig

use std::path::Path;

use anyhow::Context;
use beacon_core::config::BackgroundSettings;
use beacon_core::{LogFormat, LogRotation, LoggingSettings};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// File name prefix of every log file.
const FILE_PREFIX: &str = "beacon";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps the file writer thread alive. Hold it until shutdown.
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Installs the global subscriber.
///
/// `RUST_LOG`, when set and non-empty, replaces `settings.level`.
///
/// # Errors
///
/// Returns an error if the filter does not parse, the log directory cannot
/// be created, or a global subscriber is already installed.
pub fn init(
    settings: &LoggingSettings,
    background: &BackgroundSettings,
) -> anyhow::Result<LogGuard> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = env_filter(&settings.level, rust_log.as_deref())?;

    let mut layers = vec![stdout_layer(settings.format)];
    let mut file = None;
    if settings.file {
        let dir = settings.directory(background)?;
        let (writer, guard) = tracing_appender::non_blocking(file_appender(settings, &dir)?);
        layers.push(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
        );
        file = Some((dir, guard));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("A global subscriber is already installed")?;

    let guard = file.map(|(dir, guard)| {
        info!(
            directory = %dir.display(),
            rotation = ?settings.rotation,
            max_files = ?settings.max_files,
            "Writing log files"
        );
        guard
    });
    Ok(LogGuard { _file: guard })
}

fn env_filter(level: &str, rust_log: Option<&str>) -> anyhow::Result<EnvFilter> {
    let directives = rust_log.filter(|v| !v.trim().is_empty()).unwrap_or(level);
    EnvFilter::try_new(directives).with_context(|| format!("Invalid log filter '{directives}'"))
}

fn stdout_layer(format: LogFormat) -> BoxedLayer {
    let layer = fmt::layer().with_target(true);
    match format {
        LogFormat::Pretty => layer
            .pretty()
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .boxed(),
        LogFormat::Compact => layer.compact().with_ansi(false).boxed(),
        LogFormat::Json => layer.json().with_ansi(false).boxed(),
    }
}

const fn rotation(rotation: LogRotation) -> Rotation {
    match rotation {
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    }
}

fn file_appender(settings: &LoggingSettings, dir: &Path) -> anyhow::Result<RollingFileAppender> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Cannot create log directory {}", dir.display()))?;

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation(settings.rotation))
        .filename_prefix(FILE_PREFIX)
        .filename_suffix("log");
    if let Some(max) = settings.max_files {
        builder = builder.max_log_files(max);
    }
    builder
        .build(dir)
        .with_context(|| format!("Cannot open log file in {}", dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use tracing_subscriber::filter::LevelFilter;

    fn max_level(filter: &EnvFilter) -> Option<LevelFilter> {
        <EnvFilter as Layer<Registry>>::max_level_hint(filter)
    }

    #[test]
    fn test_rust_log_overrides_configured_level() {
        let filter = env_filter("info", Some("debug")).unwrap();
        assert_eq!(max_level(&filter), Some(LevelFilter::DEBUG));

        let filter = env_filter("warn", Some("  ")).unwrap();
        assert_eq!(max_level(&filter), Some(LevelFilter::WARN));
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        let err = env_filter("beacon_core=loud", None).unwrap_err();
        assert!(err.to_string().contains("beacon_core=loud"));
    }

    #[test]
    fn test_file_appender_writes_under_directory() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("nested/logs");
        let settings = LoggingSettings {
            rotation: LogRotation::Never,
            ..LoggingSettings::default()
        };

        let mut appender = file_appender(&settings, &logs).unwrap();
        appender.write_all(b"{\"message\":\"hello\"}\n").unwrap();
        appender.flush().unwrap();
        drop(appender);

        let content = std::fs::read_to_string(logs.join("beacon.log")).unwrap();
        assert!(content.contains("hello"));
    }

    #[test]
    fn test_daily_files_carry_date() {
        let dir = TempDir::new().unwrap();
        let settings = LoggingSettings::default();

        let mut appender = file_appender(&settings, dir.path()).unwrap();
        appender.write_all(b"x\n").unwrap();
        drop(appender);

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("beacon."));
        assert!(names[0].ends_with(".log"));
        assert_ne!(names[0], "beacon.log");
    }
}

//! Application configuration management.
//!
//! Handles loading, saving, and validating beacon configuration:
//! - Foreground watcher pattern, thresholds and scan options
//! - Foreground publisher payload and PHYs
//! - Background task names, data directory and cycle interval
//! - Notification buffering and the HTTP bind address
//! - Log level, stdout format and the rolling log file
//!
//! Configuration is read from an optional TOML file and then overridden by
//! `BEACON__<SECTION>__<KEY>` environment variables, e.g.
//! `BEACON__WATCHER__IN_RANGE_DBM=-60`.
//!
//! ```toml
//! [watcher]
//! pattern = [{ kind = "manufacturer", id = 0xFFFE, data = "3412" }]
//! in_range_dbm = -70
//! out_of_range_dbm = -75
//! out_of_range_timeout_ms = 2000
//! sampling_interval_ms = 0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::background::{BackgroundWatcherConfig, DEFAULT_CYCLE_INTERVAL};
use crate::error::Result;
use crate::pattern::AdvertisementPattern;
use crate::proximity::{
    SignalStrengthFilter, DEFAULT_IN_RANGE_DBM, DEFAULT_OUT_OF_RANGE_DBM,
    DEFAULT_OUT_OF_RANGE_TIMEOUT,
};
use crate::publisher::PublisherConfig;
use crate::storage::default_data_dir;
use crate::types::{AdvertisementSection, Phy, ScanParameters};
use crate::watcher::WatcherConfig;

/// Task name of the default background watcher registration.
pub const DEFAULT_WATCHER_TASK: &str = "AdvertisementWatcherTask";

/// Task name of the default background publisher registration.
pub const DEFAULT_PUBLISHER_TASK: &str = "AdvertisementPublisherTask";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "BEACON";

static TASK_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_.-]{0,63}$").unwrap_or_else(|e| {
        unreachable!("task name regex is valid: {e}")
    })
});

/// Returns `true` if `name` can be used as a background task name.
///
/// Task names key persisted slots, so they are restricted to a leading
/// letter followed by at most 63 letters, digits, `_`, `.` or `-`.
#[must_use]
pub fn is_valid_task_name(name: &str) -> bool {
    TASK_NAME_REGEX.is_match(name)
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The requested configuration file does not exist.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The configuration file could not be read.
    #[error("Failed to read {}: {source}", .path.display())]
    ReadError {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The configuration file could not be written.
    #[error("Failed to write {}: {source}", .path.display())]
    WriteError {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Layered loading (file + environment) failed.
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    /// The configuration could not be serialized to TOML.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// One field is invalid.
    #[error("Invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted path of the field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are invalid.
    #[error("{} configuration errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

fn reference_section() -> AdvertisementSection {
    AdvertisementSection::manufacturer(0xFFFE, [0x34, 0x12])
}

// ============================================================================
// Sections
// ============================================================================

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    /// Foreground watcher.
    pub watcher: WatcherSettings,
    /// Foreground publisher.
    pub publisher: PublisherSettings,
    /// Background triggers and result slots.
    pub background: BackgroundSettings,
    /// Consumer notification delivery.
    pub notifications: NotificationSettings,
    /// HTTP host.
    pub server: ServerSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Watcher settings as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    /// Sections a sample must contain. Empty matches everything.
    pub pattern: Vec<AdvertisementSection>,
    /// In-range threshold (dBm).
    pub in_range_dbm: i16,
    /// Out-of-range threshold (dBm).
    pub out_of_range_dbm: i16,
    /// Out-of-range timeout; absent means never demote.
    pub out_of_range_timeout_ms: Option<u64>,
    /// Minimum spacing of proximity events; 0 disables throttling.
    pub sampling_interval_ms: u64,
    /// Also receive extended advertisements.
    pub allow_extended_advertisements: bool,
    /// Listen on LE Coded as well as LE 1M.
    pub scan_coded_phy: bool,
    /// Scan duty-cycle preference.
    pub scan_parameters: ScanParameters,
    /// Offload the pattern to the controller.
    pub hardware_filter_offload: bool,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            pattern: vec![reference_section()],
            in_range_dbm: DEFAULT_IN_RANGE_DBM,
            out_of_range_dbm: DEFAULT_OUT_OF_RANGE_DBM,
            out_of_range_timeout_ms: Some(millis(DEFAULT_OUT_OF_RANGE_TIMEOUT)),
            sampling_interval_ms: 0,
            allow_extended_advertisements: false,
            scan_coded_phy: false,
            scan_parameters: ScanParameters::LowLatency,
            hardware_filter_offload: false,
        }
    }
}

impl WatcherSettings {
    /// Builds the signal filter, optionally with a different sampling interval.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the thresholds are inverted.
    pub fn signal_filter(&self, sampling_interval_ms: Option<u64>) -> Result<SignalStrengthFilter> {
        SignalStrengthFilter::new(
            self.in_range_dbm,
            self.out_of_range_dbm,
            self.out_of_range_timeout_ms.map(Duration::from_millis),
            Duration::from_millis(sampling_interval_ms.unwrap_or(self.sampling_interval_ms)),
        )
    }

    /// Builds the foreground watcher configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for inverted thresholds or inconsistent
    /// scan options.
    pub fn to_watcher_config(&self) -> Result<WatcherConfig> {
        self.build(None)
    }

    fn build(&self, sampling_interval_ms: Option<u64>) -> Result<WatcherConfig> {
        let config = WatcherConfig {
            pattern: AdvertisementPattern::new(self.pattern.clone()),
            signal: self.signal_filter(sampling_interval_ms)?,
            allow_extended_advertisements: self.allow_extended_advertisements,
            scan_coded_phy: self.scan_coded_phy,
            scan_parameters: self.scan_parameters,
            hardware_filter_offload: self.hardware_filter_offload,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self, errors: &mut Vec<ConfigError>) {
        if self.in_range_dbm < self.out_of_range_dbm {
            errors.push(invalid(
                "watcher.in_range_dbm",
                format!(
                    "must be >= watcher.out_of_range_dbm ({})",
                    self.out_of_range_dbm
                ),
            ));
        }
        if self.scan_coded_phy && !self.allow_extended_advertisements {
            errors.push(invalid(
                "watcher.scan_coded_phy",
                "requires watcher.allow_extended_advertisements",
            ));
        }
        if self.hardware_filter_offload && self.pattern.is_empty() {
            errors.push(invalid(
                "watcher.hardware_filter_offload",
                "requires a non-empty watcher.pattern",
            ));
        }
    }
}

/// Publisher settings as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherSettings {
    /// Sections to broadcast.
    pub payload: Vec<AdvertisementSection>,
    /// Primary advertising PHY.
    pub primary_phy: Phy,
    /// Secondary advertising PHY.
    pub secondary_phy: Phy,
    /// Use the extended advertising format.
    pub use_extended_format: bool,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            payload: vec![reference_section()],
            primary_phy: Phy::Uncoded1M,
            secondary_phy: Phy::Uncoded1M,
            use_extended_format: false,
        }
    }
}

impl PublisherSettings {
    /// Builds the publisher configuration. The payload is checked at start.
    #[must_use]
    pub fn to_publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            payload: self.payload.clone(),
            primary_phy: self.primary_phy,
            secondary_phy: self.secondary_phy,
            use_extended_format: self.use_extended_format,
        }
    }

    fn validate(&self, errors: &mut Vec<ConfigError>) {
        if let Err(e) = self.to_publisher_config().validate_phys() {
            errors.push(invalid("publisher.primary_phy", e.to_string()));
        }
    }
}

/// Background trigger settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundSettings {
    /// Where result slots live; platform default when absent.
    pub data_dir: Option<PathBuf>,
    /// Task name of the background watcher.
    pub watcher_task: String,
    /// Task name of the background publisher.
    pub publisher_task: String,
    /// How often a background watcher reports aggregated advertisements.
    pub cycle_interval_ms: u64,
    /// Sampling interval used by background watchers (at least 1000).
    pub sampling_interval_ms: u64,
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            data_dir: None,
            watcher_task: DEFAULT_WATCHER_TASK.to_string(),
            publisher_task: DEFAULT_PUBLISHER_TASK.to_string(),
            cycle_interval_ms: millis(DEFAULT_CYCLE_INTERVAL),
            sampling_interval_ms: 1000,
        }
    }
}

impl BackgroundSettings {
    /// Resolved data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if no platform default can be determined.
    pub fn data_dir(&self) -> Result<PathBuf> {
        self.data_dir
            .as_ref()
            .map_or_else(default_data_dir, |dir| Ok(dir.clone()))
    }

    /// Cycle interval as a duration.
    #[must_use]
    pub const fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }

    fn validate(&self, errors: &mut Vec<ConfigError>) {
        for (field, name) in [
            ("background.watcher_task", &self.watcher_task),
            ("background.publisher_task", &self.publisher_task),
        ] {
            if !is_valid_task_name(name) {
                errors.push(invalid(field, format!("'{name}' is not a valid task name")));
            }
        }
        if self.watcher_task == self.publisher_task {
            errors.push(invalid(
                "background.publisher_task",
                "must differ from background.watcher_task",
            ));
        }
        if self.cycle_interval_ms == 0 {
            errors.push(invalid("background.cycle_interval_ms", "must be greater than 0"));
        }
        if self.sampling_interval_ms < 1000 {
            errors.push(invalid(
                "background.sampling_interval_ms",
                "must be at least 1000",
            ));
        }
    }
}

/// Notification delivery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Buffer between engines and the consumer.
    pub channel_capacity: usize,
    /// Notifications kept for `GET /api/events`.
    pub history_size: usize,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            channel_capacity: crate::notify::DEFAULT_CHANNEL_CAPACITY,
            history_size: 100,
        }
    }
}

/// HTTP host settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Socket address to listen on.
    pub bind_address: String,
    /// BlueZ adapter to open, such as `hci0`. Absent picks the default.
    pub adapter: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            adapter: None,
        }
    }
}

/// Stdout log layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Multi-line, coloured, with span open/close events.
    #[default]
    Pretty,
    /// Single line, no colour. Suits journald.
    Compact,
    /// One JSON object per line.
    Json,
}

/// How often the log file rolls over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    /// New file every hour.
    Hourly,
    /// New file every day.
    #[default]
    Daily,
    /// A single file that is never rotated.
    Never,
}

/// Log output settings.
///
/// `RUST_LOG`, when set, replaces `level`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directives, e.g. `info,beacon_core=debug`.
    pub level: String,
    /// Stdout layout.
    pub format: LogFormat,
    /// Also write JSON lines to a rolling file.
    pub file: bool,
    /// Log file directory; `<background data dir>/logs` when absent.
    pub directory: Option<PathBuf>,
    /// File rollover period.
    pub rotation: LogRotation,
    /// Rotated files to keep; absent keeps all.
    pub max_files: Option<usize>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: false,
            directory: None,
            rotation: LogRotation::Daily,
            max_files: Some(14),
        }
    }
}

impl LoggingSettings {
    /// Adjusts these settings for a service run under a supervisor. The
    /// rolling file is switched on and pretty stdout becomes compact.
    #[must_use]
    pub fn for_production(mut self) -> Self {
        self.file = true;
        if self.format == LogFormat::Pretty {
            self.format = LogFormat::Compact;
        }
        self
    }

    /// Resolved log file directory.
    ///
    /// # Errors
    ///
    /// Returns an error if no directory is configured and the background
    /// data directory cannot be determined.
    pub fn directory(&self, background: &BackgroundSettings) -> Result<PathBuf> {
        match &self.directory {
            Some(dir) => Ok(dir.clone()),
            None => Ok(background.data_dir()?.join("logs")),
        }
    }

    fn validate(&self, errors: &mut Vec<ConfigError>) {
        if self.level.trim().is_empty() {
            errors.push(invalid("logging.level", "must not be empty"));
        }
        if self.max_files == Some(0) {
            errors.push(invalid("logging.max_files", "must be greater than 0"));
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Loading / saving
// ============================================================================

impl BeaconConfig {
    /// Load configuration from the default path plus environment overrides.
    ///
    /// A missing file is not an error; defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or environment cannot be parsed.
    pub fn load() -> ConfigResult<Self> {
        let path = Self::config_path()?;
        Self::load_layered(Some(&path), false)
    }

    /// Load configuration from `path` (which must exist) plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if `path` does not exist, or a load
    /// error if it cannot be parsed.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::load_layered(Some(path), true)
    }

    fn load_layered(path: Option<&Path>, required: bool) -> ConfigResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(required),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );
        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns a load error if `content` is not valid configuration.
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Save configuration to the default path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save(&self) -> ConfigResult<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every field, collecting all problems.
    ///
    /// # Errors
    ///
    /// Returns the single error, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        self.watcher.validate(&mut errors);
        self.publisher.validate(&mut errors);
        self.background.validate(&mut errors);
        self.logging.validate(&mut errors);
        if self.notifications.channel_capacity == 0 {
            errors.push(invalid("notifications.channel_capacity", "must be greater than 0"));
        }
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(invalid(
                "server.bind_address",
                format!("'{}' is not a socket address", self.server.bind_address),
            ));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Background watcher configuration derived from the watcher section.
    ///
    /// # Errors
    ///
    /// Returns a configuration error unless the watcher pattern has exactly
    /// one section.
    pub fn background_watcher_config(&self) -> Result<BackgroundWatcherConfig> {
        BackgroundWatcherConfig::new(
            self.watcher
                .build(Some(self.background.sampling_interval_ms))?,
        )
    }

    /// Get the configuration file path.
    ///
    /// On Linux: `/etc/beacon/config.toml`.
    /// Elsewhere: the platform config directory.
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn config_path() -> ConfigResult<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            Ok(PathBuf::from("/etc/beacon/config.toml"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let dirs = directories::ProjectDirs::from("", "", "beacon").ok_or_else(|| {
                invalid("config_path", "Cannot determine config directory")
            })?;
            Ok(dirs.config_dir().join("config.toml"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BeaconError;
    use crate::types::SectionKind;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_reproduce_reference_behaviour() {
        let config = BeaconConfig::default();
        assert!(config.validate().is_ok());

        let watcher = config.watcher.to_watcher_config().unwrap();
        assert_eq!(watcher.pattern.sections(), &[reference_section()]);
        assert_eq!(watcher.signal, SignalStrengthFilter::default());

        let background = config.background_watcher_config().unwrap();
        assert_eq!(
            background.watcher_config().signal.sampling_interval(),
            Duration::from_secs(1)
        );
        assert_eq!(config.background.watcher_task, "AdvertisementWatcherTask");
        assert_eq!(config.background.publisher_task, "AdvertisementPublisherTask");
    }

    #[test]
    fn test_task_name_validation() {
        assert!(is_valid_task_name("AdvertisementWatcherTask"));
        assert!(is_valid_task_name("task-1.v2_x"));
        assert!(!is_valid_task_name(""));
        assert!(!is_valid_task_name("1task"));
        assert!(!is_valid_task_name("../etc"));
        assert!(!is_valid_task_name(&"a".repeat(65)));
        assert!(is_valid_task_name(&"a".repeat(64)));
    }

    #[test]
    fn test_parse_toml_sections() {
        let config = BeaconConfig::from_toml(
            r#"
            [watcher]
            pattern = [
                { kind = "manufacturer", id = 0x004C, data = "0215" },
                { kind = "service_data", id = 0x180F, data = "64" },
            ]
            in_range_dbm = -60
            out_of_range_dbm = -80

            [publisher]
            payload = [{ kind = "manufacturer", id = 0xFFFE, data = "abcd" }]
            "#,
        )
        .unwrap();

        assert_eq!(config.watcher.pattern.len(), 2);
        assert_eq!(config.watcher.pattern[0].id, 0x004C);
        assert_eq!(config.watcher.pattern[1].kind, SectionKind::ServiceData);
        assert_eq!(config.watcher.in_range_dbm, -60);
        // Unspecified fields keep their defaults.
        assert_eq!(config.watcher.out_of_range_timeout_ms, Some(2000));
        assert_eq!(config.publisher.payload[0].data, vec![0xAB, 0xCD]);
        assert_eq!(config.background, BackgroundSettings::default());
    }

    #[test]
    fn test_validation_collects_every_error() {
        let mut config = BeaconConfig::default();
        config.watcher.in_range_dbm = -90;
        config.background.watcher_task = "not valid!".into();
        config.server.bind_address = "nowhere".into();

        match config.validate() {
            Err(ConfigError::MultipleValidationErrors(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn test_single_validation_error_is_unwrapped() {
        let mut config = BeaconConfig::default();
        config.background.sampling_interval_ms = 500;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { ref field, .. } if field == "background.sampling_interval_ms"));

        let err: BeaconError = err.into();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_inverted_thresholds_rejected_at_build() {
        let mut settings = WatcherSettings::default();
        settings.in_range_dbm = -80;
        assert!(settings.to_watcher_config().is_err());
    }

    #[test]
    fn test_background_requires_single_pattern_section() {
        let mut config = BeaconConfig::default();
        config.watcher.pattern.clear();
        assert!(config.background_watcher_config().is_err());
        // Foreground still accepts the empty pattern.
        assert!(config.watcher.to_watcher_config().is_ok());
    }

    #[test]
    fn test_infinite_timeout_when_absent() {
        let config = BeaconConfig::from_toml(
            r"
            [watcher]
            out_of_range_timeout_ms = 1500
            ",
        )
        .unwrap();
        assert_eq!(config.watcher.out_of_range_timeout_ms, Some(1500));

        let mut settings = WatcherSettings::default();
        settings.out_of_range_timeout_ms = None;
        let filter = settings.signal_filter(None).unwrap();
        assert_eq!(filter.out_of_range_timeout(), None);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = BeaconConfig::default();
        config.watcher.sampling_interval_ms = 250;
        config.background.data_dir = Some(dir.path().join("data"));
        config.save_to(&path).unwrap();

        let loaded = BeaconConfig::load_from(&path).unwrap();
        assert_eq!(loaded.watcher.sampling_interval_ms, 250);
        assert_eq!(loaded.background.data_dir().unwrap(), dir.path().join("data"));
    }

    #[test]
    fn test_load_from_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = BeaconConfig::load_from(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_logging_section() {
        let config = BeaconConfig::from_toml(
            r#"
            [logging]
            level = "info,beacon_core=debug"
            format = "json"
            file = true
            rotation = "hourly"
            "#,
        )
        .unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.rotation, LogRotation::Hourly);
        assert!(config.logging.file);
        assert_eq!(config.logging.max_files, Some(14));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_log_directory_defaults_under_data_dir() {
        let mut config = BeaconConfig::default();
        config.background.data_dir = Some(PathBuf::from("/srv/beacon"));
        assert_eq!(
            config.logging.directory(&config.background).unwrap(),
            PathBuf::from("/srv/beacon/logs")
        );

        config.logging.directory = Some(PathBuf::from("/var/log/beacon"));
        assert_eq!(
            config.logging.directory(&config.background).unwrap(),
            PathBuf::from("/var/log/beacon")
        );
    }

    #[test]
    fn test_logging_validation() {
        let mut config = BeaconConfig::default();
        config.logging.level = " ".into();
        config.logging.max_files = Some(0);
        match config.validate() {
            Err(ConfigError::MultipleValidationErrors(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected multiple errors, got {other:?}"),
        }

        let production = LoggingSettings::default().for_production();
        assert!(production.file);
        assert_eq!(production.format, LogFormat::Compact);

        let json = LoggingSettings {
            format: LogFormat::Json,
            ..LoggingSettings::default()
        };
        assert_eq!(json.for_production().format, LogFormat::Json);
    }
}

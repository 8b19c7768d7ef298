//! Unified error types for the beacon core library.
//!
//! [`BeaconError`] covers every failure mode a caller of the engines, the
//! result bridge or the configuration layer can observe. Module-specific
//! errors (currently only [`ConfigError`](crate::config::ConfigError)) convert
//! into it.
//!
//! # Taxonomy
//!
//! - **Configuration**: rejected before any state transition, never retried
//!   automatically ([`BeaconError::ConfigValidationError`], [`BeaconError::InvalidPayload`]).
//! - **Radio**: no adapter, adapter busy, or the transport aborted underneath a
//!   running engine ([`BeaconError::DeviceUnavailable`], [`BeaconError::TransportAborted`]).
//! - **Caller**: lifecycle misuse, reported synchronously without side effects
//!   ([`BeaconError::InvalidState`]).
//! - **Persistence**: the background result slots could not be read or written.
//!
//! # Example
//!
//! ```rust
//! use beacon_core::error::{BeaconError, Result};
//!
//! fn check_thresholds(in_range: i16, out_of_range: i16) -> Result<()> {
//!     if in_range < out_of_range {
//!         return Err(BeaconError::ConfigValidationError(
//!             "in-range threshold is weaker than out-of-range threshold".into(),
//!         ));
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

use crate::types::TransportError;

/// The unified error type for all beacon operations.
#[derive(Debug, Error)]
pub enum BeaconError {
    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// A watcher, publisher or trigger configuration is inconsistent.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    /// The advertisement payload cannot be published as configured.
    #[error("Invalid advertisement payload: {0}")]
    InvalidPayload(String),

    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// A background task name is not usable as a persisted slot key.
    #[error("Invalid task name: '{0}'. Use letters, digits, '_', '.' or '-' (max 64, leading letter).")]
    InvalidTaskName(String),

    // =========================================================================
    // RADIO ERRORS
    // =========================================================================
    /// No radio is present, it is powered off, or it is busy at capacity.
    #[error("Bluetooth radio unavailable: {0}")]
    DeviceUnavailable(String),

    /// The transport stopped underneath a running engine.
    #[error("Bluetooth transport aborted: {0}")]
    TransportAborted(TransportError),

    /// A scan sample failed validation and was dropped.
    #[error("Malformed scan sample: {0}")]
    MalformedSample(String),

    // =========================================================================
    // LIFECYCLE ERRORS
    // =========================================================================
    /// The requested operation is not legal in the engine's current state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the engine was in.
        state: String,
    },

    /// A background registration with this task name already exists.
    #[error("A background registration named '{0}' already exists")]
    RegistrationExists(String),

    /// No background registration exists for this task name.
    #[error("No background registration named '{0}'")]
    RegistrationNotFound(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for beacon operations.
pub type Result<T> = std::result::Result<T, BeaconError>;

/// Short alias for [`BeaconError`].
pub type Error = BeaconError;

impl BeaconError {
    /// Returns `true` if this error was caused by invalid configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigValidationError(_)
                | Self::InvalidPayload(_)
                | Self::ConfigNotFound(_)
                | Self::ConfigParseError(_)
                | Self::InvalidTaskName(_)
        )
    }

    /// Returns `true` if this error is related to the radio or its transport.
    #[inline]
    #[must_use]
    pub const fn is_radio_error(&self) -> bool {
        matches!(
            self,
            Self::DeviceUnavailable(_) | Self::TransportAborted(_) | Self::MalformedSample(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns `true` if retrying later (without changing anything) may succeed.
    ///
    /// Configuration errors never qualify: the caller has to fix the input.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::DeviceUnavailable(_) | Self::TransportAborted(_))
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::MalformedSample(_) | Self::InvalidTaskName(_) => 400,

            // 404 Not Found
            Self::ConfigNotFound(_) | Self::RegistrationNotFound(_) => 404,

            // 409 Conflict - lifecycle misuse
            Self::InvalidState { .. } | Self::RegistrationExists(_) => 409,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigValidationError(_) | Self::InvalidPayload(_) | Self::ConfigParseError(_) => {
                422
            }

            // 500 Internal Server Error
            Self::PersistenceError(_) | Self::IoError(_) => 500,

            // 503 Service Unavailable - radio issues
            Self::DeviceUnavailable(_) | Self::TransportAborted(_) => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::InvalidTaskName(_) => "INVALID_TASK_NAME",
            Self::DeviceUnavailable(_) => "DEVICE_UNAVAILABLE",
            Self::TransportAborted(_) => "TRANSPORT_ABORTED",
            Self::MalformedSample(_) => "MALFORMED_SAMPLE",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::RegistrationExists(_) => "REGISTRATION_EXISTS",
            Self::RegistrationNotFound(_) => "REGISTRATION_NOT_FOUND",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }

    pub(crate) fn invalid_state(operation: &'static str, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            operation,
            state: state.to_string(),
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for BeaconError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::ReadError { path, source } => {
                Self::PersistenceError(format!("Failed to read {}: {}", path.display(), source))
            }
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {}", path.display(), source))
            }
            ConfigError::LoadError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<serde_json::Error> for BeaconError {
    fn from(err: serde_json::Error) -> Self {
        Self::PersistenceError(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_config_error_classification() {
        assert!(BeaconError::ConfigValidationError("in < out".into()).is_config_error());
        assert!(BeaconError::InvalidPayload("empty".into()).is_config_error());
        assert!(BeaconError::ConfigNotFound(PathBuf::from("/test")).is_config_error());
        assert!(BeaconError::InvalidTaskName("9bad".into()).is_config_error());

        assert!(!BeaconError::DeviceUnavailable("no radio".into()).is_config_error());
    }

    #[test]
    fn test_radio_error_classification() {
        assert!(BeaconError::DeviceUnavailable("no radio".into()).is_radio_error());
        assert!(BeaconError::TransportAborted(TransportError::RadioNotAvailable).is_radio_error());
        assert!(BeaconError::MalformedSample("rssi".into()).is_radio_error());

        assert!(!BeaconError::PersistenceError("disk".into()).is_radio_error());
    }

    #[test]
    fn test_io_error_classification() {
        assert!(BeaconError::PersistenceError("disk full".into()).is_io_error());
        assert!(BeaconError::IoError(IoErr::new(ErrorKind::NotFound, "test")).is_io_error());

        assert!(!BeaconError::InvalidPayload("empty".into()).is_io_error());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(BeaconError::DeviceUnavailable("busy".into()).is_recoverable());
        assert!(BeaconError::TransportAborted(TransportError::ResourceInUse).is_recoverable());
        assert!(!BeaconError::ConfigValidationError("bad".into()).is_recoverable());
        assert!(!BeaconError::invalid_state("start", "started").is_recoverable());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(BeaconError::MalformedSample("x".into()).http_status_code(), 400);
        assert_eq!(
            BeaconError::RegistrationNotFound("task".into()).http_status_code(),
            404
        );
        assert_eq!(
            BeaconError::invalid_state("start", "started").http_status_code(),
            409
        );
        assert_eq!(BeaconError::InvalidPayload("empty".into()).http_status_code(), 422);
        assert_eq!(BeaconError::PersistenceError("x".into()).http_status_code(), 500);
        assert_eq!(
            BeaconError::DeviceUnavailable("x".into()).http_status_code(),
            503
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            BeaconError::InvalidPayload("empty".into()).error_code(),
            "INVALID_PAYLOAD"
        );
        assert_eq!(
            BeaconError::invalid_state("start", "started").error_code(),
            "INVALID_STATE"
        );
        assert_eq!(
            BeaconError::RegistrationExists("task".into()).error_code(),
            "REGISTRATION_EXISTS"
        );
    }

    #[test]
    fn test_error_display_messages() {
        let err = BeaconError::invalid_state("start", "started");
        assert_eq!(err.to_string(), "Cannot start while started");

        let err = BeaconError::TransportAborted(TransportError::RadioNotAvailable);
        assert!(err.to_string().contains("RadioNotAvailable"));

        let err = BeaconError::RegistrationExists("AdvertisementWatcherTask".into());
        assert!(err.to_string().contains("AdvertisementWatcherTask"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoErr::new(ErrorKind::NotFound, "file not found");
        let err: BeaconError = io_err.into();
        assert!(matches!(err, BeaconError::IoError(_)));
        assert!(err.is_io_error());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<BeaconError>();
        assert_sync::<BeaconError>();
    }
}

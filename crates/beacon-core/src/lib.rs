//! # beacon-core
//!
//! Core engine for the beacon BLE advertisement service.
//!
//! This crate provides:
//! - Advertisement watching with content matching and RSSI proximity hysteresis
//! - Advertisement publishing with legacy and extended formats
//! - Background triggers whose results are handed off through persistent slots
//! - Configuration management and adapter capability probing
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`types`] - Samples, sections, statuses and other shared value types
//! - [`pattern`] - Content-based advertisement matching
//! - [`proximity`] - In-range / out-of-range hysteresis per source
//! - [`watcher`] - Foreground watcher engine
//! - [`publisher`] - Foreground publisher engine
//! - [`background`] - Background scheduler and result bridge
//! - [`notify`] - Events delivered to the consumer
//! - [`transport`] - Radio seams the engines are driven through
//! - [`capability`] - Optional adapter feature discovery
//! - [`storage`] - Persistent result slots
//! - [`config`] - Configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate
//!
//! Radio backends: [`bluetooth`] (BlueZ, feature `bluetooth`) and [`mock`]
//! (in-process, feature `mock-bluetooth`).

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod background;
#[cfg(feature = "bluetooth")]
pub mod bluetooth;
pub mod capability;
pub mod config;
pub mod error;
#[cfg(any(test, feature = "mock-bluetooth"))]
pub mod mock;
pub mod notify;
pub mod pattern;
pub mod proximity;
pub mod publisher;
pub mod storage;
pub mod transport;
pub mod types;
pub mod watcher;

// Re-export primary types for convenience
pub use background::{
    describe_result, BackgroundAccess, BackgroundResultBridge, BackgroundScheduler,
    BackgroundWatcherConfig, CompletionMonitor, CompletionNotice, InProcessScheduler,
    RegistrationHandle, TaskOutcome, TaskResult, TriggerConfig, TriggerKind,
};
#[cfg(feature = "bluetooth")]
pub use bluetooth::BluerRadio;
pub use capability::{AdapterCapabilities, CapabilityProbe};
pub use config::{
    is_valid_task_name, BeaconConfig, ConfigError, ConfigResult, LogFormat, LogRotation,
    LoggingSettings,
};
pub use error::{BeaconError, Error, Result};
#[cfg(any(test, feature = "mock-bluetooth"))]
pub use mock::MockRadio;
pub use notify::{Notification, NotificationSink, PublisherEvent, WatcherEvent};
pub use pattern::{AdvertisementPattern, SingleSectionPattern};
pub use proximity::{ProximityChange, ProximityFilter, SignalStrengthFilter};
pub use publisher::{PublisherConfig, PublisherEngine, PublisherSnapshot, PublisherState};
pub use storage::{default_data_dir, FileResultStore, MemoryResultStore, ResultStore};
pub use transport::{AdvertiseTransport, Radio, ScanTransport};
pub use types::{
    AdvertisementSection, AdvertisementType, DeviceAddress, Phy, ProximityState,
    PublisherStatus, ScanParameters, ScanSample, SectionKind, TransportError,
};
pub use watcher::{StopReason, WatcherConfig, WatcherEngine, WatcherState};

//! Scan and advertise transport contracts.
//!
//! A transport is one client of the shared radio. Starting it returns a
//! subscription through which the transport delivers samples (or status
//! changes) and finally its stopped/aborted notification. Stopping a
//! transport is a request: the radio may keep scanning for other clients,
//! and the subscription may still deliver a final event afterwards.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::capability::CapabilityProbe;
use crate::error::Result;
use crate::publisher::PublisherConfig;
use crate::types::{PublisherStatus, ScanSample, TransportError};
use crate::watcher::WatcherConfig;

/// Buffer between a transport and the engine pump.
pub const SUBSCRIPTION_CAPACITY: usize = 64;

// ============================================================================
// Scanning
// ============================================================================

/// Something a scan transport reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// An advertisement was observed.
    Sample(ScanSample),
    /// Scanning ended. `None` means a requested stop.
    Stopped(Option<TransportError>),
}

/// Live scan started by [`ScanTransport::start`].
///
/// A closed channel is equivalent to `ScanEvent::Stopped(None)`.
#[derive(Debug)]
pub struct ScanSubscription {
    events: mpsc::Receiver<ScanEvent>,
}

impl ScanSubscription {
    /// Creates a subscription and the sender a transport feeds it with.
    #[must_use]
    pub fn channel() -> (mpsc::Sender<ScanEvent>, Self) {
        let (tx, events) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        (tx, Self { events })
    }

    /// Next event, or `None` once the transport dropped its sender.
    pub async fn recv(&mut self) -> Option<ScanEvent> {
        self.events.recv().await
    }
}

/// The radio's scanning side, as seen by one watcher.
#[async_trait]
pub trait ScanTransport: Send + Sync {
    /// Begins scanning with `config`. Resolves once the radio acknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BeaconError::DeviceUnavailable`] when the radio is
    /// missing, off, or cannot take another client.
    async fn start(&self, config: &WatcherConfig) -> Result<ScanSubscription>;

    /// Requests scanning to end. Does not wait for the radio.
    fn stop(&self);
}

// ============================================================================
// Advertising
// ============================================================================

/// A status change reported by an advertise transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdate {
    /// New status.
    pub status: PublisherStatus,
    /// Accompanying error; `None` for success.
    pub error: Option<TransportError>,
}

/// Live broadcast started by [`AdvertiseTransport::start`].
#[derive(Debug)]
pub struct StatusSubscription {
    updates: mpsc::Receiver<StatusUpdate>,
}

impl StatusSubscription {
    /// Creates a subscription and the sender a transport feeds it with.
    #[must_use]
    pub fn channel() -> (mpsc::Sender<StatusUpdate>, Self) {
        let (tx, updates) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        (tx, Self { updates })
    }

    /// Next status change, or `None` once the transport is done.
    pub async fn recv(&mut self) -> Option<StatusUpdate> {
        self.updates.recv().await
    }
}

/// The radio's advertising side, as seen by one publisher.
#[async_trait]
pub trait AdvertiseTransport: Send + Sync {
    /// Requests the broadcast to begin.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BeaconError::DeviceUnavailable`] when the radio is
    /// missing or cannot take another advertisement.
    async fn start(&self, config: &PublisherConfig) -> Result<StatusSubscription>;

    /// Requests the broadcast to end. Does not wait for the radio.
    fn stop(&self);
}

// ============================================================================
// Radio
// ============================================================================

/// A shared radio handing out independent transport clients.
///
/// The radio does its own reference counting: stopping one client never
/// assumes the physical scan or advertisement ends.
pub trait Radio: CapabilityProbe {
    /// A new scanning client.
    fn scanner(&self) -> Arc<dyn ScanTransport>;

    /// A new advertising client.
    fn advertiser(&self) -> Arc<dyn AdvertiseTransport>;
}

/// Owns a subscription pump task and aborts it when dropped.
#[derive(Debug)]
pub(crate) struct PumpHandle(Option<JoinHandle<()>>);

impl PumpHandle {
    pub(crate) const fn new(task: JoinHandle<()>) -> Self {
        Self(Some(task))
    }

    /// Lets the task run to completion on its own.
    pub(crate) fn detach(mut self) {
        self.0.take();
    }
}

impl Drop for PumpHandle {
    fn drop(&mut self) {
        if let Some(task) = self.0.take() {
            task.abort();
        }
    }
}

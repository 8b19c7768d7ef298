//! In-process simulated radio.
//!
//! `MockRadio` implements both transports and the capability probe. Tests
//! (and the server, when built without a real backend) inject samples and
//! status changes by hand.
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use beacon_core::mock::MockRadio;
//! use beacon_core::types::{DeviceAddress, ScanSample};
//!
//! let radio = MockRadio::new();
//! // Delivered to every started scanner.
//! radio.deliver(ScanSample::new(DeviceAddress::default(), -60)).await;
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::capability::{AdapterCapabilities, CapabilityProbe};
use crate::error::{BeaconError, Result};
use crate::publisher::PublisherConfig;
use crate::transport::{
    AdvertiseTransport, Radio, ScanEvent, ScanSubscription, ScanTransport, StatusSubscription,
    StatusUpdate,
};
use crate::types::{PublisherStatus, ScanSample, TransportError};
use crate::watcher::WatcherConfig;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct RadioState {
    available: AtomicBool,
    start_delay: Mutex<Duration>,
    capabilities: Mutex<AdapterCapabilities>,
    scans: Mutex<HashMap<u64, mpsc::Sender<ScanEvent>>>,
    adverts: Mutex<HashMap<u64, mpsc::Sender<StatusUpdate>>>,
    next_client: AtomicU64,
    scan_starts: AtomicUsize,
    advertise_starts: AtomicUsize,
    last_watcher_config: Mutex<Option<WatcherConfig>>,
    last_publisher_config: Mutex<Option<PublisherConfig>>,
}

impl RadioState {
    async fn admit(&self) -> Result<()> {
        let delay = *lock(&self.start_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BeaconError::DeviceUnavailable("radio is off".into()))
        }
    }
}

/// A simulated shared radio. Clones share state.
#[derive(Debug, Clone)]
pub struct MockRadio {
    state: Arc<RadioState>,
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRadio {
    /// A powered-on radio supporting every optional feature.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(RadioState {
                available: AtomicBool::new(true),
                start_delay: Mutex::new(Duration::ZERO),
                capabilities: Mutex::new(AdapterCapabilities::all()),
                scans: Mutex::new(HashMap::new()),
                adverts: Mutex::new(HashMap::new()),
                next_client: AtomicU64::new(0),
                scan_starts: AtomicUsize::new(0),
                advertise_starts: AtomicUsize::new(0),
                last_watcher_config: Mutex::new(None),
                last_publisher_config: Mutex::new(None),
            }),
        }
    }

    /// Makes subsequent starts succeed or fail with `DeviceUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    /// Delays every start acknowledgement.
    pub fn set_start_delay(&self, delay: Duration) {
        *lock(&self.state.start_delay) = delay;
    }

    /// Replaces the reported capabilities.
    pub fn set_capabilities(&self, capabilities: AdapterCapabilities) {
        *lock(&self.state.capabilities) = capabilities;
    }

    /// Delivers `sample` to every running scanner.
    pub async fn deliver(&self, sample: ScanSample) {
        let senders: Vec<_> = lock(&self.state.scans).values().cloned().collect();
        for tx in senders {
            let _ = tx.send(ScanEvent::Sample(sample.clone())).await;
        }
    }

    /// Ends every running scan with `error`.
    pub async fn abort_scans(&self, error: Option<TransportError>) {
        let senders: Vec<_> = lock(&self.state.scans).drain().map(|(_, tx)| tx).collect();
        for tx in senders {
            let _ = tx.send(ScanEvent::Stopped(error)).await;
        }
    }

    /// Reports a status change to every running advertiser.
    pub async fn emit_status(&self, status: PublisherStatus, error: Option<TransportError>) {
        let senders: Vec<_> = lock(&self.state.adverts).values().cloned().collect();
        for tx in senders {
            let _ = tx.send(StatusUpdate { status, error }).await;
        }
    }

    /// Turns the radio off underneath every client.
    pub async fn power_off(&self) {
        self.set_available(false);
        self.abort_scans(Some(TransportError::RadioNotAvailable)).await;
        let senders: Vec<_> = lock(&self.state.adverts).drain().map(|(_, tx)| tx).collect();
        for tx in senders {
            let _ = tx
                .send(StatusUpdate {
                    status: PublisherStatus::Aborted,
                    error: Some(TransportError::RadioNotAvailable),
                })
                .await;
        }
    }

    /// Number of scanners currently running.
    #[must_use]
    pub fn active_scans(&self) -> usize {
        lock(&self.state.scans).len()
    }

    /// Number of advertisers currently running.
    #[must_use]
    pub fn active_advertisements(&self) -> usize {
        lock(&self.state.adverts).len()
    }

    /// Successful scan starts so far.
    #[must_use]
    pub fn scan_starts(&self) -> usize {
        self.state.scan_starts.load(Ordering::SeqCst)
    }

    /// Successful advertise starts so far.
    #[must_use]
    pub fn advertise_starts(&self) -> usize {
        self.state.advertise_starts.load(Ordering::SeqCst)
    }

    /// Configuration of the most recent scan start.
    #[must_use]
    pub fn last_watcher_config(&self) -> Option<WatcherConfig> {
        lock(&self.state.last_watcher_config).clone()
    }

    /// Configuration of the most recent advertise start.
    #[must_use]
    pub fn last_publisher_config(&self) -> Option<PublisherConfig> {
        lock(&self.state.last_publisher_config).clone()
    }

    fn client_id(&self) -> u64 {
        self.state.next_client.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityProbe for MockRadio {
    async fn capabilities(&self) -> Result<AdapterCapabilities> {
        if self.state.available.load(Ordering::SeqCst) {
            Ok(*lock(&self.state.capabilities))
        } else {
            Err(BeaconError::DeviceUnavailable("radio is off".into()))
        }
    }
}

impl Radio for MockRadio {
    fn scanner(&self) -> Arc<dyn ScanTransport> {
        Arc::new(MockScanner {
            radio: Arc::clone(&self.state),
            id: self.client_id(),
        })
    }

    fn advertiser(&self) -> Arc<dyn AdvertiseTransport> {
        Arc::new(MockAdvertiser {
            radio: Arc::clone(&self.state),
            id: self.client_id(),
        })
    }
}

/// One scanning client of a [`MockRadio`].
#[derive(Debug)]
pub struct MockScanner {
    radio: Arc<RadioState>,
    id: u64,
}

#[async_trait]
impl ScanTransport for MockScanner {
    async fn start(&self, config: &WatcherConfig) -> Result<ScanSubscription> {
        self.radio.admit().await?;
        let (tx, subscription) = ScanSubscription::channel();
        lock(&self.radio.scans).insert(self.id, tx);
        *lock(&self.radio.last_watcher_config) = Some(config.clone());
        self.radio.scan_starts.fetch_add(1, Ordering::SeqCst);
        debug!(client = self.id, "Mock scan started");
        Ok(subscription)
    }

    fn stop(&self) {
        if let Some(tx) = lock(&self.radio.scans).remove(&self.id) {
            let _ = tx.try_send(ScanEvent::Stopped(None));
            debug!(client = self.id, "Mock scan stopped");
        }
    }
}

/// One advertising client of a [`MockRadio`].
///
/// Reports `Started` as soon as it starts and `Stopped` when stopped.
#[derive(Debug)]
pub struct MockAdvertiser {
    radio: Arc<RadioState>,
    id: u64,
}

#[async_trait]
impl AdvertiseTransport for MockAdvertiser {
    async fn start(&self, config: &PublisherConfig) -> Result<StatusSubscription> {
        self.radio.admit().await?;
        let (tx, subscription) = StatusSubscription::channel();
        let _ = tx.try_send(StatusUpdate {
            status: PublisherStatus::Started,
            error: None,
        });
        lock(&self.radio.adverts).insert(self.id, tx);
        *lock(&self.radio.last_publisher_config) = Some(config.clone());
        self.radio.advertise_starts.fetch_add(1, Ordering::SeqCst);
        debug!(client = self.id, "Mock advertisement started");
        Ok(subscription)
    }

    fn stop(&self) {
        if let Some(tx) = lock(&self.radio.adverts).remove(&self.id) {
            let _ = tx.try_send(StatusUpdate {
                status: PublisherStatus::Stopped,
                error: None,
            });
            debug!(client = self.id, "Mock advertisement stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceAddress;

    #[tokio::test]
    async fn test_clients_are_independent() {
        let radio = MockRadio::new();
        let a = radio.scanner();
        let b = radio.scanner();
        let config = WatcherConfig::default();

        let mut sub_a = a.start(&config).await.unwrap();
        let mut sub_b = b.start(&config).await.unwrap();
        assert_eq!(radio.active_scans(), 2);

        a.stop();
        assert_eq!(radio.active_scans(), 1);
        assert_eq!(sub_a.recv().await, Some(ScanEvent::Stopped(None)));

        let sample = ScanSample::new(DeviceAddress::default(), -50);
        radio.deliver(sample.clone()).await;
        assert_eq!(sub_b.recv().await, Some(ScanEvent::Sample(sample)));
    }

    #[tokio::test]
    async fn test_unavailable_radio_refuses_everything() {
        let radio = MockRadio::new();
        radio.set_available(false);

        assert!(radio.capabilities().await.is_err());
        assert!(radio.scanner().start(&WatcherConfig::default()).await.is_err());
        assert!(radio
            .advertiser()
            .start(&PublisherConfig::default())
            .await
            .is_err());
        assert_eq!(radio.scan_starts(), 0);
    }

    #[tokio::test]
    async fn test_power_off_aborts_clients() {
        let radio = MockRadio::new();
        let mut scan = radio.scanner().start(&WatcherConfig::default()).await.unwrap();
        let mut advert = radio
            .advertiser()
            .start(&PublisherConfig::default())
            .await
            .unwrap();

        radio.power_off().await;

        assert_eq!(
            scan.recv().await,
            Some(ScanEvent::Stopped(Some(TransportError::RadioNotAvailable)))
        );
        assert_eq!(advert.recv().await.map(|u| u.status), Some(PublisherStatus::Started));
        assert_eq!(advert.recv().await.map(|u| u.status), Some(PublisherStatus::Aborted));
        assert_eq!(radio.active_advertisements(), 0);
    }
}

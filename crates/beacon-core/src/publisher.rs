//! Advertisement publisher.
//!
//! The engine drives the `Created -> Started -> Stopped` lifecycle. Transport
//! statuses (`Waiting`, `Started`, `Stopped`, `Aborted`) are observed and
//! forwarded as they arrive; they never move the engine's own state.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capability::AdapterCapabilities;
use crate::error::{BeaconError, Result};
use crate::notify::{NotificationSink, PublisherEvent};
use crate::transport::{AdvertiseTransport, PumpHandle, StatusSubscription};
use crate::types::{AdvertisementSection, Phy, PublisherStatus, TransportError};
use crate::watcher::START_GRACE;

/// Largest legacy advertising payload.
pub const LEGACY_PAYLOAD_LIMIT: usize = 31;

/// Largest extended advertising payload.
pub const EXTENDED_PAYLOAD_LIMIT: usize = 1650;

// ============================================================================
// Configuration
// ============================================================================

/// Payload and PHY selection for one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Sections to broadcast.
    pub payload: Vec<AdvertisementSection>,
    /// PHY of the primary advertising channels.
    pub primary_phy: Phy,
    /// PHY of the secondary advertising channel.
    pub secondary_phy: Phy,
    /// Use the Bluetooth 5 extended advertising format.
    pub use_extended_format: bool,
}

impl PublisherConfig {
    /// A legacy 1M broadcast of `payload`.
    #[must_use]
    pub fn new(payload: Vec<AdvertisementSection>) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    /// Switches to Coded primary / 2M secondary, which requires the extended format.
    #[must_use]
    pub fn with_long_range_phys(mut self) -> Self {
        self.primary_phy = Phy::Coded;
        self.secondary_phy = Phy::Uncoded2M;
        self.use_extended_format = true;
        self
    }

    /// Encoded size of the payload in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.payload.iter().map(AdvertisementSection::encoded_len).sum()
    }

    /// Largest payload the selected format can carry.
    #[must_use]
    pub const fn payload_limit(&self) -> usize {
        if self.use_extended_format {
            EXTENDED_PAYLOAD_LIMIT
        } else {
            LEGACY_PAYLOAD_LIMIT
        }
    }

    /// Checks the PHY selection.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::ConfigValidationError`] if the primary PHY is
    /// 2M, or a non-1M PHY is selected without the extended format.
    pub fn validate_phys(&self) -> Result<()> {
        if self.primary_phy == Phy::Uncoded2M {
            return Err(BeaconError::ConfigValidationError(
                "the primary advertising PHY cannot be 2M".into(),
            ));
        }
        let non_default = self.primary_phy != Phy::Uncoded1M || self.secondary_phy != Phy::Uncoded1M;
        if non_default && !self.use_extended_format {
            return Err(BeaconError::ConfigValidationError(
                "non-1M PHYs require the extended advertising format".into(),
            ));
        }
        Ok(())
    }

    /// Checks the payload is publishable.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidPayload`] if the payload is empty or
    /// larger than the selected format allows.
    pub fn validate_payload(&self) -> Result<()> {
        if self.payload.is_empty() {
            return Err(BeaconError::InvalidPayload("payload is empty".into()));
        }
        let size = self.encoded_len();
        let limit = self.payload_limit();
        if size > limit {
            return Err(BeaconError::InvalidPayload(format!(
                "payload is {size} bytes, {} format allows {limit}",
                if self.use_extended_format { "extended" } else { "legacy" }
            )));
        }
        Ok(())
    }

    /// Runs every check.
    ///
    /// # Errors
    ///
    /// See [`Self::validate_phys`] and [`Self::validate_payload`].
    pub fn validate(&self) -> Result<()> {
        self.validate_phys()?;
        self.validate_payload()
    }

    /// Falls back to 1M/1M legacy unless the adapter can do 2M and Coded.
    #[must_use]
    pub fn constrained_to(mut self, caps: &AdapterCapabilities) -> Self {
        if !caps.supports_publisher_phys() {
            self.primary_phy = Phy::Uncoded1M;
            self.secondary_phy = Phy::Uncoded1M;
            self.use_extended_format = false;
        }
        self
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Publisher lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublisherState {
    /// Never started.
    Created,
    /// Broadcast requested.
    Started,
    /// Broadcast end requested.
    Stopped,
}

impl fmt::Display for PublisherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Stopped => "stopped",
        })
    }
}

#[derive(Debug)]
struct Inner {
    state: PublisherState,
    observed: Option<PublisherStatus>,
    last_error: Option<TransportError>,
    pump: Option<PumpHandle>,
    generation: u64,
    starting: bool,
}

struct Shared {
    config: PublisherConfig,
    transport: Arc<dyn AdvertiseTransport>,
    sink: NotificationSink,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, status: PublisherStatus, error: Option<TransportError>, generation: Option<u64>) {
        let mut inner = self.lock();
        if generation.is_some_and(|g| g != inner.generation) {
            return;
        }
        inner.observed = Some(status);
        inner.last_error = error;
        match (status, error) {
            (PublisherStatus::Aborted, _) | (_, Some(_)) => {
                warn!(%status, error = ?error, "Publisher status changed");
            }
            _ => debug!(%status, "Publisher status changed"),
        }
        self.sink
            .notify(PublisherEvent::StatusChanged { status, error });
    }
}

/// Snapshot of a publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PublisherSnapshot {
    /// Engine state.
    pub state: PublisherState,
    /// Last status reported by the transport.
    pub observed: Option<PublisherStatus>,
    /// Error that came with it.
    pub last_error: Option<TransportError>,
}

/// A broadcast bound to one advertise transport.
///
/// Cheap to clone; clones share the same engine.
#[derive(Clone)]
pub struct PublisherEngine {
    shared: Arc<Shared>,
}

impl fmt::Debug for PublisherEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublisherEngine")
            .field("config", &self.shared.config)
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl PublisherEngine {
    /// Creates a publisher in the `Created` state.
    ///
    /// The payload itself is checked by [`Self::start`].
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::ConfigValidationError`] for an invalid PHY selection.
    pub fn new(
        config: PublisherConfig,
        transport: Arc<dyn AdvertiseTransport>,
        sink: NotificationSink,
    ) -> Result<Self> {
        config.validate_phys()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                transport,
                sink,
                inner: Mutex::new(Inner {
                    state: PublisherState::Created,
                    observed: None,
                    last_error: None,
                    pump: None,
                    generation: 0,
                    starting: false,
                }),
            }),
        })
    }

    /// Configuration this publisher was built with.
    #[must_use]
    pub fn config(&self) -> &PublisherConfig {
        &self.shared.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PublisherState {
        self.shared.lock().state
    }

    /// State plus last observed transport status.
    #[must_use]
    pub fn snapshot(&self) -> PublisherSnapshot {
        let inner = self.shared.lock();
        PublisherSnapshot {
            state: inner.state,
            observed: inner.observed,
            last_error: inner.last_error,
        }
    }

    /// Requests the broadcast to begin.
    ///
    /// # Errors
    ///
    /// - [`BeaconError::InvalidPayload`] if the payload is empty or too large;
    ///   nothing else happens.
    /// - [`BeaconError::InvalidState`] if already started.
    /// - [`BeaconError::DeviceUnavailable`] if the radio refuses or does not
    ///   answer within [`START_GRACE`].
    pub async fn start(&self) -> Result<()> {
        self.shared.config.validate_payload()?;

        let generation = {
            let mut inner = self.shared.lock();
            if inner.starting {
                return Err(BeaconError::invalid_state("start", "starting"));
            }
            if inner.state == PublisherState::Started {
                return Err(BeaconError::invalid_state("start", inner.state));
            }
            inner.starting = true;
            inner.generation += 1;
            inner.pump = None;
            inner.generation
        };

        let outcome =
            tokio::time::timeout(START_GRACE, self.shared.transport.start(&self.shared.config))
                .await;

        let mut inner = self.shared.lock();
        inner.starting = false;
        let subscription = match outcome {
            Ok(Ok(subscription)) => subscription,
            Ok(Err(e)) => {
                warn!(error = %e, "Advertise transport refused to start");
                return Err(e);
            }
            Err(_) => {
                self.shared.transport.stop();
                warn!(grace = ?START_GRACE, "Advertise transport did not acknowledge start");
                return Err(BeaconError::DeviceUnavailable(format!(
                    "advertise transport did not acknowledge start within {}s",
                    START_GRACE.as_secs()
                )));
            }
        };
        if inner.generation != generation {
            self.shared.transport.stop();
            return Err(BeaconError::invalid_state("start", inner.state));
        }

        inner.state = PublisherState::Started;
        inner.observed = None;
        inner.last_error = None;
        let task = tokio::spawn(pump(Arc::downgrade(&self.shared), subscription, generation));
        inner.pump = Some(PumpHandle::new(task));
        info!(
            bytes = self.shared.config.encoded_len(),
            extended = self.shared.config.use_extended_format,
            "Publisher started"
        );
        Ok(())
    }

    /// Records and forwards a transport status verbatim.
    pub fn on_status_changed(&self, status: PublisherStatus, error: Option<TransportError>) {
        self.shared.record(status, error, None);
    }

    /// Requests the broadcast to end. Idempotent.
    ///
    /// The status stream stays attached so the transport's final status is
    /// still forwarded.
    pub fn stop(&self) {
        let mut inner = self.shared.lock();
        if inner.state != PublisherState::Started && !inner.starting {
            debug!(state = %inner.state, "Publisher not running");
            return;
        }
        if inner.starting {
            inner.generation += 1;
        }
        inner.state = PublisherState::Stopped;
        self.shared.transport.stop();
        info!("Publisher stop requested");
    }

    /// Forces `Stopped` and detaches from the transport.
    pub fn suspend(&self) {
        let mut inner = self.shared.lock();
        let was_running = inner.state == PublisherState::Started || inner.starting;
        inner.state = PublisherState::Stopped;
        inner.generation += 1;
        inner.pump = None;
        if was_running {
            self.shared.transport.stop();
            info!("Publisher suspended");
        }
    }
}

async fn pump(shared: Weak<Shared>, mut subscription: StatusSubscription, generation: u64) {
    while let Some(update) = subscription.recv().await {
        let Some(shared) = shared.upgrade() else { return };
        shared.record(update.status, update.error, Some(generation));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRadio;
    use crate::notify::Notification;
    use crate::transport::Radio;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn reference_payload() -> Vec<AdvertisementSection> {
        vec![AdvertisementSection::manufacturer(0xFFFE, [0x34, 0x12])]
    }

    fn engine(radio: &MockRadio, config: PublisherConfig) -> (PublisherEngine, mpsc::Receiver<Notification>) {
        let (sink, rx) = NotificationSink::channel(32);
        (PublisherEngine::new(config, radio.advertiser(), sink).unwrap(), rx)
    }

    fn statuses(rx: &mut mpsc::Receiver<Notification>) -> Vec<(PublisherStatus, Option<TransportError>)> {
        let mut out = Vec::new();
        while let Ok(Notification::Publisher(PublisherEvent::StatusChanged { status, error })) =
            rx.try_recv()
        {
            out.push((status, error));
        }
        out
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[test]
    fn test_phy_rules() {
        let mut config = PublisherConfig::new(reference_payload());
        assert!(config.validate().is_ok());

        config.secondary_phy = Phy::Uncoded2M;
        assert!(config.validate_phys().is_err());
        config.use_extended_format = true;
        assert!(config.validate_phys().is_ok());

        config.primary_phy = Phy::Uncoded2M;
        assert!(config.validate_phys().is_err());

        assert!(PublisherConfig::new(reference_payload())
            .with_long_range_phys()
            .validate()
            .is_ok());
    }

    #[test]
    fn test_payload_size_limits() {
        let big = vec![AdvertisementSection::manufacturer(0xFFFE, vec![0u8; 40])];
        let legacy = PublisherConfig::new(big.clone());
        assert!(matches!(legacy.validate_payload(), Err(BeaconError::InvalidPayload(_))));

        let mut extended = PublisherConfig::new(big);
        extended.use_extended_format = true;
        assert!(extended.validate_payload().is_ok());

        // 2 header + 2 company id + 27 data = 31, exactly the legacy limit.
        let exact = PublisherConfig::new(vec![AdvertisementSection::manufacturer(1, vec![0u8; 27])]);
        assert_eq!(exact.encoded_len(), LEGACY_PAYLOAD_LIMIT);
        assert!(exact.validate_payload().is_ok());
    }

    #[test]
    fn test_constrained_to_falls_back_to_legacy() {
        let config = PublisherConfig::new(reference_payload()).with_long_range_phys();

        let narrowed = config.clone().constrained_to(&AdapterCapabilities::default());
        assert_eq!(narrowed, PublisherConfig::new(reference_payload()));

        assert_eq!(config.clone().constrained_to(&AdapterCapabilities::all()), config);
    }

    #[test]
    fn test_new_rejects_bad_phys() {
        let radio = MockRadio::new();
        let (sink, _rx) = NotificationSink::channel(4);
        let mut config = PublisherConfig::new(reference_payload());
        config.primary_phy = Phy::Coded;

        let err = PublisherEngine::new(config, radio.advertiser(), sink).unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_empty_payload_stays_created() {
        let radio = MockRadio::new();
        let (engine, mut rx) = engine(&radio, PublisherConfig::default());

        let err = engine.start().await.unwrap_err();

        assert!(matches!(err, BeaconError::InvalidPayload(_)));
        assert_eq!(engine.state(), PublisherState::Created);
        assert_eq!(radio.active_advertisements(), 0);
        assert!(statuses(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_start_forwards_transport_status() {
        let radio = MockRadio::new();
        let (engine, mut rx) = engine(&radio, PublisherConfig::new(reference_payload()));

        engine.start().await.unwrap();
        settle().await;

        assert_eq!(engine.state(), PublisherState::Started);
        assert_eq!(statuses(&mut rx), vec![(PublisherStatus::Started, None)]);
        assert_eq!(engine.snapshot().observed, Some(PublisherStatus::Started));
    }

    #[tokio::test]
    async fn test_start_twice_is_invalid_state() {
        let radio = MockRadio::new();
        let (engine, _rx) = engine(&radio, PublisherConfig::new(reference_payload()));

        engine.start().await.unwrap();
        let err = engine.start().await.unwrap_err();

        assert!(matches!(err, BeaconError::InvalidState { .. }));
        assert_eq!(engine.state(), PublisherState::Started);
    }

    #[tokio::test]
    async fn test_aborted_status_is_reported_not_acted_on() {
        let radio = MockRadio::new();
        let (engine, mut rx) = engine(&radio, PublisherConfig::new(reference_payload()));
        engine.start().await.unwrap();

        radio
            .emit_status(PublisherStatus::Aborted, Some(TransportError::ResourceInUse))
            .await;
        radio.emit_status(PublisherStatus::Waiting, None).await;
        settle().await;

        assert_eq!(
            statuses(&mut rx),
            vec![
                (PublisherStatus::Started, None),
                (PublisherStatus::Aborted, Some(TransportError::ResourceInUse)),
                (PublisherStatus::Waiting, None),
            ]
        );
        assert_eq!(engine.state(), PublisherState::Started);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_forwards_final_status() {
        let radio = MockRadio::new();
        let (engine, mut rx) = engine(&radio, PublisherConfig::new(reference_payload()));
        engine.start().await.unwrap();

        engine.stop();
        engine.stop();
        settle().await;

        assert_eq!(engine.state(), PublisherState::Stopped);
        assert_eq!(radio.active_advertisements(), 0);
        assert_eq!(
            statuses(&mut rx),
            vec![(PublisherStatus::Started, None), (PublisherStatus::Stopped, None)]
        );

        engine.start().await.unwrap();
        assert_eq!(engine.state(), PublisherState::Started);
    }

    #[tokio::test]
    async fn test_stop_before_start_does_nothing() {
        let radio = MockRadio::new();
        let (engine, _rx) = engine(&radio, PublisherConfig::new(reference_payload()));

        engine.stop();
        assert_eq!(engine.state(), PublisherState::Created);
    }

    #[tokio::test]
    async fn test_suspend_detaches_status_stream() {
        let radio = MockRadio::new();
        let (engine, mut rx) = engine(&radio, PublisherConfig::new(reference_payload()));
        engine.start().await.unwrap();
        settle().await;
        statuses(&mut rx);

        engine.suspend();
        settle().await;

        assert_eq!(engine.state(), PublisherState::Stopped);
        assert_eq!(radio.active_advertisements(), 0);
        assert!(statuses(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_suspend_from_created_stops() {
        let radio = MockRadio::new();
        let (engine, mut rx) = engine(&radio, PublisherConfig::new(reference_payload()));

        engine.suspend();

        assert_eq!(engine.state(), PublisherState::Stopped);
        assert_eq!(radio.advertise_starts(), 0);
        assert!(statuses(&mut rx).is_empty());

        engine.start().await.unwrap();
        assert_eq!(engine.state(), PublisherState::Started);
    }

    #[tokio::test]
    async fn test_unavailable_radio() {
        let radio = MockRadio::new();
        radio.set_available(false);
        let (engine, _rx) = engine(&radio, PublisherConfig::new(reference_payload()));

        assert!(matches!(
            engine.start().await,
            Err(BeaconError::DeviceUnavailable(_))
        ));
        assert_eq!(engine.state(), PublisherState::Created);
    }
}

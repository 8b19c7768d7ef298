//! Advertisement watcher.
//!
//! [`WatcherCore`] is the synchronous filtering pipeline: pattern match, then
//! one [`ProximityFilter`] per source address. [`WatcherEngine`] wraps it in
//! the `Created -> Started -> Stopped` lifecycle and drives it from a
//! [`ScanTransport`] subscription on a background task (the pump).
//!
//! Every matching sample yields a `Received` event. Proximity changes are a
//! separate stream layered on top; they never gate `Received`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::capability::AdapterCapabilities;
use crate::error::{BeaconError, Result};
use crate::notify::{NotificationSink, WatcherEvent};
use crate::pattern::AdvertisementPattern;
use crate::proximity::{ProximityFilter, SignalStrengthFilter};
use crate::types::{DeviceAddress, ProximityState, ScanParameters, ScanSample, TransportError};
use crate::transport::{PumpHandle, ScanEvent, ScanSubscription, ScanTransport};

/// How long `start` waits for the transport to acknowledge.
pub const START_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// Configuration
// ============================================================================

/// Everything a watcher needs to know before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Content that samples must contain.
    pub pattern: AdvertisementPattern,
    /// Proximity thresholds, timeout and sampling interval.
    pub signal: SignalStrengthFilter,
    /// Also receive Bluetooth 5 extended advertisements.
    pub allow_extended_advertisements: bool,
    /// Listen on LE Coded in addition to LE 1M.
    pub scan_coded_phy: bool,
    /// Scan duty-cycle preference.
    pub scan_parameters: ScanParameters,
    /// Let the controller apply the pattern.
    pub hardware_filter_offload: bool,
}

impl WatcherConfig {
    /// A 1M-only, software-filtered watcher.
    #[must_use]
    pub fn new(pattern: AdvertisementPattern, signal: SignalStrengthFilter) -> Self {
        Self {
            pattern,
            signal,
            allow_extended_advertisements: false,
            scan_coded_phy: false,
            scan_parameters: ScanParameters::default(),
            hardware_filter_offload: false,
        }
    }

    /// Checks the cross-field rules.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::ConfigValidationError`] if Coded PHY scanning is
    /// requested without extended advertisements, or hardware filtering
    /// without a pattern.
    pub fn validate(&self) -> Result<()> {
        if self.scan_coded_phy && !self.allow_extended_advertisements {
            return Err(BeaconError::ConfigValidationError(
                "scanning on the Coded PHY requires extended advertisements".into(),
            ));
        }
        if self.hardware_filter_offload && self.pattern.is_empty() {
            return Err(BeaconError::ConfigValidationError(
                "hardware filter offload requires a non-empty pattern".into(),
            ));
        }
        Ok(())
    }

    /// Drops every option `caps` does not support.
    #[must_use]
    pub fn constrained_to(mut self, caps: &AdapterCapabilities) -> Self {
        if !caps.supports_coded_phy() {
            self.scan_coded_phy = false;
            self.allow_extended_advertisements = false;
        }
        if !caps.supports_hardware_filter() {
            self.hardware_filter_offload = false;
            self.scan_parameters = ScanParameters::LowLatency;
        }
        self
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self::new(AdvertisementPattern::any(), SignalStrengthFilter::default())
    }
}

// ============================================================================
// Lifecycle types
// ============================================================================

/// Watcher lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherState {
    /// Never started.
    Created,
    /// Accepting samples.
    Started,
    /// Stopped; may be started again.
    Stopped,
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Stopped => "stopped",
        })
    }
}

/// Why a watcher stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `stop` was called.
    UserRequested,
    /// The host stopped the watcher because it found the radio unavailable.
    RadioUnavailable,
    /// The transport aborted underneath a running watcher, including the
    /// radio being turned off. The transport error is recorded alongside.
    SystemAborted,
    /// The hosting process is being suspended.
    Suspended,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::UserRequested => "UserRequested",
            Self::RadioUnavailable => "RadioUnavailable",
            Self::SystemAborted => "SystemAborted",
            Self::Suspended => "Suspended",
        })
    }
}

// ============================================================================
// Filtering pipeline
// ============================================================================

/// Pattern matcher plus per-source proximity filters.
#[derive(Debug, Clone)]
pub struct WatcherCore {
    pattern: AdvertisementPattern,
    signal: SignalStrengthFilter,
    filters: HashMap<DeviceAddress, ProximityFilter>,
}

impl WatcherCore {
    /// A pipeline for `config` with no tracked sources.
    #[must_use]
    pub fn new(config: &WatcherConfig) -> Self {
        Self {
            pattern: config.pattern.clone(),
            signal: config.signal,
            filters: HashMap::new(),
        }
    }

    /// Processes one sample observed at `now`.
    ///
    /// Due out-of-range timers fire first. A matching sample then yields
    /// `Received` followed by any proximity change of its source; a
    /// non-matching sample yields nothing of its own.
    pub fn process(&mut self, sample: ScanSample, now: Instant) -> Vec<WatcherEvent> {
        let mut events = self.expire(now);
        if !self.pattern.matches(&sample) {
            trace!(address = %sample.address, "Sample does not match pattern");
            return events;
        }

        let address = sample.address;
        let rssi_dbm = sample.rssi_dbm;
        let signal = self.signal;
        let changes = self
            .filters
            .entry(address)
            .or_insert_with(|| ProximityFilter::new(signal))
            .on_sample(rssi_dbm, now);

        events.push(WatcherEvent::Received { sample });
        events.extend(changes.into_iter().map(|change| WatcherEvent::Proximity {
            address,
            state: change.state,
            rssi_dbm: change.rssi_dbm,
            at: Utc::now(),
        }));
        events
    }

    /// Fires every out-of-range timer due at `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<WatcherEvent> {
        let mut due: Vec<(DeviceAddress, Instant, WatcherEvent)> = self
            .filters
            .iter_mut()
            .filter_map(|(address, filter)| {
                let deadline = filter.deadline()?;
                let change = filter.poll(now)?;
                Some((
                    *address,
                    deadline,
                    WatcherEvent::Proximity {
                        address: *address,
                        state: change.state,
                        rssi_dbm: None,
                        at: Utc::now(),
                    },
                ))
            })
            .collect();
        due.sort_by_key(|(address, deadline, _)| (*deadline, *address));
        due.into_iter().map(|(_, _, event)| event).collect()
    }

    /// Earliest pending out-of-range deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.filters.values().filter_map(ProximityFilter::deadline).min()
    }

    /// Proximity of `address`; `Unknown` if never seen.
    #[must_use]
    pub fn proximity(&self, address: &DeviceAddress) -> ProximityState {
        self.filters
            .get(address)
            .map_or(ProximityState::Unknown, ProximityFilter::state)
    }

    /// Every tracked source and its state.
    #[must_use]
    pub fn sources(&self) -> Vec<(DeviceAddress, ProximityState)> {
        let mut sources: Vec<_> = self
            .filters
            .iter()
            .map(|(address, filter)| (*address, filter.state()))
            .collect();
        sources.sort_by_key(|(address, _)| *address);
        sources
    }

    /// Forgets every source.
    pub fn reset(&mut self) {
        self.filters.clear();
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug)]
struct Inner {
    state: WatcherState,
    core: WatcherCore,
    pump: Option<PumpHandle>,
    generation: u64,
    starting: bool,
    last_stop: Option<(StopReason, Option<TransportError>)>,
}

struct Shared {
    config: WatcherConfig,
    transport: Arc<dyn ScanTransport>,
    sink: NotificationSink,
    inner: Mutex<Inner>,
    wake: Arc<Notify>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `sample` through the pipeline if `generation` is still live.
    fn handle_sample(&self, sample: ScanSample, generation: Option<u64>) {
        let mut inner = self.lock();
        if inner.state != WatcherState::Started
            || generation.is_some_and(|g| g != inner.generation)
        {
            return;
        }
        if let Err(e) = sample.validate() {
            warn!(address = %sample.address, error = %e, "Dropping malformed sample");
            return;
        }
        trace!(address = %sample.address, rssi_dbm = sample.rssi_dbm, "Sample");
        for event in inner.core.process(sample, Instant::now()) {
            self.sink.notify(event);
        }
    }

    fn handle_timers(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.state != WatcherState::Started || inner.generation != generation {
            return;
        }
        for event in inner.core.expire(Instant::now()) {
            self.sink.notify(event);
        }
    }

    fn next_deadline(&self, generation: u64) -> Option<Option<Instant>> {
        let inner = self.lock();
        (inner.state == WatcherState::Started && inner.generation == generation)
            .then(|| inner.core.next_deadline())
    }

    /// The transport stopped without being asked to.
    fn transport_stopped(&self, error: Option<TransportError>, generation: u64) {
        let mut inner = self.lock();
        if inner.state != WatcherState::Started || inner.generation != generation {
            return;
        }
        let reason = StopReason::SystemAborted;
        inner.state = WatcherState::Stopped;
        inner.generation += 1;
        inner.last_stop = Some((reason, error));
        if let Some(pump) = inner.pump.take() {
            pump.detach();
        }
        warn!(%reason, error = ?error, "Watcher aborted by transport");
        self.sink.notify(WatcherEvent::Stopped { reason, error });
    }
}

/// A pattern-matching, proximity-filtering watcher bound to one scan transport.
///
/// Cheap to clone; clones share the same engine.
#[derive(Clone)]
pub struct WatcherEngine {
    shared: Arc<Shared>,
}

impl fmt::Debug for WatcherEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherEngine")
            .field("config", &self.shared.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl WatcherEngine {
    /// Creates a watcher in the `Created` state.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::ConfigValidationError`] if `config` is inconsistent.
    pub fn new(
        config: WatcherConfig,
        transport: Arc<dyn ScanTransport>,
        sink: NotificationSink,
    ) -> Result<Self> {
        config.validate()?;
        let inner = Inner {
            state: WatcherState::Created,
            core: WatcherCore::new(&config),
            pump: None,
            generation: 0,
            starting: false,
            last_stop: None,
        };
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                transport,
                sink,
                inner: Mutex::new(inner),
                wake: Arc::new(Notify::new()),
            }),
        })
    }

    /// Configuration this watcher was built with.
    #[must_use]
    pub fn config(&self) -> &WatcherConfig {
        &self.shared.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WatcherState {
        self.shared.lock().state
    }

    /// Reason and error of the most recent stop.
    #[must_use]
    pub fn last_stop(&self) -> Option<(StopReason, Option<TransportError>)> {
        self.shared.lock().last_stop
    }

    /// Proximity of one source.
    #[must_use]
    pub fn proximity(&self, address: &DeviceAddress) -> ProximityState {
        self.shared.lock().core.proximity(address)
    }

    /// Every source seen since the last start.
    #[must_use]
    pub fn sources(&self) -> Vec<(DeviceAddress, ProximityState)> {
        self.shared.lock().core.sources()
    }

    /// Starts scanning.
    ///
    /// Waits up to [`START_GRACE`] for the transport.
    ///
    /// # Errors
    ///
    /// - [`BeaconError::InvalidState`] if already started (or starting).
    /// - [`BeaconError::DeviceUnavailable`] if the radio refuses or does not
    ///   answer in time. The state is unchanged.
    pub async fn start(&self) -> Result<()> {
        let generation = {
            let mut inner = self.shared.lock();
            if inner.starting {
                return Err(BeaconError::invalid_state("start", "starting"));
            }
            if inner.state == WatcherState::Started {
                return Err(BeaconError::invalid_state("start", inner.state));
            }
            inner.starting = true;
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
                warn!(error = %e, "Scan transport refused to start");
                return Err(e);
            }
            Err(_) => {
                self.shared.transport.stop();
                warn!(grace = ?START_GRACE, "Scan transport did not acknowledge start");
                return Err(BeaconError::DeviceUnavailable(format!(
                    "scan transport did not acknowledge start within {}s",
                    START_GRACE.as_secs()
                )));
            }
        };
        if inner.generation != generation {
            // Stopped or suspended while the transport was starting.
            self.shared.transport.stop();
            return Err(BeaconError::invalid_state("start", inner.state));
        }

        inner.state = WatcherState::Started;
        inner.core.reset();
        let task = tokio::spawn(pump(
            Arc::downgrade(&self.shared),
            Arc::clone(&self.shared.wake),
            subscription,
            generation,
        ));
        inner.pump = Some(PumpHandle::new(task));
        info!(
            pattern_sections = self.shared.config.pattern.len(),
            filter = %self.shared.config.signal,
            "Watcher started"
        );
        Ok(())
    }

    /// Feeds a sample directly, bypassing the transport.
    ///
    /// No-op unless started. Malformed samples are logged and dropped.
    pub fn on_sample(&self, sample: ScanSample) {
        self.shared.handle_sample(sample, None);
        self.shared.wake.notify_one();
    }

    /// Stops the watcher and emits `Stopped { reason }`.
    ///
    /// The transport is asked to stop but not waited for. Stopping an
    /// already stopped watcher does nothing.
    pub fn stop(&self, reason: StopReason) {
        let mut inner = self.shared.lock();
        if inner.state == WatcherState::Stopped {
            debug!(%reason, "Watcher already stopped");
            return;
        }
        let was_running = inner.state == WatcherState::Started || inner.starting;
        inner.state = WatcherState::Stopped;
        inner.generation += 1;
        inner.last_stop = Some((reason, None));
        inner.pump = None;
        if was_running {
            self.shared.transport.stop();
        }
        info!(%reason, "Watcher stopped");
        self.shared
            .sink
            .notify(WatcherEvent::Stopped { reason, error: None });
    }

    /// Forces the watcher to `Stopped` for process suspension.
    pub fn suspend(&self) {
        self.stop(StopReason::Suspended);
    }
}

async fn pump(
    shared: Weak<Shared>,
    wake: Arc<Notify>,
    mut subscription: ScanSubscription,
    generation: u64,
) {
    loop {
        let deadline = match shared.upgrade().map(|s| s.next_deadline(generation)) {
            Some(Some(deadline)) => deadline,
            _ => return,
        };

        tokio::select! {
            event = subscription.recv() => {
                let Some(shared) = shared.upgrade() else { return };
                match event {
                    Some(ScanEvent::Sample(sample)) => shared.handle_sample(sample, Some(generation)),
                    Some(ScanEvent::Stopped(error)) => {
                        shared.transport_stopped(error, generation);
                        return;
                    }
                    None => {
                        shared.transport_stopped(None, generation);
                        return;
                    }
                }
            }
            () = sleep_until_deadline(deadline) => {
                let Some(shared) = shared.upgrade() else { return };
                shared.handle_timers(generation);
            }
            () = wake.notified() => {}
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRadio;
    use crate::notify::Notification;
    use crate::transport::Radio;
    use crate::types::AdvertisementSection;
    use tokio::sync::mpsc;

    const SOURCE: DeviceAddress = DeviceAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01]);

    fn reference_config() -> WatcherConfig {
        WatcherConfig::new(
            AdvertisementPattern::any()
                .with_section(AdvertisementSection::manufacturer(0xFFFE, [0x34, 0x12])),
            SignalStrengthFilter::new(-70, -75, Some(Duration::from_secs(2)), Duration::ZERO)
                .unwrap(),
        )
    }

    fn matching(rssi: i16) -> ScanSample {
        ScanSample::new(SOURCE, rssi)
            .with_section(AdvertisementSection::manufacturer(0xFFFE, [0x34, 0x12]))
    }

    fn engine(radio: &MockRadio) -> (WatcherEngine, mpsc::Receiver<Notification>) {
        let (sink, rx) = NotificationSink::channel(32);
        let engine = WatcherEngine::new(reference_config(), radio.scanner(), sink).unwrap();
        (engine, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Notification>) -> Vec<WatcherEvent> {
        let mut events = Vec::new();
        while let Ok(n) = rx.try_recv() {
            if let Notification::Watcher(event) = n {
                events.push(event);
            }
        }
        events
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[test]
    fn test_config_validation() {
        let mut config = reference_config();
        config.scan_coded_phy = true;
        assert!(config.validate().is_err());
        config.allow_extended_advertisements = true;
        assert!(config.validate().is_ok());

        let mut config = WatcherConfig::default();
        config.hardware_filter_offload = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_constrained_to_clears_unsupported_options() {
        let mut config = reference_config();
        config.allow_extended_advertisements = true;
        config.scan_coded_phy = true;
        config.hardware_filter_offload = true;
        config.scan_parameters = ScanParameters::CoexistenceOptimized;

        let narrowed = config.clone().constrained_to(&AdapterCapabilities::default());
        assert!(!narrowed.scan_coded_phy);
        assert!(!narrowed.allow_extended_advertisements);
        assert!(!narrowed.hardware_filter_offload);
        assert_eq!(narrowed.scan_parameters, ScanParameters::LowLatency);
        assert!(narrowed.validate().is_ok());

        assert_eq!(config.clone().constrained_to(&AdapterCapabilities::all()), config);
    }

    #[test]
    fn test_core_tracks_sources_independently() {
        let mut core = WatcherCore::new(&reference_config());
        let other = DeviceAddress([1, 2, 3, 4, 5, 6]);
        let t0 = Instant::now();

        core.process(matching(-60), t0);
        let mut far = matching(-90);
        far.address = other;
        core.process(far, t0);

        assert_eq!(core.proximity(&SOURCE), ProximityState::InRange);
        assert_eq!(core.proximity(&other), ProximityState::Unknown);
        assert_eq!(core.sources().len(), 2);
    }

    #[test]
    fn test_core_end_to_end_sequence() {
        let mut core = WatcherCore::new(&reference_config());
        let t0 = Instant::now();

        let first = core.process(matching(-65), t0);
        assert!(matches!(first[0], WatcherEvent::Received { .. }));
        assert!(matches!(
            first[1],
            WatcherEvent::Proximity { state: ProximityState::InRange, .. }
        ));
        assert_eq!(first.len(), 2);

        let second = core.process(matching(-80), t0 + Duration::from_millis(100));
        assert_eq!(second.len(), 1);
        assert!(matches!(second[0], WatcherEvent::Received { .. }));

        let third = core.process(ScanSample::new(SOURCE, -65), t0 + Duration::from_millis(200));
        assert!(third.is_empty());

        assert!(core.expire(t0 + Duration::from_millis(1999)).is_empty());
        let expired = core.expire(t0 + Duration::from_secs(2));
        assert_eq!(expired.len(), 1);
        assert!(matches!(
            expired[0],
            WatcherEvent::Proximity { state: ProximityState::OutOfRange, rssi_dbm: None, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_end_to_end() {
        let radio = MockRadio::new();
        let (engine, mut rx) = engine(&radio);
        engine.start().await.unwrap();

        radio.deliver(matching(-65)).await;
        radio.deliver(matching(-80)).await;
        radio.deliver(ScanSample::new(SOURCE, -65)).await;
        settle().await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], WatcherEvent::Received { sample } if sample.rssi_dbm == -65));
        assert!(matches!(
            events[1],
            WatcherEvent::Proximity { state: ProximityState::InRange, rssi_dbm: Some(-65), .. }
        ));
        assert!(matches!(&events[2], WatcherEvent::Received { sample } if sample.rssi_dbm == -80));

        tokio::time::sleep(Duration::from_secs(2)).await;
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            WatcherEvent::Proximity { state: ProximityState::OutOfRange, .. }
        ));
        assert_eq!(engine.proximity(&SOURCE), ProximityState::OutOfRange);
    }

    #[tokio::test]
    async fn test_start_twice_is_invalid_state() {
        let radio = MockRadio::new();
        let (engine, _rx) = engine(&radio);

        engine.start().await.unwrap();
        let err = engine.start().await.unwrap_err();

        assert!(matches!(err, BeaconError::InvalidState { .. }));
        assert_eq!(engine.state(), WatcherState::Started);
        assert_eq!(radio.active_scans(), 1);
    }

    #[tokio::test]
    async fn test_stop_emits_reason_and_restart_is_allowed() {
        let radio = MockRadio::new();
        let (engine, mut rx) = engine(&radio);

        engine.start().await.unwrap();
        engine.stop(StopReason::UserRequested);
        assert_eq!(engine.state(), WatcherState::Stopped);
        assert_eq!(radio.active_scans(), 0);
        assert_eq!(
            drain(&mut rx),
            vec![WatcherEvent::Stopped { reason: StopReason::UserRequested, error: None }]
        );

        engine.stop(StopReason::UserRequested);
        assert!(drain(&mut rx).is_empty());

        engine.start().await.unwrap();
        assert_eq!(engine.state(), WatcherState::Started);
    }

    #[tokio::test]
    async fn test_start_fails_when_radio_unavailable() {
        let radio = MockRadio::new();
        radio.set_available(false);
        let (engine, _rx) = engine(&radio);

        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, BeaconError::DeviceUnavailable(_)));
        assert_eq!(engine.state(), WatcherState::Created);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_gives_up_after_grace_period() {
        let radio = MockRadio::new();
        radio.set_start_delay(Duration::from_secs(30));
        let (engine, _rx) = engine(&radio);

        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, BeaconError::DeviceUnavailable(_)));
        assert_eq!(engine.state(), WatcherState::Created);
    }

    #[tokio::test]
    async fn test_transport_abort_stops_without_restart() {
        let radio = MockRadio::new();
        let (engine, mut rx) = engine(&radio);
        engine.start().await.unwrap();

        radio.abort_scans(Some(TransportError::RadioNotAvailable)).await;
        settle().await;

        assert_eq!(engine.state(), WatcherState::Stopped);
        assert_eq!(
            drain(&mut rx),
            vec![WatcherEvent::Stopped {
                reason: StopReason::SystemAborted,
                error: Some(TransportError::RadioNotAvailable),
            }]
        );
        assert_eq!(
            engine.last_stop(),
            Some((StopReason::SystemAborted, Some(TransportError::RadioNotAvailable)))
        );
    }

    #[tokio::test]
    async fn test_other_abort_is_system_aborted() {
        let radio = MockRadio::new();
        let (engine, mut rx) = engine(&radio);
        engine.start().await.unwrap();

        radio.abort_scans(Some(TransportError::DisabledByPolicy)).await;
        settle().await;

        assert!(matches!(
            drain(&mut rx).as_slice(),
            [WatcherEvent::Stopped {
                reason: StopReason::SystemAborted,
                error: Some(TransportError::DisabledByPolicy),
            }]
        ));
    }

    #[tokio::test]
    async fn test_malformed_sample_does_not_stop_watcher() {
        let radio = MockRadio::new();
        let (engine, mut rx) = engine(&radio);
        engine.start().await.unwrap();

        engine.on_sample(matching(-200));
        engine.on_sample(matching(-60));

        assert_eq!(engine.state(), WatcherState::Started);
        let events = drain(&mut rx);
        assert!(matches!(&events[0], WatcherEvent::Received { sample } if sample.rssi_dbm == -60));
    }

    #[tokio::test]
    async fn test_samples_ignored_unless_started() {
        let radio = MockRadio::new();
        let (engine, mut rx) = engine(&radio);

        engine.on_sample(matching(-60));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(engine.proximity(&SOURCE), ProximityState::Unknown);
    }

    #[tokio::test]
    async fn test_suspend_releases_subscription_and_resets_state() {
        let radio = MockRadio::new();
        let (engine, mut rx) = engine(&radio);
        engine.start().await.unwrap();
        engine.on_sample(matching(-60));

        engine.suspend();
        assert_eq!(radio.active_scans(), 0);
        assert_eq!(engine.last_stop(), Some((StopReason::Suspended, None)));

        engine.start().await.unwrap();
        assert_eq!(engine.proximity(&SOURCE), ProximityState::Unknown);
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, WatcherEvent::Stopped { reason: StopReason::Suspended, .. })));
    }
}

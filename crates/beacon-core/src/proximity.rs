//! RSSI hysteresis filtering.
//!
//! [`ProximityFilter`] turns the signal strength of successive samples from
//! one source into discrete in-range / out-of-range events:
//!
//! - a sample at or above `in_range_dbm` puts the source in range and
//!   (re)arms the out-of-range deadline;
//! - when the deadline passes without another in-range sample the source is
//!   demoted to out of range;
//! - a sample at or below `out_of_range_dbm` while in range arms the deadline
//!   if none is pending;
//! - samples strictly between the thresholds change nothing.
//!
//! In-range events are throttled by the sampling interval; the state still
//! updates when an event is suppressed. The filter never reads a clock itself:
//! callers pass `now`, which keeps it deterministic under test.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::error::{BeaconError, Result};
use crate::types::ProximityState;

/// Default in-range threshold.
pub const DEFAULT_IN_RANGE_DBM: i16 = -70;

/// Default out-of-range threshold.
pub const DEFAULT_OUT_OF_RANGE_DBM: i16 = -75;

/// Default out-of-range timeout.
pub const DEFAULT_OUT_OF_RANGE_TIMEOUT: Duration = Duration::from_secs(2);

/// Validated thresholds, timeout and sampling interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignalStrengthFilter {
    in_range_dbm: i16,
    out_of_range_dbm: i16,
    out_of_range_timeout: Option<Duration>,
    sampling_interval: Duration,
}

impl SignalStrengthFilter {
    /// Builds a filter.
    ///
    /// `out_of_range_timeout = None` means a source is never demoted once in
    /// range. A zero `sampling_interval` disables throttling.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::ConfigValidationError`] if `in_range_dbm < out_of_range_dbm`.
    pub fn new(
        in_range_dbm: i16,
        out_of_range_dbm: i16,
        out_of_range_timeout: Option<Duration>,
        sampling_interval: Duration,
    ) -> Result<Self> {
        if in_range_dbm < out_of_range_dbm {
            return Err(BeaconError::ConfigValidationError(format!(
                "in-range threshold ({in_range_dbm} dBm) must not be weaker than \
                 out-of-range threshold ({out_of_range_dbm} dBm)"
            )));
        }
        Ok(Self {
            in_range_dbm,
            out_of_range_dbm,
            out_of_range_timeout,
            sampling_interval,
        })
    }

    /// In-range threshold in dBm.
    #[must_use]
    pub const fn in_range_dbm(&self) -> i16 {
        self.in_range_dbm
    }

    /// Out-of-range threshold in dBm.
    #[must_use]
    pub const fn out_of_range_dbm(&self) -> i16 {
        self.out_of_range_dbm
    }

    /// Out-of-range timeout; `None` is infinite.
    #[must_use]
    pub const fn out_of_range_timeout(&self) -> Option<Duration> {
        self.out_of_range_timeout
    }

    /// Minimum spacing between emitted events; zero is unthrottled.
    #[must_use]
    pub const fn sampling_interval(&self) -> Duration {
        self.sampling_interval
    }
}

impl Default for SignalStrengthFilter {
    fn default() -> Self {
        Self {
            in_range_dbm: DEFAULT_IN_RANGE_DBM,
            out_of_range_dbm: DEFAULT_OUT_OF_RANGE_DBM,
            out_of_range_timeout: Some(DEFAULT_OUT_OF_RANGE_TIMEOUT),
            sampling_interval: Duration::ZERO,
        }
    }
}

impl fmt::Display for SignalStrengthFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HighDBm: {}, LowDBm: {}, Timeout (ms): {}, Sampling (ms): {}",
            self.in_range_dbm,
            self.out_of_range_dbm,
            self.out_of_range_timeout
                .map_or_else(|| "none".to_string(), |t| t.as_millis().to_string()),
            self.sampling_interval.as_millis()
        )
    }
}

/// A proximity event produced by the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProximityChange {
    /// `InRange` or `OutOfRange`.
    pub state: ProximityState,
    /// RSSI of the triggering sample; `None` for a timeout.
    pub rssi_dbm: Option<i16>,
}

/// Hysteresis state machine for one source.
#[derive(Debug, Clone)]
pub struct ProximityFilter {
    settings: SignalStrengthFilter,
    state: ProximityState,
    deadline: Option<Instant>,
    last_emitted: Option<Instant>,
}

impl ProximityFilter {
    /// A filter in the `Unknown` state.
    #[must_use]
    pub const fn new(settings: SignalStrengthFilter) -> Self {
        Self {
            settings,
            state: ProximityState::Unknown,
            deadline: None,
            last_emitted: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ProximityState {
        self.state
    }

    /// Pending out-of-range deadline, if armed.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Feeds one sample observed at `now`.
    ///
    /// An expired deadline is honoured first, so a late sample may yield an
    /// `OutOfRange` followed by an `InRange`.
    pub fn on_sample(&mut self, rssi_dbm: i16, now: Instant) -> Vec<ProximityChange> {
        let mut changes: Vec<ProximityChange> = self.poll(now).into_iter().collect();

        if rssi_dbm >= self.settings.in_range_dbm {
            self.state = ProximityState::InRange;
            self.deadline = self.settings.out_of_range_timeout.map(|t| now + t);
            if self.may_emit(now) {
                self.last_emitted = Some(now);
                changes.push(ProximityChange {
                    state: ProximityState::InRange,
                    rssi_dbm: Some(rssi_dbm),
                });
            }
        } else if rssi_dbm <= self.settings.out_of_range_dbm
            && self.state == ProximityState::InRange
            && self.deadline.is_none()
        {
            self.deadline = self.settings.out_of_range_timeout.map(|t| now + t);
        }

        changes
    }

    /// Fires the out-of-range timer if its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<ProximityChange> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        self.deadline = None;
        self.state = ProximityState::OutOfRange;
        self.last_emitted = Some(now);
        Some(ProximityChange {
            state: ProximityState::OutOfRange,
            rssi_dbm: None,
        })
    }

    /// Returns to `Unknown` and disarms the timer.
    pub fn reset(&mut self) {
        self.state = ProximityState::Unknown;
        self.deadline = None;
        self.last_emitted = None;
    }

    fn may_emit(&self, now: Instant) -> bool {
        let interval = self.settings.sampling_interval;
        if interval.is_zero() {
            return true;
        }
        self.last_emitted
            .map_or(true, |last| now.saturating_duration_since(last) >= interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(timeout: Option<Duration>, sampling: Duration) -> SignalStrengthFilter {
        SignalStrengthFilter::new(-70, -75, timeout, sampling).unwrap()
    }

    fn states(changes: &[ProximityChange]) -> Vec<ProximityState> {
        changes.iter().map(|c| c.state).collect()
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let err = SignalStrengthFilter::new(-80, -75, None, Duration::ZERO).unwrap_err();
        assert!(err.is_config_error());
        assert!(SignalStrengthFilter::new(-75, -75, None, Duration::ZERO).is_ok());
    }

    #[test]
    fn test_in_range_then_timeout_with_neutral_samples() {
        let mut filter = ProximityFilter::new(settings(Some(Duration::from_secs(2)), Duration::ZERO));
        let t0 = Instant::now();
        let mut emitted = Vec::new();

        for (offset, rssi) in [(0, -60), (1, -72), (2, -72), (3, -72)] {
            emitted.extend(filter.on_sample(rssi, t0 + Duration::from_secs(offset)));
        }

        assert_eq!(
            states(&emitted),
            vec![ProximityState::InRange, ProximityState::OutOfRange]
        );
        assert_eq!(filter.state(), ProximityState::OutOfRange);
    }

    #[test]
    fn test_sampling_interval_throttles_in_range_events() {
        let mut filter = ProximityFilter::new(settings(None, Duration::from_secs(1)));
        let t0 = Instant::now();

        let first = filter.on_sample(-60, t0);
        let second = filter.on_sample(-55, t0 + Duration::from_millis(100));
        let third = filter.on_sample(-55, t0 + Duration::from_millis(1100));

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(third.len(), 1);
        assert_eq!(filter.state(), ProximityState::InRange);
    }

    #[test]
    fn test_suppressed_event_still_updates_state() {
        let mut filter =
            ProximityFilter::new(settings(Some(Duration::from_millis(500)), Duration::from_secs(1)));
        let t0 = Instant::now();

        assert_eq!(filter.on_sample(-60, t0).len(), 1);
        let timeout = filter.poll(t0 + Duration::from_millis(500)).unwrap();
        assert_eq!(timeout.state, ProximityState::OutOfRange);

        // 100ms after the out-of-range event: throttled, but the state moves.
        let changes = filter.on_sample(-60, t0 + Duration::from_millis(600));
        assert!(changes.is_empty());
        assert_eq!(filter.state(), ProximityState::InRange);
    }

    #[test]
    fn test_neutral_sample_does_not_reset_pending_timer() {
        let mut filter = ProximityFilter::new(settings(Some(Duration::from_secs(2)), Duration::ZERO));
        let t0 = Instant::now();

        filter.on_sample(-60, t0);
        let deadline = filter.deadline().unwrap();

        assert!(filter.on_sample(-72, t0 + Duration::from_secs(1)).is_empty());
        assert_eq!(filter.deadline(), Some(deadline));
        assert_eq!(filter.state(), ProximityState::InRange);
    }

    #[test]
    fn test_neutral_sample_never_leaves_unknown() {
        let mut filter = ProximityFilter::new(settings(Some(Duration::from_secs(2)), Duration::ZERO));
        let t0 = Instant::now();

        assert!(filter.on_sample(-72, t0).is_empty());
        assert!(filter.on_sample(-90, t0).is_empty());
        assert_eq!(filter.state(), ProximityState::Unknown);
        assert!(filter.deadline().is_none());
    }

    #[test]
    fn test_in_range_sample_rearms_deadline() {
        let mut filter = ProximityFilter::new(settings(Some(Duration::from_secs(2)), Duration::ZERO));
        let t0 = Instant::now();

        filter.on_sample(-60, t0);
        filter.on_sample(-65, t0 + Duration::from_millis(1500));

        assert!(filter.poll(t0 + Duration::from_secs(2)).is_none());
        assert!(filter.poll(t0 + Duration::from_millis(3500)).is_some());
    }

    #[test]
    fn test_infinite_timeout_never_demotes() {
        let mut filter = ProximityFilter::new(settings(None, Duration::ZERO));
        let t0 = Instant::now();

        filter.on_sample(-60, t0);
        filter.on_sample(-100, t0 + Duration::from_secs(1));

        assert!(filter.deadline().is_none());
        assert!(filter.poll(t0 + Duration::from_secs(3600)).is_none());
        assert_eq!(filter.state(), ProximityState::InRange);
    }

    #[test]
    fn test_late_sample_reports_timeout_first() {
        let mut filter = ProximityFilter::new(settings(Some(Duration::from_secs(2)), Duration::ZERO));
        let t0 = Instant::now();

        filter.on_sample(-60, t0);
        let changes = filter.on_sample(-60, t0 + Duration::from_secs(5));

        assert_eq!(
            states(&changes),
            vec![ProximityState::OutOfRange, ProximityState::InRange]
        );
    }

    #[test]
    fn test_reset() {
        let mut filter = ProximityFilter::new(SignalStrengthFilter::default());
        filter.on_sample(-50, Instant::now());
        filter.reset();
        assert_eq!(filter.state(), ProximityState::Unknown);
        assert!(filter.deadline().is_none());
    }

    #[test]
    fn test_display_matches_task_summary() {
        let filter = SignalStrengthFilter::new(
            -70,
            -75,
            Some(Duration::from_secs(2)),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            filter.to_string(),
            "HighDBm: -70, LowDBm: -75, Timeout (ms): 2000, Sampling (ms): 1000"
        );
    }
}

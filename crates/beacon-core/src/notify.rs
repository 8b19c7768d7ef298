//! Notifications delivered to consumers.
//!
//! Both engines and the completion monitor report through one
//! [`NotificationSink`], which each of them receives at construction.
//! Delivery never blocks: when the consumer falls behind, notifications are
//! dropped and logged.

use std::fmt;
use std::fmt::Write as _;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::background::TaskResult;
use crate::types::{
    describe_error, DeviceAddress, ProximityState, PublisherStatus, ScanSample, TransportError,
};
use crate::watcher::StopReason;

/// Default buffer between engines and a consumer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Events
// ============================================================================

/// Something a watcher reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatcherEvent {
    /// A sample matched the pattern.
    Received {
        /// The matching sample.
        sample: ScanSample,
    },
    /// A source changed proximity.
    Proximity {
        /// Source address.
        address: DeviceAddress,
        /// `InRange` or `OutOfRange`.
        state: ProximityState,
        /// RSSI of the triggering sample; absent for a timeout.
        rssi_dbm: Option<i16>,
        /// When the change was detected.
        at: DateTime<Utc>,
    },
    /// The watcher stopped.
    Stopped {
        /// Why it stopped.
        reason: StopReason,
        /// Transport error, if aborted.
        error: Option<TransportError>,
    },
}

/// Something a publisher reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PublisherEvent {
    /// The transport reported a new status.
    StatusChanged {
        /// Reported status.
        status: PublisherStatus,
        /// Reported error; `None` for success.
        error: Option<TransportError>,
    },
}

/// Anything a consumer can be told.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Notification {
    /// From a watcher.
    Watcher(WatcherEvent),
    /// From a publisher.
    Publisher(PublisherEvent),
    /// A background cycle completed while a consumer was attached.
    TaskCompleted {
        /// Task that completed.
        task_name: String,
        /// Slot content at the time of the notice.
        result: Option<TaskResult>,
    },
}

/// Formats a sample as one line of foreground output.
#[must_use]
pub fn describe_sample(sample: &ScanSample) -> String {
    let time = sample.timestamp.with_timezone(&Local).format("%H:%M:%S");
    let mut line = format!(
        "[{time}]: type={}, rssi={} dBm",
        sample.advertisement_type, sample.rssi_dbm
    );
    if let Some(name) = sample.local_name.as_deref().filter(|n| !n.is_empty()) {
        let _ = write!(line, ", name={name}");
    }
    if let Some(section) = sample.first_manufacturer_section() {
        let _ = write!(line, ", manufacturerData=[{section}]");
    }
    line
}

impl fmt::Display for WatcherEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received { sample } => f.write_str(&describe_sample(sample)),
            Self::Proximity {
                address,
                state,
                rssi_dbm: Some(rssi),
                ..
            } => write!(f, "{address} is {state} (rssi={rssi} dBm)"),
            Self::Proximity {
                address, state, ..
            } => write!(f, "{address} is {state} (timeout)"),
            Self::Stopped { error, .. } => {
                write!(f, "Watcher stopped or aborted: {}", describe_error(*error))
            }
        }
    }
}

impl fmt::Display for PublisherEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StatusChanged { status, error } => write!(
                f,
                "Published Status: {status}, Error: {}",
                describe_error(*error)
            ),
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Watcher(event) => event.fmt(f),
            Self::Publisher(event) => event.fmt(f),
            Self::TaskCompleted {
                task_name,
                result: Some(result),
            } => write!(f, "{task_name} completed: {}", result.summary),
            Self::TaskCompleted { task_name, .. } => {
                write!(f, "{task_name} completed with no stored result")
            }
        }
    }
}

impl From<WatcherEvent> for Notification {
    fn from(event: WatcherEvent) -> Self {
        Self::Watcher(event)
    }
}

impl From<PublisherEvent> for Notification {
    fn from(event: PublisherEvent) -> Self {
        Self::Publisher(event)
    }
}

// ============================================================================
// Sink
// ============================================================================

/// Non-blocking, bounded delivery to one consumer.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    tx: mpsc::Sender<Notification>,
}

impl NotificationSink {
    /// Wraps an existing sender.
    #[must_use]
    pub const fn new(tx: mpsc::Sender<Notification>) -> Self {
        Self { tx }
    }

    /// Creates a sink and the receiver its consumer reads.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Delivers `notification`, dropping it if the consumer is slow or gone.
    ///
    /// Returns whether it was queued.
    pub fn notify(&self, notification: impl Into<Notification>) -> bool {
        match self.tx.try_send(notification.into()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(notification = %dropped, "Notification buffer full, dropping");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Notification consumer gone, dropping");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AdvertisementSection;

    #[test]
    fn test_status_text_includes_error_enumerant() {
        let stopped = WatcherEvent::Stopped {
            reason: StopReason::SystemAborted,
            error: Some(TransportError::RadioNotAvailable),
        };
        assert_eq!(
            stopped.to_string(),
            "Watcher stopped or aborted: RadioNotAvailable"
        );

        let status = PublisherEvent::StatusChanged {
            status: PublisherStatus::Waiting,
            error: None,
        };
        assert_eq!(status.to_string(), "Published Status: Waiting, Error: Success");
    }

    #[test]
    fn test_describe_sample() {
        let sample = ScanSample::new(DeviceAddress::default(), -65)
            .with_local_name("beacon")
            .with_section(AdvertisementSection::service_data(0x180F, [0x64]))
            .with_section(AdvertisementSection::manufacturer(0xFFFE, [0x34, 0x12]));
        let line = describe_sample(&sample);

        assert!(line.ends_with(
            "type=NonConnectableUndirected, rssi=-65 dBm, name=beacon, manufacturerData=[0xFFFE: 3412]"
        ));
    }

    #[test]
    fn test_notification_serializes_tagged() {
        let n = Notification::from(PublisherEvent::StatusChanged {
            status: PublisherStatus::Aborted,
            error: Some(TransportError::ResourceInUse),
        });
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["source"], "publisher");
        assert_eq!(json["event"], "status_changed");
        assert_eq!(json["status"], "aborted");
        assert_eq!(json["error"], "ResourceInUse");
    }

    #[tokio::test]
    async fn test_sink_drops_when_full() {
        let (sink, mut rx) = NotificationSink::channel(1);
        let event = PublisherEvent::StatusChanged {
            status: PublisherStatus::Started,
            error: None,
        };

        assert!(sink.notify(event));
        assert!(!sink.notify(event));
        assert_eq!(rx.recv().await, Some(Notification::Publisher(event)));
    }

    #[test]
    fn test_sink_tolerates_closed_consumer() {
        let (sink, rx) = NotificationSink::channel(4);
        drop(rx);
        assert!(!sink.notify(PublisherEvent::StatusChanged {
            status: PublisherStatus::Stopped,
            error: None,
        }));
    }
}

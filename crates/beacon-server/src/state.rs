//! Application state shared across handlers.
//!
//! One radio, one foreground watcher, one foreground publisher, the result
//! bridge and an in-process background scheduler. Every notification the
//! engines and completion monitors produce is drained into a bounded ring
//! so `GET /api/events` can show recent activity.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use beacon_core::{
    AdapterCapabilities, BackgroundResultBridge, BackgroundScheduler, BeaconConfig,
    CapabilityProbe, CompletionMonitor, FileResultStore, InProcessScheduler, Notification,
    NotificationSink, PublisherEngine, Radio, Result, WatcherEngine,
};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shared application state.
pub type SharedState = Arc<AppState>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A notification as it was drained from the engines.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    /// When the server drained it.
    pub received_at: DateTime<Utc>,
    /// The notification itself.
    pub notification: Notification,
}

/// Everything handlers operate on.
pub struct AppState {
    /// Configuration the server was started with.
    pub config: BeaconConfig,
    /// Capabilities probed at startup; engines are constrained to these.
    pub capabilities: AdapterCapabilities,
    radio: Arc<dyn Radio>,
    watcher: WatcherEngine,
    publisher: PublisherEngine,
    bridge: BackgroundResultBridge,
    scheduler: Arc<InProcessScheduler>,
    sink: NotificationSink,
    monitors: Mutex<HashMap<String, CompletionMonitor>>,
    events: Arc<Mutex<VecDeque<RecordedEvent>>>,
    drain: JoinHandle<()>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("capabilities", &self.capabilities)
            .field("watcher", &self.watcher)
            .field("publisher", &self.publisher)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Build state around `radio`, storing background results on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher or publisher configuration is invalid
    /// or the data directory cannot be determined.
    pub async fn new(config: BeaconConfig, radio: Arc<dyn Radio>) -> Result<SharedState> {
        let data_dir = config.background.data_dir()?;
        info!(data_dir = %data_dir.display(), "Using background result store");
        let bridge = BackgroundResultBridge::new(Arc::new(FileResultStore::new(data_dir)));
        Self::with_bridge(config, radio, bridge).await
    }

    /// Build state around `radio` with an explicit result bridge.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher or publisher configuration is invalid.
    pub async fn with_bridge(
        config: BeaconConfig,
        radio: Arc<dyn Radio>,
        bridge: BackgroundResultBridge,
    ) -> Result<SharedState> {
        let capabilities = match radio.capabilities().await {
            Ok(caps) => caps,
            Err(e) => {
                warn!(error = %e, "Capability probe failed; assuming legacy-only adapter");
                AdapterCapabilities::default()
            }
        };

        let (sink, rx) = NotificationSink::channel(config.notifications.channel_capacity);
        let watcher = WatcherEngine::new(
            config.watcher.to_watcher_config()?.constrained_to(&capabilities),
            radio.scanner(),
            sink.clone(),
        )?;
        let publisher = PublisherEngine::new(
            config
                .publisher
                .to_publisher_config()
                .constrained_to(&capabilities),
            radio.advertiser(),
            sink.clone(),
        )?;
        let scheduler = Arc::new(
            InProcessScheduler::new(Arc::clone(&radio), bridge.clone())
                .with_cycle_interval(config.background.cycle_interval()),
        );

        let events = Arc::new(Mutex::new(VecDeque::new()));
        let drain = tokio::spawn(drain_notifications(
            rx,
            Arc::clone(&events),
            config.notifications.history_size,
        ));

        Ok(Arc::new(Self {
            config,
            capabilities,
            radio,
            watcher,
            publisher,
            bridge,
            scheduler,
            sink,
            monitors: Mutex::new(HashMap::new()),
            events,
            drain,
        }))
    }

    /// The radio the engines run on.
    #[must_use]
    pub fn radio(&self) -> &dyn Radio {
        self.radio.as_ref()
    }

    /// The foreground watcher.
    #[must_use]
    pub const fn watcher(&self) -> &WatcherEngine {
        &self.watcher
    }

    /// The foreground publisher.
    #[must_use]
    pub const fn publisher(&self) -> &PublisherEngine {
        &self.publisher
    }

    /// The background result bridge.
    #[must_use]
    pub const fn bridge(&self) -> &BackgroundResultBridge {
        &self.bridge
    }

    /// The background scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &dyn BackgroundScheduler {
        self.scheduler.as_ref()
    }

    /// Attach a completion monitor for `task_name` unless one is attached.
    ///
    /// The monitor subscribes before this returns, so attaching ahead of
    /// registration observes the trigger's first cycle. Returns `true` when a
    /// new monitor was attached.
    pub fn attach_monitor(&self, task_name: &str) -> bool {
        let mut monitors = lock(&self.monitors);
        if monitors.contains_key(task_name) {
            return false;
        }
        let monitor = CompletionMonitor::attach(
            self.scheduler(),
            self.bridge.clone(),
            task_name,
            self.sink.clone(),
        );
        monitors.insert(task_name.to_string(), monitor);
        true
    }

    /// Detach the completion monitor for `task_name`, if any.
    pub fn detach_monitor(&self, task_name: &str) {
        if let Some(monitor) = lock(&self.monitors).remove(task_name) {
            monitor.detach();
        }
    }

    /// Task names with an attached completion monitor.
    #[must_use]
    pub fn monitored_tasks(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.monitors).keys().cloned().collect();
        names.sort();
        names
    }

    /// The most recent `limit` notifications, oldest first.
    #[must_use]
    pub fn recent_events(&self, limit: usize) -> Vec<RecordedEvent> {
        let events = lock(&self.events);
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    /// Force everything to stop as the process is being suspended.
    ///
    /// Background result slots stay on disk for the next run.
    pub fn suspend(&self) {
        info!("Suspending engines");
        self.watcher.suspend();
        self.publisher.suspend();
        self.scheduler.shutdown();
        let monitors: Vec<CompletionMonitor> =
            lock(&self.monitors).drain().map(|(_, m)| m).collect();
        for monitor in monitors {
            monitor.detach();
        }
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        self.drain.abort();
    }
}

async fn drain_notifications(
    mut rx: mpsc::Receiver<Notification>,
    events: Arc<Mutex<VecDeque<RecordedEvent>>>,
    history_size: usize,
) {
    while let Some(notification) = rx.recv().await {
        debug!(%notification, "Notification");
        if history_size == 0 {
            continue;
        }
        let mut events = lock(&events);
        while events.len() >= history_size {
            events.pop_front();
        }
        events.push_back(RecordedEvent {
            received_at: Utc::now(),
            notification,
        });
    }
}

#[cfg(all(test, feature = "mock-bluetooth"))]
mod tests {
    use super::*;
    use beacon_core::{MockRadio, Notification, PublisherStatus, TriggerConfig};
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> BeaconConfig {
        let mut config = BeaconConfig::default();
        config.background.data_dir = Some(dir.path().join("results"));
        config
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_results_survive_restart() {
        let dir = TempDir::new().unwrap();
        let radio = MockRadio::new();

        let state = AppState::new(config_in(&dir), Arc::new(radio.clone()))
            .await
            .unwrap();
        let trigger = TriggerConfig::Publisher(state.config.publisher.to_publisher_config());
        state
            .scheduler()
            .register_trigger(trigger, "AdvertisementPublisherTask")
            .await
            .unwrap();
        settle().await;
        state.suspend();
        drop(state);

        let state = AppState::new(config_in(&dir), Arc::new(radio))
            .await
            .unwrap();
        let result = state
            .bridge()
            .retrieve("AdvertisementPublisherTask")
            .unwrap()
            .unwrap();
        assert!(result.summary.starts_with("Publisher status: "));
    }

    #[tokio::test]
    async fn test_event_history_is_bounded() {
        let dir = TempDir::new().unwrap();
        let radio = MockRadio::new();
        let mut config = config_in(&dir);
        config.notifications.history_size = 2;

        let state = AppState::new(config, Arc::new(radio.clone())).await.unwrap();
        state.publisher().start().await.unwrap();
        radio
            .emit_status(PublisherStatus::Waiting, None)
            .await;
        radio
            .emit_status(PublisherStatus::Started, None)
            .await;
        settle().await;

        let events = state.recent_events(10);
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| matches!(e.notification, Notification::Publisher(_))));
        assert_eq!(state.recent_events(1).len(), 1);
    }

    #[tokio::test]
    async fn test_monitor_attached_once() {
        let dir = TempDir::new().unwrap();
        let state = AppState::new(config_in(&dir), Arc::new(MockRadio::new()))
            .await
            .unwrap();

        assert!(state.attach_monitor("AdvertisementWatcherTask"));
        assert!(!state.attach_monitor("AdvertisementWatcherTask"));
        assert_eq!(state.monitored_tasks(), vec!["AdvertisementWatcherTask"]);

        state.detach_monitor("AdvertisementWatcherTask");
        assert!(state.monitored_tasks().is_empty());
    }
}

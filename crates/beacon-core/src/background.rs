//! Background delivery.
//!
//! A background trigger runs watch/publish logic while no foreground
//! consumer may be attached. Each trigger cycle formats a text summary,
//! stores it in the [`BackgroundResultBridge`] under the task name and then
//! broadcasts exactly one [`CompletionNotice`]. A consumer that (re)attaches
//! with a [`CompletionMonitor`] reads the slot when a notice arrives.
//!
//! Slots are never consumed by reading; the next cycle overwrites them.

use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::is_valid_task_name;
use crate::error::{BeaconError, Result};
use crate::notify::{Notification, NotificationSink, PublisherEvent, WatcherEvent};
use crate::pattern::SingleSectionPattern;
use crate::proximity::SignalStrengthFilter;
use crate::publisher::{PublisherConfig, PublisherEngine};
use crate::storage::ResultStore;
use crate::transport::{PumpHandle, Radio};
use crate::types::{describe_error, PublisherStatus, ScanSample, TransportError};
use crate::watcher::{StopReason, WatcherConfig, WatcherEngine};

/// Shortest sampling interval a background watcher supports.
pub const MIN_BACKGROUND_SAMPLING: Duration = Duration::from_secs(1);

/// Default aggregation period of a background watcher.
pub const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_secs(1);

const TRIGGER_CHANNEL_CAPACITY: usize = 1024;
const COMPLETION_CHANNEL_CAPACITY: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Result bridge
// ============================================================================

/// What one cycle produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    /// Human-readable summary.
    pub summary: String,
    /// Error the trigger reported, if any.
    pub error: Option<TransportError>,
}

impl TaskOutcome {
    /// A successful outcome with `summary`.
    #[must_use]
    pub fn text(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            error: None,
        }
    }
}

impl From<&str> for TaskOutcome {
    fn from(summary: &str) -> Self {
        Self::text(summary)
    }
}

impl From<String> for TaskOutcome {
    fn from(summary: String) -> Self {
        Self::text(summary)
    }
}

/// Content of one result slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Slot key.
    pub task_name: String,
    /// Summary text.
    pub summary: String,
    /// Increments with every store for this task name.
    pub sequence: u64,
    /// Error the trigger reported, if any.
    pub error: Option<TransportError>,
    /// When the slot was written.
    pub recorded_at: DateTime<Utc>,
}

/// Latest-result-per-task hand-off between background cycles and consumers.
#[derive(Debug, Clone)]
pub struct BackgroundResultBridge {
    store: Arc<dyn ResultStore>,
    /// Last sequence written per task; serialises writers.
    sequences: Arc<Mutex<HashMap<String, u64>>>,
}

impl BackgroundResultBridge {
    /// A bridge over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self {
            store,
            sequences: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Overwrites the slot for `task_name`.
    ///
    /// The sequence continues from whichever is higher: the stored slot or the
    /// last value this bridge wrote. An unreadable slot therefore only resets
    /// the sequence when this bridge has never written the task.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidTaskName`] for an unusable name, or a
    /// persistence error if the slot cannot be written.
    pub fn store(&self, task_name: &str, outcome: impl Into<TaskOutcome>) -> Result<TaskResult> {
        if !is_valid_task_name(task_name) {
            return Err(BeaconError::InvalidTaskName(task_name.to_string()));
        }
        let outcome = outcome.into();
        let mut sequences = lock(&self.sequences);
        let written = sequences.get(task_name).copied().unwrap_or(0);

        let persisted = match self.store.load(task_name)? {
            None => 0,
            Some(raw) => match serde_json::from_str::<TaskResult>(&raw) {
                Ok(previous) => previous.sequence,
                Err(e) => {
                    if written == 0 {
                        warn!(task_name, error = %e, "Result slot unreadable; sequence restarts at 1");
                    } else {
                        warn!(task_name, error = %e, written, "Result slot unreadable; continuing sequence");
                    }
                    0
                }
            },
        };

        let result = TaskResult {
            task_name: task_name.to_string(),
            summary: outcome.summary,
            sequence: persisted.max(written) + 1,
            error: outcome.error,
            recorded_at: Utc::now(),
        };
        self.store
            .save(task_name, &serde_json::to_string(&result)?)?;
        sequences.insert(task_name.to_string(), result.sequence);
        debug!(task_name, sequence = result.sequence, "Stored background result");
        Ok(result)
    }

    /// Reads the slot for `task_name` without consuming it.
    ///
    /// A slot that cannot be parsed reads as empty.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store itself fails.
    pub fn retrieve(&self, task_name: &str) -> Result<Option<TaskResult>> {
        let Some(raw) = self.store.load(task_name)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(result) => Ok(Some(result)),
            Err(e) => {
                warn!(task_name, error = %e, "Ignoring unreadable result slot");
                Ok(None)
            }
        }
    }

    /// Task names with a slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    pub fn task_names(&self) -> Result<Vec<String>> {
        self.store.task_names()
    }
}

// ============================================================================
// Task summaries
// ============================================================================

/// Summary text of one background watcher cycle.
#[must_use]
pub fn watcher_task_summary(
    filter: &SignalStrengthFilter,
    advertisements: &[ScanSample],
    error: Option<TransportError>,
) -> String {
    let mut text = String::new();
    if let Some(error) = error {
        let _ = write!(text, "Error: {error}, ");
    }
    let _ = write!(text, "EventCount: {}, {filter}", advertisements.len());
    for sample in advertisements {
        let _ = write!(
            text,
            "\n[{}] [{}]: Rssi={} dBm",
            sample.timestamp.with_timezone(&Local).format("%H:%M:%S"),
            sample.advertisement_type,
            sample.rssi_dbm
        );
        if let Some(name) = sample.local_name.as_deref().filter(|n| !n.is_empty()) {
            let _ = write!(text, ", localName={name}");
        }
        if let Some(section) = sample.first_manufacturer_section() {
            let _ = write!(text, ", manufacturerData=[{section}]");
        }
    }
    text
}

/// Summary text of one background publisher cycle.
#[must_use]
pub fn publisher_task_summary(status: PublisherStatus, error: Option<TransportError>) -> String {
    match error {
        Some(error) => format!("Error: {error}, Publisher status: {status}"),
        None => format!("Publisher status: {status}"),
    }
}

// ============================================================================
// Trigger configuration
// ============================================================================

/// Watcher configuration accepted for background registration.
///
/// Only constructible with exactly one pattern section and a sampling
/// interval of at least [`MIN_BACKGROUND_SAMPLING`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundWatcherConfig {
    pattern: SingleSectionPattern,
    config: WatcherConfig,
}

impl BackgroundWatcherConfig {
    /// Validates `config` for background use.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::ConfigValidationError`] if the pattern does not
    /// have exactly one section, the sampling interval is too short, or the
    /// watcher configuration is otherwise invalid.
    pub fn new(config: WatcherConfig) -> Result<Self> {
        config.validate()?;
        let pattern = SingleSectionPattern::new(config.pattern.clone())?;
        let sampling = config.signal.sampling_interval();
        if sampling < MIN_BACKGROUND_SAMPLING {
            return Err(BeaconError::ConfigValidationError(format!(
                "background sampling interval must be at least {}ms (got {}ms)",
                MIN_BACKGROUND_SAMPLING.as_millis(),
                sampling.as_millis()
            )));
        }
        Ok(Self { pattern, config })
    }

    /// The single pattern section.
    #[must_use]
    pub const fn pattern(&self) -> &SingleSectionPattern {
        &self.pattern
    }

    /// The full watcher configuration.
    #[must_use]
    pub const fn watcher_config(&self) -> &WatcherConfig {
        &self.config
    }
}

/// What a background registration runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerConfig {
    /// Scan and aggregate matching advertisements.
    Watcher(BackgroundWatcherConfig),
    /// Keep a broadcast alive and report its status.
    Publisher(PublisherConfig),
}

impl TriggerConfig {
    /// Kind of trigger.
    #[must_use]
    pub const fn kind(&self) -> TriggerKind {
        match self {
            Self::Watcher(_) => TriggerKind::Watcher,
            Self::Publisher(_) => TriggerKind::Publisher,
        }
    }
}

/// Kind of a background trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Advertisement watcher trigger.
    Watcher,
    /// Advertisement publisher trigger.
    Publisher,
}

/// An active background registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationHandle {
    /// Unique id of this registration.
    pub id: Uuid,
    /// Task name the results are stored under.
    pub task_name: String,
    /// Kind of trigger.
    pub kind: TriggerKind,
    /// When it was registered.
    pub registered_at: DateTime<Utc>,
}

/// One completed trigger cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionNotice {
    /// Task whose slot was just written.
    pub task_name: String,
    /// Registration that ran.
    pub registration_id: Uuid,
    /// Cycle number within the registration, from 1.
    pub cycle: u64,
}

/// Whether the host allows background execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundAccess {
    /// Always allowed.
    #[default]
    AlwaysAllowed,
    /// Allowed, but the system may throttle it.
    AllowedSubjectToSystemPolicy,
    /// Denied; registrations exist but may never run.
    Denied,
}

impl BackgroundAccess {
    /// Whether triggers are expected to run.
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        !matches!(self, Self::Denied)
    }
}

// ============================================================================
// Scheduler contract
// ============================================================================

/// Registration and completion contract of a background scheduler.
#[async_trait]
pub trait BackgroundScheduler: Send + Sync {
    /// Registers `trigger` under `task_name`.
    ///
    /// # Errors
    ///
    /// - [`BeaconError::InvalidTaskName`] for an unusable name.
    /// - [`BeaconError::RegistrationExists`] if the name is taken.
    /// - [`BeaconError::DeviceUnavailable`] if the radio cannot serve the trigger.
    async fn register_trigger(
        &self,
        trigger: TriggerConfig,
        task_name: &str,
    ) -> Result<RegistrationHandle>;

    /// Removes a registration and stops its trigger.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::RegistrationNotFound`] if `handle` is no longer active.
    fn unregister(&self, handle: &RegistrationHandle) -> Result<()>;

    /// The active registration named `task_name`.
    fn registration(&self, task_name: &str) -> Option<RegistrationHandle>;

    /// Every active registration.
    fn registrations(&self) -> Vec<RegistrationHandle>;

    /// Stream of completed cycles, across all registrations.
    fn completions(&self) -> broadcast::Receiver<CompletionNotice>;

    /// Current background access status.
    fn access(&self) -> BackgroundAccess;
}

// ============================================================================
// In-process scheduler
// ============================================================================

#[derive(Debug)]
enum TriggerEngine {
    Watcher(WatcherEngine),
    Publisher(PublisherEngine),
}

#[derive(Debug)]
struct ActiveTrigger {
    handle: RegistrationHandle,
    engine: TriggerEngine,
    cycles: PumpHandle,
}

/// Runs triggers as tasks inside this process.
pub struct InProcessScheduler {
    radio: Arc<dyn Radio>,
    bridge: BackgroundResultBridge,
    cycle_interval: Duration,
    access: BackgroundAccess,
    completions: broadcast::Sender<CompletionNotice>,
    registrations: Mutex<HashMap<String, ActiveTrigger>>,
    register_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for InProcessScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessScheduler")
            .field("cycle_interval", &self.cycle_interval)
            .field("access", &self.access)
            .field("registrations", &self.registrations())
            .finish_non_exhaustive()
    }
}

impl InProcessScheduler {
    /// A scheduler storing cycle results through `bridge`.
    #[must_use]
    pub fn new(radio: Arc<dyn Radio>, bridge: BackgroundResultBridge) -> Self {
        let (completions, _) = broadcast::channel(COMPLETION_CHANNEL_CAPACITY);
        Self {
            radio,
            bridge,
            cycle_interval: DEFAULT_CYCLE_INTERVAL,
            access: BackgroundAccess::default(),
            completions,
            registrations: Mutex::new(HashMap::new()),
            register_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Sets how often a watcher trigger reports aggregated advertisements.
    #[must_use]
    pub fn with_cycle_interval(mut self, interval: Duration) -> Self {
        self.cycle_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Sets the reported background access status.
    #[must_use]
    pub const fn with_access(mut self, access: BackgroundAccess) -> Self {
        self.access = access;
        self
    }

    /// The bridge cycles store into.
    #[must_use]
    pub const fn bridge(&self) -> &BackgroundResultBridge {
        &self.bridge
    }

    /// Stops every trigger without unregistering it from persisted state.
    pub fn shutdown(&self) {
        let drained: Vec<ActiveTrigger> =
            lock(&self.registrations).drain().map(|(_, t)| t).collect();
        for trigger in drained {
            stop_trigger(trigger, StopReason::Suspended);
        }
    }

    fn cycle_context(&self, handle: &RegistrationHandle) -> CycleContext {
        CycleContext {
            task_name: handle.task_name.clone(),
            registration_id: handle.id,
            bridge: self.bridge.clone(),
            completions: self.completions.clone(),
            cycle: 0,
        }
    }
}

fn stop_trigger(trigger: ActiveTrigger, reason: StopReason) {
    let ActiveTrigger {
        handle,
        engine,
        cycles,
    } = trigger;
    drop(cycles);
    match engine {
        TriggerEngine::Watcher(engine) => engine.stop(reason),
        TriggerEngine::Publisher(engine) => engine.suspend(),
    }
    info!(task_name = %handle.task_name, %reason, "Background trigger stopped");
}

#[async_trait]
impl BackgroundScheduler for InProcessScheduler {
    async fn register_trigger(
        &self,
        trigger: TriggerConfig,
        task_name: &str,
    ) -> Result<RegistrationHandle> {
        if !is_valid_task_name(task_name) {
            return Err(BeaconError::InvalidTaskName(task_name.to_string()));
        }
        let _serial = self.register_lock.lock().await;
        if lock(&self.registrations).contains_key(task_name) {
            return Err(BeaconError::RegistrationExists(task_name.to_string()));
        }
        if !self.access.is_allowed() {
            warn!(task_name, access = ?self.access, "Background tasks may be disabled");
        }

        let handle = RegistrationHandle {
            id: Uuid::new_v4(),
            task_name: task_name.to_string(),
            kind: trigger.kind(),
            registered_at: Utc::now(),
        };
        let (sink, rx) = NotificationSink::channel(TRIGGER_CHANNEL_CAPACITY);
        let context = self.cycle_context(&handle);

        let (engine, cycles) = match trigger {
            TriggerConfig::Watcher(config) => {
                let filter = config.watcher_config().signal;
                let engine =
                    WatcherEngine::new(config.watcher_config().clone(), self.radio.scanner(), sink)?;
                engine.start().await?;
                let task = tokio::spawn(run_watcher_cycles(context, filter, rx, self.cycle_interval));
                (TriggerEngine::Watcher(engine), task)
            }
            TriggerConfig::Publisher(config) => {
                config.validate()?;
                let engine = PublisherEngine::new(config, self.radio.advertiser(), sink)?;
                engine.start().await?;
                let task = tokio::spawn(run_publisher_cycles(context, rx));
                (TriggerEngine::Publisher(engine), task)
            }
        };

        lock(&self.registrations).insert(
            task_name.to_string(),
            ActiveTrigger {
                handle: handle.clone(),
                engine,
                cycles: PumpHandle::new(cycles),
            },
        );
        info!(task_name, id = %handle.id, kind = ?handle.kind, "Background trigger registered");
        Ok(handle)
    }

    fn unregister(&self, handle: &RegistrationHandle) -> Result<()> {
        let trigger = {
            let mut registrations = lock(&self.registrations);
            match registrations.get(&handle.task_name) {
                Some(active) if active.handle.id == handle.id => {
                    registrations.remove(&handle.task_name)
                }
                _ => None,
            }
        };
        let trigger =
            trigger.ok_or_else(|| BeaconError::RegistrationNotFound(handle.task_name.clone()))?;
        stop_trigger(trigger, StopReason::UserRequested);
        Ok(())
    }

    fn registration(&self, task_name: &str) -> Option<RegistrationHandle> {
        lock(&self.registrations)
            .get(task_name)
            .map(|active| active.handle.clone())
    }

    fn registrations(&self) -> Vec<RegistrationHandle> {
        let mut handles: Vec<_> = lock(&self.registrations)
            .values()
            .map(|active| active.handle.clone())
            .collect();
        handles.sort_by(|a, b| a.task_name.cmp(&b.task_name));
        handles
    }

    fn completions(&self) -> broadcast::Receiver<CompletionNotice> {
        self.completions.subscribe()
    }

    fn access(&self) -> BackgroundAccess {
        self.access
    }
}

struct CycleContext {
    task_name: String,
    registration_id: Uuid,
    bridge: BackgroundResultBridge,
    completions: broadcast::Sender<CompletionNotice>,
    cycle: u64,
}

impl CycleContext {
    /// Stores one cycle's outcome, then announces it once.
    fn complete(&mut self, outcome: TaskOutcome) {
        if let Err(e) = self.bridge.store(&self.task_name, outcome) {
            error!(task_name = %self.task_name, error = %e, "Failed to store background result");
        }
        self.cycle += 1;
        let notice = CompletionNotice {
            task_name: self.task_name.clone(),
            registration_id: self.registration_id,
            cycle: self.cycle,
        };
        if self.completions.send(notice).is_err() {
            debug!(task_name = %self.task_name, "No consumer attached for completion");
        }
    }
}

async fn run_watcher_cycles(
    mut context: CycleContext,
    filter: SignalStrengthFilter,
    mut rx: mpsc::Receiver<Notification>,
    cycle_interval: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + cycle_interval, cycle_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pending: Vec<ScanSample> = Vec::new();

    loop {
        tokio::select! {
            notification = rx.recv() => match notification {
                Some(Notification::Watcher(WatcherEvent::Received { sample })) => pending.push(sample),
                Some(Notification::Watcher(WatcherEvent::Stopped { error: Some(error), .. })) => {
                    let summary = watcher_task_summary(&filter, &pending, Some(error));
                    context.complete(TaskOutcome { summary, error: Some(error) });
                    return;
                }
                Some(Notification::Watcher(WatcherEvent::Stopped { .. })) | None => return,
                Some(_) => {}
            },
            _ = ticker.tick() => {
                if !pending.is_empty() {
                    let summary = watcher_task_summary(&filter, &pending, None);
                    pending.clear();
                    context.complete(TaskOutcome::text(summary));
                }
            }
        }
    }
}

async fn run_publisher_cycles(mut context: CycleContext, mut rx: mpsc::Receiver<Notification>) {
    while let Some(notification) = rx.recv().await {
        if let Notification::Publisher(PublisherEvent::StatusChanged { status, error }) =
            notification
        {
            context.complete(TaskOutcome {
                summary: publisher_task_summary(status, error),
                error,
            });
        }
    }
}

// ============================================================================
// Completion monitor
// ============================================================================

/// Foreground attachment to one task's completions.
///
/// While attached, every completion notice for the task reads the slot and
/// delivers a [`Notification::TaskCompleted`]. Dropping the monitor detaches it.
#[derive(Debug)]
pub struct CompletionMonitor {
    task_name: String,
    listener: Option<PumpHandle>,
}

impl CompletionMonitor {
    /// Subscribes to completions of `task_name`.
    #[must_use]
    pub fn attach(
        scheduler: &dyn BackgroundScheduler,
        bridge: BackgroundResultBridge,
        task_name: impl Into<String>,
        sink: NotificationSink,
    ) -> Self {
        let task_name = task_name.into();
        let completions = scheduler.completions();
        let listener = tokio::spawn(listen(completions, bridge, task_name.clone(), sink));
        debug!(task_name = %task_name, "Completion monitor attached");
        Self {
            task_name,
            listener: Some(PumpHandle::new(listener)),
        }
    }

    /// Task this monitor listens for.
    #[must_use]
    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// Stops listening.
    pub fn detach(mut self) {
        self.listener.take();
        debug!(task_name = %self.task_name, "Completion monitor detached");
    }
}

async fn listen(
    mut completions: broadcast::Receiver<CompletionNotice>,
    bridge: BackgroundResultBridge,
    task_name: String,
    sink: NotificationSink,
) {
    loop {
        match completions.recv().await {
            Ok(notice) if notice.task_name == task_name => {
                let result = bridge.retrieve(&task_name).unwrap_or_else(|e| {
                    warn!(task_name = %task_name, error = %e, "Failed to read result slot");
                    None
                });
                sink.notify(Notification::TaskCompleted {
                    task_name: task_name.clone(),
                    result,
                });
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(task_name = %task_name, missed, "Completion monitor lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Formats a result for display, including the error enumerant.
#[must_use]
pub fn describe_result(result: &TaskResult) -> String {
    format!(
        "#{} {} ({})",
        result.sequence,
        result.summary,
        describe_error(result.error)
    )
}

//! The tracking core's event loop.
//!
//! [`TrackingCore::new`] wires the collector, re-armer, scheduler and
//! sweeper together and returns the core plus a cloneable [`CoreHandle`].
//! [`TrackingCore::run`] then drains the event queue until the handle is
//! shut down.
//!
//! Events are handled one at a time. Uploads run on their own tasks so a
//! slow network never delays fix handling.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use rumpel_core::mock::{MockLocationService, MockTransport};
//! use rumpel_core::{CoreConfig, CoreDependencies, SharedToken, SyncConfig, TrackingCore};
//! use rumpel_store::Store;
//! use rumpel_types::TrackingPreferences;
//! use tokio::sync::watch;
//!
//! # async fn example() -> rumpel_core::Result<()> {
//! let (prefs, _) = watch::channel(TrackingPreferences::default());
//! let deps = CoreDependencies {
//!     store: Arc::new(Store::open_in_memory()?),
//!     location_service: Arc::new(MockLocationService::new()),
//!     transport: Arc::new(MockTransport::new()),
//!     auth: Arc::new(SharedToken::new(Some("token".into()))),
//!     preferences: Arc::new(prefs),
//! };
//! let config = CoreConfig::new(SyncConfig::new("https://hat.example/api/locations"));
//!
//! let (core, handle) = TrackingCore::new(deps, config);
//! tokio::spawn(core.run());
//!
//! let outcome = handle.background_fetch(Duration::from_secs(25)).await?;
//! println!("{outcome:?}");
//! handle.shutdown();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use rumpel_store::Store;
use rumpel_types::{RawFix, RegionId, TrackingPreferences};

use crate::collector::LocationCollector;
use crate::error::{Error, Result};
use crate::events::{CoreEvent, NotificationDispatcher, NotificationReceiver};
use crate::health::{HealthCounters, SyncHealth};
use crate::region::{RegionReArmer, RegionState};
use crate::retention::{DEFAULT_RETENTION_DAYS, RetentionSweeper};
use crate::sync::{SyncConfig, SyncOutcome, SyncScheduler};
use crate::traits::{AuthTokenProvider, LocationService, UploadTransport};

/// Default time the foreground sync may take.
pub const DEFAULT_FOREGROUND_BUDGET: Duration = Duration::from_secs(25);

/// Default capacity of the inbound event queue.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Tunables for the tracking core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub sync: SyncConfig,
    pub retention_days: u32,
    pub foreground_budget: Duration,
    pub event_capacity: usize,
    pub notification_capacity: usize,
}

impl CoreConfig {
    pub fn new(sync: SyncConfig) -> Self {
        Self {
            sync,
            retention_days: DEFAULT_RETENTION_DAYS,
            foreground_budget: DEFAULT_FOREGROUND_BUDGET,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            notification_capacity: crate::events::DEFAULT_NOTIFICATION_CAPACITY,
        }
    }
}

/// The platform pieces the core runs against.
pub struct CoreDependencies {
    pub store: Arc<Store>,
    pub location_service: Arc<dyn LocationService>,
    pub transport: Arc<dyn UploadTransport>,
    pub auth: Arc<dyn AuthTokenProvider>,
    /// Tracking preferences, shared with the host. The current value is
    /// applied at startup and every later change is picked up. The core
    /// writes `enabled` back when tracking is toggled through an event.
    pub preferences: Arc<watch::Sender<TrackingPreferences>>,
}

/// Owns the pipeline components and processes [`CoreEvent`]s.
pub struct TrackingCore {
    collector: LocationCollector,
    rearmer: Arc<RegionReArmer>,
    scheduler: Arc<SyncScheduler>,
    sweeper: RetentionSweeper,
    retention_days: u32,
    foreground_budget: Duration,
    preferences_tx: Arc<watch::Sender<TrackingPreferences>>,
    preferences: watch::Receiver<TrackingPreferences>,
    events: mpsc::Receiver<CoreEvent>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl std::fmt::Debug for TrackingCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingCore")
            .field("collector", &self.collector)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl TrackingCore {
    /// Build the core and a handle to drive it.
    pub fn new(deps: CoreDependencies, config: CoreConfig) -> (Self, CoreHandle) {
        let notifications = NotificationDispatcher::new(config.notification_capacity);
        let health = Arc::new(HealthCounters::new());
        let rearmer = Arc::new(RegionReArmer::new(Arc::clone(&deps.location_service)));

        let collector = LocationCollector::new(
            Arc::clone(&deps.store),
            deps.location_service,
            Arc::clone(&rearmer),
            notifications.clone(),
            Arc::clone(&health),
        );
        let scheduler = Arc::new(SyncScheduler::new(
            Arc::clone(&deps.store),
            deps.transport,
            deps.auth,
            config.sync,
            Arc::clone(&health),
            notifications.clone(),
        ));
        let sweeper = RetentionSweeper::new(
            Arc::clone(&deps.store),
            Arc::clone(&health),
            notifications.clone(),
        );

        let (tx, rx) = mpsc::channel(config.event_capacity);
        let cancel = CancellationToken::new();

        let handle = CoreHandle {
            events: tx,
            store: deps.store,
            rearmer: Arc::clone(&rearmer),
            health,
            notifications,
            cancel: cancel.clone(),
        };

        let core = Self {
            collector,
            rearmer,
            scheduler,
            sweeper,
            retention_days: config.retention_days,
            foreground_budget: config.foreground_budget,
            preferences: deps.preferences.subscribe(),
            preferences_tx: deps.preferences,
            events: rx,
            cancel,
            tasks: TaskTracker::new(),
        };

        (core, handle)
    }

    /// Process events until shutdown, then wait for running uploads.
    pub async fn run(mut self) {
        let initial = *self.preferences.borrow_and_update();
        self.collector.activate(initial);
        info!("Tracking core started (tracking {})", on_off(initial.enabled));

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Tracking core shutting down");
                    break;
                }
                // The core holds a sender, so the channel never closes.
                Ok(()) = self.preferences.changed() => {
                    let preferences = *self.preferences.borrow_and_update();
                    self.handle_event(CoreEvent::TrackingPreferenceChanged(preferences));
                }
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        info!("All core handles dropped, stopping");
                        break;
                    }
                },
            }
        }

        self.tasks.close();
        self.tasks.wait().await;
    }

    fn handle_event(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::FixesReceived(fixes) => {
                // Storage failures are already logged and counted.
                let _ = self.collector.on_fixes_received(&fixes);
            }
            CoreEvent::RegionExited(id) => {
                self.rearmer.on_region_exit(&id);
            }
            CoreEvent::BackgroundFetchWindow { budget, reply } => {
                self.spawn_sync(budget, reply);
            }
            CoreEvent::AppForeground => {
                self.sweeper.sweep(OffsetDateTime::now_utc(), self.retention_days);
                self.spawn_sync(self.foreground_budget, None);
            }
            CoreEvent::AppBackground => self.collector.ensure_monitoring(),
            CoreEvent::TrackingPreferenceChanged(preferences) => {
                self.collector.apply_preferences(preferences);
            }
            CoreEvent::SetTrackingEnabled(enabled) => {
                // `enabled` lives in the watch
                self.preferences_tx.send_if_modified(|preferences| {
                    let changed = preferences.enabled != enabled;
                    preferences.enabled = enabled;
                    changed
                });
                let preferences = *self.preferences.borrow_and_update();
                if preferences != self.collector.preferences() {
                    self.collector.apply_preferences(preferences);
                }
            }
            CoreEvent::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }

    fn spawn_sync(&self, budget: Duration, reply: Option<oneshot::Sender<SyncOutcome>>) {
        let scheduler = Arc::clone(&self.scheduler);
        self.tasks.spawn(async move {
            let outcome = scheduler.try_sync(budget).await;
            if let Some(reply) = reply
                && reply.send(outcome).is_err()
            {
                debug!("Sync caller went away before the outcome was ready");
            }
        });
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

/// Cloneable handle to a running [`TrackingCore`].
#[derive(Debug, Clone)]
pub struct CoreHandle {
    events: mpsc::Sender<CoreEvent>,
    store: Arc<Store>,
    rearmer: Arc<RegionReArmer>,
    health: Arc<HealthCounters>,
    notifications: NotificationDispatcher,
    cancel: CancellationToken,
}

impl CoreHandle {
    /// Queue an event for the core.
    pub async fn send(&self, event: CoreEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    pub async fn fixes_received(&self, fixes: Vec<RawFix>) -> Result<()> {
        self.send(CoreEvent::FixesReceived(fixes)).await
    }

    pub async fn region_exited(&self, id: RegionId) -> Result<()> {
        self.send(CoreEvent::RegionExited(id)).await
    }

    pub async fn app_foreground(&self) -> Result<()> {
        self.send(CoreEvent::AppForeground).await
    }

    pub async fn app_background(&self) -> Result<()> {
        self.send(CoreEvent::AppBackground).await
    }

    pub async fn set_tracking_enabled(&self, enabled: bool) -> Result<()> {
        self.send(CoreEvent::SetTrackingEnabled(enabled)).await
    }

    /// Run a sync inside a background fetch window and wait for its outcome.
    pub async fn background_fetch(&self, budget: Duration) -> Result<SyncOutcome> {
        let (tx, rx) = oneshot::channel();
        self.send(CoreEvent::BackgroundFetchWindow {
            budget,
            reply: Some(tx),
        })
        .await?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Wait until every event queued before this call has been handled.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(CoreEvent::Flush(tx)).await?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    pub fn unsynced_count(&self) -> Result<u64> {
        Ok(self.store.unsynced_count()?)
    }

    pub fn last_synced_at(&self) -> Result<Option<OffsetDateTime>> {
        Ok(self.store.last_synced_at()?)
    }

    /// Current pipeline health.
    pub fn health(&self) -> Result<SyncHealth> {
        let unsynced = self.store.unsynced_count()?;
        let last_synced_at = self.store.last_synced_at()?;
        Ok(self.health.snapshot(unsynced, last_synced_at))
    }

    /// Forget a previous auth rejection, e.g. after a new token arrives.
    pub fn clear_auth_expired(&self) {
        self.health.clear_auth_expired();
    }

    pub fn region_state(&self) -> RegionState {
        self.rearmer.state()
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Subscribe to core notifications.
    pub fn subscribe(&self) -> NotificationReceiver {
        self.notifications.subscribe()
    }

    /// Stop the event loop. Uploads already running are allowed to finish.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            info!("Shutdown requested for tracking core");
        }
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.events.is_closed()
    }
}

//! Inbound platform events and outbound core notifications.
//!
//! Everything the platform tells the core arrives as a [`CoreEvent`] on a
//! single queue, so handlers never run concurrently with each other.
//! Everything the core wants the host to know leaves as a
//! [`CoreNotification`] on a broadcast channel.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, oneshot};

use rumpel_types::{LocationSample, MonitoredRegion, RawFix, RegionId, TrackingPreferences};

use crate::collector::RejectReason;
use crate::error::RegionMonitoringError;
use crate::sync::SyncOutcome;

/// Events delivered by the platform to the tracking core.
#[derive(Debug)]
#[non_exhaustive]
pub enum CoreEvent {
    /// The OS delivered one or more fixes, oldest first.
    FixesReceived(Vec<RawFix>),
    /// The device left a monitored region.
    RegionExited(RegionId),
    /// The OS granted a background execution window.
    BackgroundFetchWindow {
        /// How long the window lasts.
        budget: Duration,
        /// Receives the sync outcome, if the caller wants it.
        reply: Option<oneshot::Sender<SyncOutcome>>,
    },
    /// The app came to the foreground.
    AppForeground,
    /// The app moved to the background.
    AppBackground,
    /// The user changed tracking preferences.
    TrackingPreferenceChanged(TrackingPreferences),
    /// The user switched tracking on or off. The core writes the new
    /// value back to the preferences watch.
    SetTrackingEnabled(bool),
    /// Acknowledged once every earlier event has been handled.
    Flush(oneshot::Sender<()>),
}

/// Notifications emitted by the tracking core.
///
/// All notifications are serializable for the host bridge.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum CoreNotification {
    /// A fix was accepted and persisted.
    SampleRecorded { sample: LocationSample },
    /// A fix batch was rejected.
    FixRejected { reason: RejectReason },
    /// A store write or read failed.
    StorageFailed { error: String },
    /// A new exit region is being monitored.
    RegionArmed { region: MonitoredRegion },
    /// Region monitoring was stopped because tracking was disabled.
    RegionDisarmed { id: RegionId },
    /// Region monitoring failed and continuous updates took over.
    MonitoringDegraded { error: RegionMonitoringError },
    /// A sync attempt finished.
    SyncFinished { outcome: SyncOutcome },
    /// The remote endpoint rejected the auth token.
    AuthExpired,
    /// The retention sweep removed old samples.
    RetentionSwept { deleted: usize },
    /// Tracking was switched on or off.
    TrackingChanged { enabled: bool },
}

/// Sender for core notifications.
pub type NotificationSender = broadcast::Sender<CoreNotification>;

/// Receiver for core notifications.
pub type NotificationReceiver = broadcast::Receiver<CoreNotification>;

/// Default notification channel capacity.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 100;

/// Fans notifications out to every subscriber.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    sender: NotificationSender,
}

impl NotificationDispatcher {
    /// Create a new dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to notifications.
    pub fn subscribe(&self) -> NotificationReceiver {
        self.sender.subscribe()
    }

    /// Send a notification.
    pub fn send(&self, notification: CoreNotification) {
        // Ignore error if no receivers
        let _ = self.sender.send(notification);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFICATION_CAPACITY)
    }
}

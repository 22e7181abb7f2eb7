//! Age-based purge of old samples.
//!
//! The sweep deletes by capture time regardless of sync state. A sample
//! that never reached the server before the cutoff is dropped too.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use rumpel_store::Store;

use crate::events::{CoreNotification, NotificationDispatcher};
use crate::health::HealthCounters;

/// Default number of days a sample is kept.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Deletes samples older than the retention window.
#[derive(Debug)]
pub struct RetentionSweeper {
    store: Arc<Store>,
    health: Arc<HealthCounters>,
    notifications: NotificationDispatcher,
}

impl RetentionSweeper {
    pub fn new(
        store: Arc<Store>,
        health: Arc<HealthCounters>,
        notifications: NotificationDispatcher,
    ) -> Self {
        Self {
            store,
            health,
            notifications,
        }
    }

    /// Delete every sample captured at or before `now - retention_days`.
    ///
    /// Returns the number of deleted samples, or `None` if the store
    /// failed or the cutoff is out of range. Failures are logged and
    /// otherwise ignored.
    pub fn sweep(&self, now: OffsetDateTime, retention_days: u32) -> Option<usize> {
        let Some(cutoff) = now.checked_sub(time::Duration::days(i64::from(retention_days))) else {
            warn!("Retention of {retention_days} days is out of range, skipping sweep");
            return None;
        };

        match self.store.purge_older_than(cutoff) {
            Ok(0) => {
                debug!("Retention sweep found nothing older than {cutoff}");
                Some(0)
            }
            Ok(deleted) => {
                info!("Retention sweep removed {deleted} samples older than {cutoff}");
                self.notifications.send(CoreNotification::RetentionSwept { deleted });
                Some(deleted)
            }
            Err(e) => {
                warn!("Retention sweep failed: {e}");
                self.health.record_storage_error();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumpel_types::{LocationSample, RawFix};

    fn sample(captured_at: OffsetDateTime) -> LocationSample {
        LocationSample::from_fix(&RawFix::new(51.5, -0.1, 10.0, captured_at))
    }

    fn sweeper(store: &Arc<Store>) -> RetentionSweeper {
        RetentionSweeper::new(
            Arc::clone(store),
            Arc::new(HealthCounters::new()),
            NotificationDispatcher::default(),
        )
    }

    #[test]
    fn test_sweep_removes_only_old_samples() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let now = OffsetDateTime::now_utc();
        store.append(&sample(now - time::Duration::days(31))).unwrap();
        store.append(&sample(now - time::Duration::days(29))).unwrap();
        store.append(&sample(now)).unwrap();

        assert_eq!(sweeper(&store).sweep(now, 30), Some(1));
        assert_eq!(store.count_samples().unwrap(), 2);
    }

    #[test]
    fn test_sweep_ignores_sync_state() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let now = OffsetDateTime::now_utc();
        let old = now - time::Duration::days(40);
        let synced = store.append(&sample(old)).unwrap();
        store.append(&sample(old)).unwrap();
        store.mark_synced(&[synced], now).unwrap();

        assert_eq!(sweeper(&store).sweep(now, 30), Some(2));
        assert_eq!(store.unsynced_count().unwrap(), 0);
    }

    #[test]
    fn test_cutoff_is_inclusive() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        store.append(&sample(now - time::Duration::days(7))).unwrap();

        assert_eq!(sweeper(&store).sweep(now, 7), Some(1));
    }

    #[test]
    fn test_out_of_range_window_skips_sweep() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let now = OffsetDateTime::now_utc();
        store.append(&sample(now - time::Duration::days(400))).unwrap();

        assert_eq!(sweeper(&store).sweep(now, u32::MAX), None);
        assert_eq!(store.count_samples().unwrap(), 1);
    }

    #[test]
    fn test_empty_store() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        assert_eq!(sweeper(&store).sweep(OffsetDateTime::now_utc(), 30), Some(0));
    }
}

//! Aggregate sync health.
//!
//! Storage and upload failures are not surfaced to the user one by one.
//! They are counted here and read back as a [`SyncHealth`] snapshot.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::sync::SyncFailure;

/// Point-in-time view of the pipeline's health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncHealth {
    /// Samples waiting for upload.
    pub unsynced_count: u64,
    /// When the last successful upload was recorded.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_synced_at: Option<OffsetDateTime>,
    /// Store failures since startup.
    pub storage_errors: u64,
    /// Store failures since the last successful write.
    pub consecutive_storage_errors: u64,
    /// Failed sync attempts since the last successful upload.
    pub consecutive_sync_failures: u64,
    /// Samples uploaded since startup.
    pub samples_uploaded: u64,
    /// The endpoint rejected the current token.
    pub auth_expired: bool,
}

impl SyncHealth {
    /// True when nothing is currently failing.
    pub fn is_healthy(&self) -> bool {
        self.consecutive_storage_errors == 0
            && self.consecutive_sync_failures == 0
            && !self.auth_expired
    }
}

/// Thread-safe counters shared by the collector, scheduler and sweeper.
#[derive(Debug, Default)]
pub struct HealthCounters {
    storage_errors: AtomicU64,
    consecutive_storage_errors: AtomicU64,
    consecutive_sync_failures: AtomicU64,
    samples_uploaded: AtomicU64,
    auth_expired: AtomicBool,
}

impl HealthCounters {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_storage_error(&self) {
        self.storage_errors.fetch_add(1, Ordering::Relaxed);
        self.consecutive_storage_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_success(&self) {
        self.consecutive_storage_errors.store(0, Ordering::Relaxed);
    }

    pub fn record_sync_success(&self, uploaded: usize) {
        self.samples_uploaded.fetch_add(uploaded as u64, Ordering::Relaxed);
        self.consecutive_sync_failures.store(0, Ordering::Relaxed);
        self.auth_expired.store(false, Ordering::Relaxed);
    }

    pub fn record_sync_failure(&self, failure: &SyncFailure) {
        self.consecutive_sync_failures.fetch_add(1, Ordering::Relaxed);
        if matches!(failure, SyncFailure::AuthExpired) {
            self.auth_expired.store(true, Ordering::Relaxed);
        }
    }

    /// Clear the auth flag after the host supplies a new token.
    pub fn clear_auth_expired(&self) {
        self.auth_expired.store(false, Ordering::Relaxed);
    }

    /// Combine the counters with store-derived figures.
    pub fn snapshot(
        &self,
        unsynced_count: u64,
        last_synced_at: Option<OffsetDateTime>,
    ) -> SyncHealth {
        SyncHealth {
            unsynced_count,
            last_synced_at,
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            consecutive_storage_errors: self.consecutive_storage_errors.load(Ordering::Relaxed),
            consecutive_sync_failures: self.consecutive_sync_failures.load(Ordering::Relaxed),
            samples_uploaded: self.samples_uploaded.load(Ordering::Relaxed),
            auth_expired: self.auth_expired.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_counters_are_healthy() {
        let health = HealthCounters::new().snapshot(0, None);
        assert!(health.is_healthy());
        assert_eq!(health.samples_uploaded, 0);
    }

    #[test]
    fn test_storage_errors_reset_on_success() {
        let counters = HealthCounters::new();
        counters.record_storage_error();
        counters.record_storage_error();
        assert!(!counters.snapshot(0, None).is_healthy());

        counters.record_storage_success();
        let health = counters.snapshot(0, None);
        assert!(health.is_healthy());
        assert_eq!(health.storage_errors, 2);
    }

    #[test]
    fn test_auth_expiry_sticks_until_success() {
        let counters = HealthCounters::new();
        counters.record_sync_failure(&SyncFailure::HttpStatus(500));
        counters.record_sync_failure(&SyncFailure::AuthExpired);

        let health = counters.snapshot(7, None);
        assert!(health.auth_expired);
        assert_eq!(health.consecutive_sync_failures, 2);
        assert_eq!(health.unsynced_count, 7);

        counters.record_sync_success(7);
        let health = counters.snapshot(0, None);
        assert!(health.is_healthy());
        assert_eq!(health.samples_uploaded, 7);
    }
}

//! Opportunistic, single-flight upload of buffered samples.
//!
//! [`SyncScheduler::try_sync`] is called whenever the OS grants some
//! execution time. It uploads at most one batch of the oldest unsynced
//! samples and gives up when the wake budget runs out. Samples are marked
//! synced only after a 2xx response, so every failure leaves them buffered
//! for the next window.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use rumpel_store::Store;

use crate::error::NetworkError;
use crate::events::{CoreNotification, NotificationDispatcher};
use crate::guard::InFlightGuard;
use crate::health::HealthCounters;
use crate::traits::{AuthTokenProvider, UploadTransport};

/// Default number of samples per upload.
pub const DEFAULT_BATCH_SIZE: u32 = 250;

/// Upload settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Where batches are POSTed.
    pub endpoint: String,
    /// Maximum samples per upload.
    pub batch_size: u32,
}

impl SyncConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set the batch size.
    #[must_use]
    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Why a sync attempt did not upload anything.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SyncFailure {
    #[error("{0}")]
    Network(NetworkError),
    #[error("Upload abandoned after the {0:?} wake budget")]
    Timeout(Duration),
    #[error("Endpoint answered with HTTP {0}")]
    HttpStatus(u16),
    #[error("Auth token rejected")]
    AuthExpired,
    #[error("No auth token available")]
    MissingToken,
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result of one [`SyncScheduler::try_sync`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Another sync was already running.
    Skipped,
    /// Nothing was waiting for upload.
    NoData,
    /// This many samples were uploaded and marked synced.
    Uploaded(usize),
    /// The attempt failed. Samples remain unsynced.
    Failed(SyncFailure),
}

/// Uploads batches of unsynced samples, one attempt at a time.
pub struct SyncScheduler {
    store: Arc<Store>,
    transport: Arc<dyn UploadTransport>,
    auth: Arc<dyn AuthTokenProvider>,
    config: SyncConfig,
    in_flight: AtomicBool,
    health: Arc<HealthCounters>,
    notifications: NotificationDispatcher,
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl SyncScheduler {
    pub fn new(
        store: Arc<Store>,
        transport: Arc<dyn UploadTransport>,
        auth: Arc<dyn AuthTokenProvider>,
        config: SyncConfig,
        health: Arc<HealthCounters>,
        notifications: NotificationDispatcher,
    ) -> Self {
        Self {
            store,
            transport,
            auth,
            config,
            in_flight: AtomicBool::new(false),
            health,
            notifications,
        }
    }

    /// Upload one batch within `wake_budget`.
    ///
    /// Returns [`SyncOutcome::Skipped`] immediately if another call is
    /// still running.
    pub async fn try_sync(&self, wake_budget: Duration) -> SyncOutcome {
        let Some(_guard) = InFlightGuard::try_acquire(&self.in_flight) else {
            debug!("Sync already in flight, skipping");
            return SyncOutcome::Skipped;
        };

        let outcome = self.upload_batch(wake_budget).await;

        match &outcome {
            SyncOutcome::Uploaded(count) => self.health.record_sync_success(*count),
            SyncOutcome::Failed(failure) => {
                self.health.record_sync_failure(failure);
                if matches!(failure, SyncFailure::AuthExpired) {
                    self.notifications.send(CoreNotification::AuthExpired);
                }
            }
            SyncOutcome::Skipped | SyncOutcome::NoData => {}
        }
        self.notifications.send(CoreNotification::SyncFinished {
            outcome: outcome.clone(),
        });

        outcome
    }

    async fn upload_batch(&self, wake_budget: Duration) -> SyncOutcome {
        let batch = match self.store.unsynced_samples(self.config.batch_size) {
            Ok(batch) => batch,
            Err(e) => {
                error!("Failed to read unsynced samples: {e}");
                self.health.record_storage_error();
                return SyncOutcome::Failed(SyncFailure::Storage(e.to_string()));
            }
        };

        if batch.is_empty() {
            debug!("No unsynced samples");
            return SyncOutcome::NoData;
        }

        let Some(token) = self.auth.current() else {
            warn!("No auth token, leaving {} samples buffered", batch.len());
            return SyncOutcome::Failed(SyncFailure::MissingToken);
        };

        let started = Instant::now();
        let upload = self.transport.upload(&self.config.endpoint, &batch, &token);

        let status = match tokio::time::timeout(wake_budget, upload).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                warn!("Upload of {} samples failed: {e}", batch.len());
                return SyncOutcome::Failed(SyncFailure::Network(e));
            }
            Err(_) => {
                warn!("Upload abandoned after {:?}", wake_budget);
                return SyncOutcome::Failed(SyncFailure::Timeout(wake_budget));
            }
        };

        match status {
            200..=299 => {}
            401 | 403 => {
                warn!("Endpoint rejected the auth token (HTTP {status})");
                return SyncOutcome::Failed(SyncFailure::AuthExpired);
            }
            _ => {
                warn!("Endpoint answered with HTTP {status}");
                return SyncOutcome::Failed(SyncFailure::HttpStatus(status));
            }
        }

        let ids: Vec<i64> = batch.iter().map(|s| s.sequence_id).collect();
        match self.store.mark_synced(&ids, OffsetDateTime::now_utc()) {
            Ok(_) => {
                info!("Uploaded {} samples in {:?}", ids.len(), started.elapsed());
                SyncOutcome::Uploaded(ids.len())
            }
            Err(e) => {
                // The batch stays unsynced and goes out again next window.
                error!("Uploaded batch but failed to mark it synced: {e}");
                self.health.record_storage_error();
                SyncOutcome::Failed(SyncFailure::Storage(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::traits::SharedToken;
    use rumpel_types::{LocationSample, RawFix};

    const BUDGET: Duration = Duration::from_secs(25);

    struct Harness {
        store: Arc<Store>,
        transport: Arc<MockTransport>,
        token: Arc<SharedToken>,
        health: Arc<HealthCounters>,
        scheduler: SyncScheduler,
    }

    fn harness(batch_size: u32) -> Harness {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let transport = Arc::new(MockTransport::new());
        let token = Arc::new(SharedToken::new(Some("secret".into())));
        let health = Arc::new(HealthCounters::new());
        let scheduler = SyncScheduler::new(
            Arc::clone(&store),
            transport.clone(),
            token.clone(),
            SyncConfig::new("https://hat.example/api/locations").batch_size(batch_size),
            Arc::clone(&health),
            NotificationDispatcher::default(),
        );
        Harness {
            store,
            transport,
            token,
            health,
            scheduler,
        }
    }

    fn fill(store: &Store, n: usize) {
        let now = OffsetDateTime::now_utc();
        for i in 0..n {
            let fix = RawFix::new(50.0 + i as f64 * 0.01, 0.0, 10.0, now);
            store.append(&LocationSample::from_fix(&fix)).unwrap();
        }
    }

    #[tokio::test]
    async fn test_no_data() {
        let h = harness(250);
        assert_eq!(h.scheduler.try_sync(BUDGET).await, SyncOutcome::NoData);
        assert_eq!(h.transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_uploads_oldest_batch() {
        let h = harness(2);
        fill(&h.store, 3);

        assert_eq!(h.scheduler.try_sync(BUDGET).await, SyncOutcome::Uploaded(2));

        let uploads = h.transport.uploads().await;
        let ids: Vec<i64> = uploads[0].batch.iter().map(|s| s.sequence_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(uploads[0].auth_token, "secret");
        assert_eq!(uploads[0].endpoint, "https://hat.example/api/locations");
        assert_eq!(h.store.unsynced_count().unwrap(), 1);

        assert_eq!(h.scheduler.try_sync(BUDGET).await, SyncOutcome::Uploaded(1));
        assert_eq!(h.store.unsynced_count().unwrap(), 0);
        assert_eq!(h.health.snapshot(0, None).samples_uploaded, 3);
    }

    #[tokio::test]
    async fn test_server_error_keeps_samples() {
        let h = harness(250);
        fill(&h.store, 2);
        h.transport.set_status(503);

        assert_eq!(
            h.scheduler.try_sync(BUDGET).await,
            SyncOutcome::Failed(SyncFailure::HttpStatus(503))
        );
        assert_eq!(h.store.unsynced_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_auth_rejection() {
        let h = harness(250);
        fill(&h.store, 1);
        h.transport.set_status(401);
        let mut notifications = h.scheduler.notifications.subscribe();

        assert_eq!(
            h.scheduler.try_sync(BUDGET).await,
            SyncOutcome::Failed(SyncFailure::AuthExpired)
        );
        assert!(h.health.snapshot(1, None).auth_expired);
        assert!(matches!(
            notifications.recv().await.unwrap(),
            CoreNotification::AuthExpired
        ));
        assert_eq!(h.store.unsynced_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_token_skips_network() {
        let h = harness(250);
        fill(&h.store, 1);
        h.token.clear();

        assert_eq!(
            h.scheduler.try_sync(BUDGET).await,
            SyncOutcome::Failed(SyncFailure::MissingToken)
        );
        assert_eq!(h.transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_network_error_keeps_samples() {
        let h = harness(250);
        fill(&h.store, 1);
        h.transport
            .set_failure(Some(NetworkError::Transport("offline".into())))
            .await;

        assert!(matches!(
            h.scheduler.try_sync(BUDGET).await,
            SyncOutcome::Failed(SyncFailure::Network(_))
        ));
        assert_eq!(h.store.unsynced_count().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exceeded_abandons_upload() {
        let h = harness(250);
        fill(&h.store, 1);
        h.transport.set_latency(Duration::from_secs(60));

        let budget = Duration::from_secs(5);
        assert_eq!(
            h.scheduler.try_sync(budget).await,
            SyncOutcome::Failed(SyncFailure::Timeout(budget))
        );
        assert_eq!(h.store.unsynced_count().unwrap(), 1);

        // The flag was released by the abandoned attempt
        h.transport.set_latency(Duration::ZERO);
        assert_eq!(h.scheduler.try_sync(budget).await, SyncOutcome::Uploaded(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_calls_are_single_flight() {
        let h = harness(250);
        fill(&h.store, 2);
        h.transport.set_latency(Duration::from_secs(2));

        let (a, b) = tokio::join!(h.scheduler.try_sync(BUDGET), h.scheduler.try_sync(BUDGET));

        assert_eq!(a, SyncOutcome::Uploaded(2));
        assert_eq!(b, SyncOutcome::Skipped);
        assert_eq!(h.transport.call_count(), 1);
    }

    #[test]
    fn test_outcome_json() {
        let json = serde_json::to_value(SyncOutcome::Uploaded(4)).unwrap();
        assert_eq!(json["status"], "uploaded");
        assert_eq!(json["detail"], 4);

        let json =
            serde_json::to_value(SyncOutcome::Failed(SyncFailure::HttpStatus(500))).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["detail"]["kind"], "http_status");
        assert_eq!(json["detail"]["detail"], 500);
    }
}

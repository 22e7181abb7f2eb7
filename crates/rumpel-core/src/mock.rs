//! Mock platform implementations for testing.
//!
//! [`MockLocationService`] records every call the core makes to the OS
//! location API. [`MockTransport`] stands in for the HTTP uploader.
//!
//! # Features
//!
//! - **Call log**: Assert the exact order of platform calls
//! - **Failure injection**: Refuse region monitoring or fail uploads
//! - **Latency simulation**: Delay uploads to exercise timeouts and overlap

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use rumpel_types::{LocationSample, MonitoredRegion, RegionId};

use crate::error::{NetworkError, RegionMonitoringError};
use crate::traits::{LocationService, UploadTransport};

/// The per-app region limit iOS enforces.
pub const DEFAULT_REGION_LIMIT: usize = 20;

/// A call made to [`MockLocationService`].
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceCall {
    Configure {
        desired_accuracy_meters: f64,
        distance_filter_meters: f64,
    },
    StartUpdating,
    StopUpdating,
    RequestLocation,
    StartMonitoring(RegionId),
    StopMonitoring(RegionId),
}

#[derive(Debug, Default)]
struct ServiceState {
    calls: Vec<ServiceCall>,
    monitored: Vec<MonitoredRegion>,
    max_concurrent: usize,
}

/// A mock location service.
///
/// # Example
///
/// ```
/// use rumpel_core::mock::{MockLocationService, ServiceCall};
/// use rumpel_core::LocationService;
///
/// let service = MockLocationService::new();
/// service.start_updating();
/// assert!(service.is_updating());
/// assert_eq!(service.calls(), vec![ServiceCall::StartUpdating]);
/// ```
#[derive(Debug)]
pub struct MockLocationService {
    state: Mutex<ServiceState>,
    updating: AtomicBool,
    location_requests: AtomicU32,
    fail_monitoring: AtomicBool,
    region_limit: AtomicUsize,
}

impl Default for MockLocationService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLocationService {
    /// Create a mock with updates stopped and nothing monitored.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServiceState::default()),
            updating: AtomicBool::new(false),
            location_requests: AtomicU32::new(0),
            fail_monitoring: AtomicBool::new(false),
            region_limit: AtomicUsize::new(DEFAULT_REGION_LIMIT),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.lock().calls.clone()
    }

    /// Forget the recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Regions currently registered.
    pub fn monitored_regions(&self) -> Vec<MonitoredRegion> {
        self.lock().monitored.clone()
    }

    /// The most regions ever registered at the same time.
    pub fn max_concurrent_regions(&self) -> usize {
        self.lock().max_concurrent
    }

    /// Whether continuous updates are running.
    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::Relaxed)
    }

    /// Number of one-shot fixes requested.
    pub fn location_requests(&self) -> u32 {
        self.location_requests.load(Ordering::Relaxed)
    }

    /// Make every `start_monitoring` call fail with `LimitReached`.
    pub fn set_fail_monitoring(&self, fail: bool) {
        self.fail_monitoring.store(fail, Ordering::Relaxed);
    }

    /// Change how many regions may be registered at once.
    pub fn set_region_limit(&self, limit: usize) {
        self.region_limit.store(limit, Ordering::Relaxed);
    }
}

impl LocationService for MockLocationService {
    fn configure(&self, desired_accuracy_meters: f64, distance_filter_meters: f64) {
        self.lock().calls.push(ServiceCall::Configure {
            desired_accuracy_meters,
            distance_filter_meters,
        });
    }

    fn start_updating(&self) {
        self.updating.store(true, Ordering::Relaxed);
        self.lock().calls.push(ServiceCall::StartUpdating);
    }

    fn stop_updating(&self) {
        self.updating.store(false, Ordering::Relaxed);
        self.lock().calls.push(ServiceCall::StopUpdating);
    }

    fn request_location(&self) {
        self.location_requests.fetch_add(1, Ordering::Relaxed);
        self.lock().calls.push(ServiceCall::RequestLocation);
    }

    fn start_monitoring(&self, region: &MonitoredRegion) -> Result<(), RegionMonitoringError> {
        let limit = self.region_limit.load(Ordering::Relaxed);
        let mut state = self.lock();
        state.calls.push(ServiceCall::StartMonitoring(region.id));

        if self.fail_monitoring.load(Ordering::Relaxed) || state.monitored.len() >= limit {
            return Err(RegionMonitoringError::LimitReached(limit));
        }

        state.monitored.push(*region);
        state.max_concurrent = state.max_concurrent.max(state.monitored.len());
        Ok(())
    }

    fn stop_monitoring(&self, id: &RegionId) {
        let mut state = self.lock();
        state.calls.push(ServiceCall::StopMonitoring(*id));
        state.monitored.retain(|r| r.id != *id);
    }
}

/// A recorded upload.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedUpload {
    pub endpoint: String,
    pub auth_token: String,
    pub batch: Vec<LocationSample>,
}

/// A mock upload transport.
///
/// Returns a configurable status code, optionally after a delay, and
/// records every batch it receives.
pub struct MockTransport {
    status: AtomicU16,
    latency_ms: AtomicU64,
    call_count: AtomicU32,
    failure: RwLock<Option<NetworkError>>,
    uploads: RwLock<Vec<RecordedUpload>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("status", &self.status.load(Ordering::Relaxed))
            .field("call_count", &self.call_count.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a transport that answers 200 immediately.
    pub fn new() -> Self {
        Self::with_status(200)
    }

    /// Create a transport that answers `status` immediately.
    pub fn with_status(status: u16) -> Self {
        Self {
            status: AtomicU16::new(status),
            latency_ms: AtomicU64::new(0),
            call_count: AtomicU32::new(0),
            failure: RwLock::new(None),
            uploads: RwLock::new(Vec::new()),
        }
    }

    /// Change the status returned by later uploads.
    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::Relaxed);
    }

    /// Delay each upload by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Fail later uploads with `error`, or stop failing with `None`.
    pub async fn set_failure(&self, error: Option<NetworkError>) {
        *self.failure.write().await = error;
    }

    /// Number of upload calls started, including failed ones.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Uploads that reached the point of returning a status.
    pub async fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.read().await.clone()
    }
}

#[async_trait]
impl UploadTransport for MockTransport {
    async fn upload(
        &self,
        endpoint: &str,
        batch: &[LocationSample],
        auth_token: &str,
    ) -> Result<u16, NetworkError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if let Some(error) = self.failure.read().await.clone() {
            return Err(error);
        }

        self.uploads.write().await.push(RecordedUpload {
            endpoint: endpoint.to_string(),
            auth_token: auth_token.to_string(),
            batch: batch.to_vec(),
        });
        Ok(self.status.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumpel_types::Coordinate;
    use time::OffsetDateTime;

    fn region(id: u64) -> MonitoredRegion {
        MonitoredRegion::new(
            RegionId(id),
            Coordinate {
                latitude: 0.0,
                longitude: 0.0,
            },
            OffsetDateTime::UNIX_EPOCH,
        )
    }

    #[test]
    fn test_region_limit_enforced() {
        let service = MockLocationService::new();
        service.set_region_limit(1);

        service.start_monitoring(&region(1)).unwrap();
        assert_eq!(
            service.start_monitoring(&region(2)),
            Err(RegionMonitoringError::LimitReached(1))
        );

        service.stop_monitoring(&RegionId(1));
        service.start_monitoring(&region(2)).unwrap();
        assert_eq!(service.max_concurrent_regions(), 1);
    }

    #[test]
    fn test_updating_flag() {
        let service = MockLocationService::new();
        service.start_updating();
        service.request_location();
        service.stop_updating();

        assert!(!service.is_updating());
        assert_eq!(service.location_requests(), 1);
        assert_eq!(service.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_transport_records_uploads() {
        let transport = MockTransport::with_status(201);
        let status = transport.upload("https://example.test", &[], "tok").await;
        assert_eq!(status, Ok(201));

        let uploads = transport.uploads().await;
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].auth_token, "tok");
    }

    #[tokio::test]
    async fn test_transport_failure_injection() {
        let transport = MockTransport::new();
        transport
            .set_failure(Some(NetworkError::Transport("offline".into())))
            .await;

        let result = transport.upload("https://example.test", &[], "tok").await;
        assert!(matches!(result, Err(NetworkError::Transport(_))));
        assert_eq!(transport.call_count(), 1);
        assert!(transport.uploads().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_latency() {
        let transport = MockTransport::new();
        transport.set_latency(Duration::from_secs(3));

        let start = tokio::time::Instant::now();
        transport.upload("https://example.test", &[], "tok").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}

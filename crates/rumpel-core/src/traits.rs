//! Platform seams for the tracking core.
//!
//! The OS location API, the upload transport and the credential source are
//! consumed through these traits so the core runs identically against the
//! real platform, the host bridge and the mocks in [`crate::mock`].

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use rumpel_types::{LocationSample, MonitoredRegion, RegionId};

use crate::error::{NetworkError, RegionMonitoringError};

/// The platform location service.
///
/// Calls are fire-and-forget requests to the OS. Results come back to the
/// core as [`crate::CoreEvent`]s.
pub trait LocationService: Send + Sync {
    /// Set the accuracy and distance filter used for continuous updates.
    fn configure(&self, desired_accuracy_meters: f64, distance_filter_meters: f64);

    /// Begin continuous location updates.
    fn start_updating(&self);

    /// Stop continuous location updates.
    fn stop_updating(&self);

    /// Ask for a single fix.
    fn request_location(&self);

    /// Register a region for exit monitoring.
    fn start_monitoring(&self, region: &MonitoredRegion) -> Result<(), RegionMonitoringError>;

    /// Unregister a previously monitored region.
    fn stop_monitoring(&self, id: &RegionId);
}

/// Delivers a batch of samples to the remote endpoint.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Upload `batch` and return the HTTP status code.
    ///
    /// Non-2xx responses are returned as `Ok(status)`. Only failures to get
    /// a response at all are errors.
    async fn upload(
        &self,
        endpoint: &str,
        batch: &[LocationSample],
        auth_token: &str,
    ) -> Result<u16, NetworkError>;
}

/// Source of the current auth token.
pub trait AuthTokenProvider: Send + Sync {
    /// The token to attach to the next upload, if any.
    fn current(&self) -> Option<String>;
}

/// An [`AuthTokenProvider`] the host can update at runtime.
#[derive(Debug, Default)]
pub struct SharedToken {
    token: RwLock<Option<String>>,
}

impl SharedToken {
    /// Create a provider holding `token`.
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    /// Replace the stored token.
    pub fn set(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    /// Forget the stored token.
    pub fn clear(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Whether a token is currently set.
    pub fn is_set(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl AuthTokenProvider for SharedToken {
    fn current(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

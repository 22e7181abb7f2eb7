//! Battery-aware location tracking core for the Rumpel client.
//!
//! This crate turns raw OS location fixes into a durable, deduplicated
//! trail of samples and uploads them to a HAT endpoint whenever the
//! platform grants some execution time.
//!
//! # Features
//!
//! - **Fix filtering**: Accuracy and 100 m movement thresholds
//! - **Single moving geofence**: One 150 m exit region re-armed on each
//!   accepted sample, so the GPS stays off while the user is still
//! - **Opportunistic sync**: Single-flight batched uploads bounded by the
//!   OS wake budget
//! - **Retention**: Age-based purge of old samples
//! - **Notifications**: Broadcast stream of everything the core does
//!
//! # Architecture
//!
//! ```text
//!  platform callbacks ──▶ CoreHandle ──mpsc──▶ TrackingCore::run
//!                                               ├─ LocationCollector ──▶ Store
//!                                               │    └─ RegionReArmer ──▶ LocationService
//!                                               ├─ SyncScheduler ──▶ UploadTransport
//!                                               └─ RetentionSweeper ──▶ Store
//! ```
//!
//! The OS location API, the uploader and the token source are traits
//! ([`LocationService`], [`UploadTransport`], [`AuthTokenProvider`]).
//! [`mock`] provides in-memory implementations for tests, and the `http`
//! feature adds [`HttpTransport`].

pub mod collector;
pub mod error;
pub mod events;
pub mod guard;
pub mod health;
pub mod mock;
pub mod region;
pub mod retention;
pub mod runtime;
pub mod sync;
pub mod traits;
#[cfg(feature = "http")]
pub mod transport;

pub use collector::{FixOutcome, LocationCollector, MOVEMENT_THRESHOLD_METERS, RejectReason};
pub use error::{Error, NetworkError, RegionMonitoringError, Result};
pub use events::{
    CoreEvent, CoreNotification, NotificationDispatcher, NotificationReceiver, NotificationSender,
};
pub use guard::InFlightGuard;
pub use health::{HealthCounters, SyncHealth};
pub use region::{ExitOutcome, RegionReArmer, RegionState};
pub use retention::{DEFAULT_RETENTION_DAYS, RetentionSweeper};
pub use runtime::{
    CoreConfig, CoreDependencies, CoreHandle, DEFAULT_FOREGROUND_BUDGET, TrackingCore,
};
pub use sync::{DEFAULT_BATCH_SIZE, SyncConfig, SyncFailure, SyncOutcome, SyncScheduler};
pub use traits::{AuthTokenProvider, LocationService, SharedToken, UploadTransport};
#[cfg(feature = "http")]
pub use transport::{DEFAULT_AUTH_HEADER, HttpTransport, WireSample};

// Re-export the value types so hosts only need this crate
pub use rumpel_types::{
    Coordinate, LocationSample, MonitoredRegion, REGION_RADIUS_METERS, RawFix, RegionId,
    TrackingPreferences,
};

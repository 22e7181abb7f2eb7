//! Fix validation and persistence.
//!
//! [`LocationCollector`] decides whether a fix becomes a sample. A fix is
//! accepted only if it is accurate enough and at least
//! [`MOVEMENT_THRESHOLD_METERS`] away from the last stored sample. Every
//! accepted fix is written to the store before the exit region is moved,
//! so a failed write never moves the geofence.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use rumpel_store::Store;
use rumpel_types::{Coordinate, LocationSample, MonitoredRegion, RawFix, TrackingPreferences};

use crate::error::{Error, Result};
use crate::events::{CoreNotification, NotificationDispatcher};
use crate::health::HealthCounters;
use crate::region::RegionReArmer;
use crate::traits::LocationService;

/// Minimum distance in meters between consecutive stored samples.
pub const MOVEMENT_THRESHOLD_METERS: f64 = 100.0;

/// Why a fix batch did not produce a sample.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
#[non_exhaustive]
pub enum RejectReason {
    #[error("Fix batch was empty")]
    EmptyBatch,
    #[error("Tracking is disabled")]
    TrackingDisabled,
    #[error("Fix coordinate is out of range")]
    InvalidCoordinate,
    #[error("Horizontal accuracy {accuracy} is negative")]
    NegativeAccuracy { accuracy: f64 },
    #[error("Horizontal accuracy {accuracy:.1} m exceeds {threshold:.1} m")]
    TooImprecise { accuracy: f64, threshold: f64 },
    #[error("Moved {distance:.1} m, less than {threshold:.1} m")]
    TooClose { distance: f64, threshold: f64 },
}

/// What happened to a fix batch.
#[derive(Debug, Clone, PartialEq)]
pub enum FixOutcome {
    /// The newest fix was persisted.
    Accepted {
        sample: LocationSample,
        /// The region armed around the sample, or `None` if monitoring
        /// failed and continuous updates took over.
        region: Option<MonitoredRegion>,
    },
    /// Nothing was written.
    Rejected(RejectReason),
}

/// Turns OS fixes into stored samples and keeps the geofence on the
/// latest one.
pub struct LocationCollector {
    store: Arc<Store>,
    service: Arc<dyn LocationService>,
    rearmer: Arc<RegionReArmer>,
    notifications: NotificationDispatcher,
    health: Arc<HealthCounters>,
    preferences: TrackingPreferences,
}

impl std::fmt::Debug for LocationCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationCollector")
            .field("preferences", &self.preferences)
            .field("region", &self.rearmer.state())
            .finish_non_exhaustive()
    }
}

impl LocationCollector {
    pub fn new(
        store: Arc<Store>,
        service: Arc<dyn LocationService>,
        rearmer: Arc<RegionReArmer>,
        notifications: NotificationDispatcher,
        health: Arc<HealthCounters>,
    ) -> Self {
        Self {
            store,
            service,
            rearmer,
            notifications,
            health,
            preferences: TrackingPreferences::default(),
        }
    }

    /// The preferences currently in effect.
    pub fn preferences(&self) -> TrackingPreferences {
        self.preferences
    }

    pub fn is_enabled(&self) -> bool {
        self.preferences.enabled
    }

    /// Check a single fix against the accuracy and movement rules.
    ///
    /// `last` is the most recently stored sample, if any. On success the
    /// returned sample has `sequence_id` 0 until the store assigns one.
    pub fn validate_fix(
        &self,
        fix: &RawFix,
        last: Option<&LocationSample>,
    ) -> std::result::Result<LocationSample, RejectReason> {
        if !fix.coordinate.is_valid() {
            return Err(RejectReason::InvalidCoordinate);
        }

        let accuracy = fix.horizontal_accuracy;
        if !(accuracy >= 0.0) {
            return Err(RejectReason::NegativeAccuracy { accuracy });
        }

        let threshold = self.preferences.desired_accuracy_meters;
        if accuracy > threshold {
            return Err(RejectReason::TooImprecise {
                accuracy,
                threshold,
            });
        }

        if let Some(last) = last {
            let distance = last.coordinate().distance_to(&fix.coordinate);
            if distance < MOVEMENT_THRESHOLD_METERS {
                return Err(RejectReason::TooClose {
                    distance,
                    threshold: MOVEMENT_THRESHOLD_METERS,
                });
            }
        }

        Ok(LocationSample::from_fix(fix))
    }

    /// Handle a batch of fixes from the OS. Only the newest fix counts.
    ///
    /// Rejections are not errors. An error means the store failed, the fix
    /// was lost and the geofence was left where it was.
    pub fn on_fixes_received(&mut self, fixes: &[RawFix]) -> Result<FixOutcome> {
        let Some(fix) = fixes.last() else {
            return Ok(self.rejected(RejectReason::EmptyBatch, None));
        };

        if !self.preferences.enabled {
            return Ok(self.rejected(RejectReason::TrackingDisabled, None));
        }

        let last = self
            .store
            .last_sample()
            .map_err(|e| self.storage_failure(e))?;

        let sample = match self.validate_fix(fix, last.as_ref()) {
            Ok(sample) => sample,
            Err(reason) => return Ok(self.rejected(reason, last.as_ref())),
        };

        let sequence_id = self
            .store
            .append(&sample)
            .map_err(|e| self.storage_failure(e))?;
        self.health.record_storage_success();

        let sample = LocationSample {
            sequence_id,
            ..sample
        };
        info!(
            "Recorded sample #{} at {} (±{:.0} m)",
            sequence_id,
            sample.coordinate(),
            sample.horizontal_accuracy
        );
        self.notifications.send(CoreNotification::SampleRecorded {
            sample: sample.clone(),
        });

        let region = self.arm_around(sample.coordinate());
        Ok(FixOutcome::Accepted { sample, region })
    }

    /// Take over `preferences` at startup and begin tracking if enabled.
    pub fn activate(&mut self, preferences: TrackingPreferences) {
        self.preferences = preferences;
        self.set_tracking_enabled(preferences.enabled);
    }

    /// Apply new preferences, starting or stopping tracking as needed.
    pub fn apply_preferences(&mut self, preferences: TrackingPreferences) {
        let was_enabled = self.preferences.enabled;
        self.preferences = preferences;
        debug!("Applied tracking preferences {:?}", preferences);

        if preferences.enabled != was_enabled {
            // Enabling configures the service itself; a disabled service
            // picks the filters up on the next enable.
            self.set_tracking_enabled(preferences.enabled);
        } else {
            self.service.configure(
                preferences.desired_accuracy_meters,
                preferences.min_distance_meters,
            );
        }
    }

    /// Switch tracking on or off.
    ///
    /// Enabling starts continuous updates so the first accepted fix can
    /// arm a region. Disabling stops updates and disarms the region.
    pub fn set_tracking_enabled(&mut self, enabled: bool) {
        self.preferences.enabled = enabled;

        if enabled {
            self.service.configure(
                self.preferences.desired_accuracy_meters,
                self.preferences.min_distance_meters,
            );
            self.service.start_updating();
            info!("Tracking enabled");
        } else {
            self.service.stop_updating();
            if let Some(id) = self.rearmer.disarm() {
                self.notifications.send(CoreNotification::RegionDisarmed { id });
            }
            info!("Tracking disabled");
        }

        self.notifications.send(CoreNotification::TrackingChanged { enabled });
    }

    /// Make sure something will wake the app when the user moves.
    ///
    /// Called when the app goes to the background. If tracking is on but
    /// no region is armed, continuous updates are started.
    pub fn ensure_monitoring(&self) {
        if self.preferences.enabled && self.rearmer.armed_region().is_none() {
            debug!("No region armed, starting continuous updates");
            self.service.start_updating();
        }
    }

    fn arm_around(&self, center: Coordinate) -> Option<MonitoredRegion> {
        match self.rearmer.rearm(center) {
            Ok(region) => {
                self.service.stop_updating();
                self.notifications.send(CoreNotification::RegionArmed { region });
                Some(region)
            }
            Err(e) => {
                warn!("Region monitoring failed, falling back to continuous updates: {e}");
                self.service.start_updating();
                self.notifications.send(CoreNotification::MonitoringDegraded { error: e });
                None
            }
        }
    }

    fn rejected(&self, reason: RejectReason, last: Option<&LocationSample>) -> FixOutcome {
        debug!("Rejected fix: {reason}");

        // Nothing is armed, so nothing will wake us when the user moves.
        // A stationary user gets a region around the last sample. Otherwise
        // keep continuous updates running until a usable fix arrives.
        if self.preferences.enabled && self.rearmer.armed_region().is_none() {
            match (&reason, last) {
                (RejectReason::TooClose { .. }, Some(last)) => {
                    self.arm_around(last.coordinate());
                }
                (RejectReason::EmptyBatch, _) => {}
                _ => self.ensure_monitoring(),
            }
        }

        self.notifications.send(CoreNotification::FixRejected {
            reason: reason.clone(),
        });
        FixOutcome::Rejected(reason)
    }

    fn storage_failure(&self, e: rumpel_store::Error) -> Error {
        error!("Failed to persist location fix: {e}");
        self.health.record_storage_error();
        self.notifications.send(CoreNotification::StorageFailed {
            error: e.to_string(),
        });
        Error::Storage(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockLocationService, ServiceCall};
    use crate::region::RegionState;
    use rumpel_types::geo::destination;
    use time::OffsetDateTime;

    struct Harness {
        store: Arc<Store>,
        service: Arc<MockLocationService>,
        rearmer: Arc<RegionReArmer>,
        collector: LocationCollector,
    }

    fn harness_with_store(store: Arc<Store>) -> Harness {
        let service = Arc::new(MockLocationService::new());
        let rearmer = Arc::new(RegionReArmer::new(service.clone()));
        let collector = LocationCollector::new(
            Arc::clone(&store),
            service.clone(),
            Arc::clone(&rearmer),
            NotificationDispatcher::default(),
            Arc::new(HealthCounters::new()),
        );
        Harness {
            store,
            service,
            rearmer,
            collector,
        }
    }

    fn harness() -> Harness {
        harness_with_store(Arc::new(Store::open_in_memory().unwrap()))
    }

    fn fix_at(coordinate: Coordinate, accuracy: f64) -> RawFix {
        RawFix {
            coordinate,
            horizontal_accuracy: accuracy,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    fn london() -> Coordinate {
        Coordinate {
            latitude: 51.5,
            longitude: -0.1,
        }
    }

    #[test]
    fn test_first_fix_is_accepted_and_armed() {
        let mut h = harness();

        let outcome = h.collector.on_fixes_received(&[fix_at(london(), 10.0)]).unwrap();
        let FixOutcome::Accepted { sample, region } = outcome else {
            panic!("expected acceptance, got {outcome:?}");
        };

        assert_eq!(sample.sequence_id, 1);
        assert_eq!(region.unwrap().center, london());
        assert_eq!(h.store.count_samples().unwrap(), 1);
        assert!(!h.service.is_updating());
    }

    #[test]
    fn test_imprecise_fix_is_rejected() {
        let mut h = harness();

        let outcome = h.collector.on_fixes_received(&[fix_at(london(), 150.0)]).unwrap();
        assert_eq!(
            outcome,
            FixOutcome::Rejected(RejectReason::TooImprecise {
                accuracy: 150.0,
                threshold: 100.0
            })
        );
        assert_eq!(h.store.count_samples().unwrap(), 0);
    }

    #[test]
    fn test_accuracy_at_threshold_is_accepted() {
        let mut h = harness();
        let outcome = h.collector.on_fixes_received(&[fix_at(london(), 100.0)]).unwrap();
        assert!(matches!(outcome, FixOutcome::Accepted { .. }));
    }

    #[test]
    fn test_negative_and_nan_accuracy_rejected() {
        let h = harness();
        assert!(matches!(
            h.collector.validate_fix(&fix_at(london(), -1.0), None),
            Err(RejectReason::NegativeAccuracy { .. })
        ));
        assert!(matches!(
            h.collector.validate_fix(&fix_at(london(), f64::NAN), None),
            Err(RejectReason::NegativeAccuracy { .. })
        ));
    }

    #[test]
    fn test_out_of_range_coordinate_rejected() {
        let h = harness();
        let bad = Coordinate {
            latitude: 95.0,
            longitude: 0.0,
        };
        assert_eq!(
            h.collector.validate_fix(&fix_at(bad, 5.0), None),
            Err(RejectReason::InvalidCoordinate)
        );
    }

    #[test]
    fn test_movement_threshold() {
        let mut h = harness();
        h.collector.on_fixes_received(&[fix_at(london(), 10.0)]).unwrap();

        let near = destination(&london(), 90.0, 99.0);
        let outcome = h.collector.on_fixes_received(&[fix_at(near, 10.0)]).unwrap();
        assert!(matches!(
            outcome,
            FixOutcome::Rejected(RejectReason::TooClose { .. })
        ));
        assert_eq!(h.store.count_samples().unwrap(), 1);

        let far = destination(&london(), 90.0, 101.0);
        let outcome = h.collector.on_fixes_received(&[fix_at(far, 10.0)]).unwrap();
        assert!(matches!(outcome, FixOutcome::Accepted { .. }));
        assert_eq!(h.store.count_samples().unwrap(), 2);
    }

    #[test]
    fn test_just_over_100m_north_is_accepted() {
        let mut h = harness();
        h.collector.on_fixes_received(&[fix_at(london(), 10.0)]).unwrap();

        let north = Coordinate {
            latitude: 51.5009,
            longitude: -0.1,
        };
        let outcome = h.collector.on_fixes_received(&[fix_at(north, 10.0)]).unwrap();
        assert!(matches!(outcome, FixOutcome::Accepted { .. }));
    }

    #[test]
    fn test_only_newest_fix_in_batch_counts() {
        let mut h = harness();
        let older = fix_at(destination(&london(), 0.0, 5_000.0), 10.0);
        let newest = fix_at(london(), 10.0);

        let outcome = h.collector.on_fixes_received(&[older, newest]).unwrap();
        let FixOutcome::Accepted { sample, .. } = outcome else {
            panic!("expected acceptance");
        };
        assert_eq!(sample.coordinate(), london());
        assert_eq!(h.store.count_samples().unwrap(), 1);
    }

    #[test]
    fn test_empty_batch_rejected() {
        let mut h = harness();
        let outcome = h.collector.on_fixes_received(&[]).unwrap();
        assert_eq!(outcome, FixOutcome::Rejected(RejectReason::EmptyBatch));
        assert!(h.service.calls().is_empty());
    }

    #[test]
    fn test_disabled_tracking_rejects() {
        let mut h = harness();
        h.collector.set_tracking_enabled(false);

        let outcome = h.collector.on_fixes_received(&[fix_at(london(), 10.0)]).unwrap();
        assert_eq!(outcome, FixOutcome::Rejected(RejectReason::TrackingDisabled));
        assert_eq!(h.store.count_samples().unwrap(), 0);
    }

    #[test]
    fn test_storage_failure_leaves_region_alone() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("locations.db");
        let writable = Arc::new(Store::open(&path).unwrap());
        let mut h = harness_with_store(writable);
        h.collector.on_fixes_received(&[fix_at(london(), 10.0)]).unwrap();
        let armed = h.rearmer.armed_region().unwrap();

        let read_only = Arc::new(Store::open_read_only(&path).unwrap());
        let health = Arc::new(HealthCounters::new());
        let mut collector = LocationCollector::new(
            read_only,
            h.service.clone(),
            Arc::clone(&h.rearmer),
            NotificationDispatcher::default(),
            Arc::clone(&health),
        );
        h.service.clear_calls();

        let far = destination(&london(), 0.0, 500.0);
        let result = collector.on_fixes_received(&[fix_at(far, 10.0)]);

        assert!(matches!(result, Err(Error::Storage(_))));
        assert_eq!(h.rearmer.armed_region(), Some(armed));
        assert!(h.service.calls().is_empty());
        assert_eq!(health.snapshot(0, None).storage_errors, 1);
    }

    #[test]
    fn test_monitoring_failure_falls_back_to_updates() {
        let mut h = harness();
        h.service.set_fail_monitoring(true);

        let outcome = h.collector.on_fixes_received(&[fix_at(london(), 10.0)]).unwrap();
        assert!(matches!(outcome, FixOutcome::Accepted { region: None, .. }));
        assert!(h.service.is_updating());
        assert_eq!(h.store.count_samples().unwrap(), 1);
    }

    #[test]
    fn test_stationary_user_gets_region_on_last_sample() {
        let mut h = harness();
        h.collector.on_fixes_received(&[fix_at(london(), 10.0)]).unwrap();
        let region = h.rearmer.armed_region().unwrap();

        // Exit arrives but the one-shot fix lands near the old sample.
        h.rearmer.on_region_exit(&region.id);
        let near = destination(&london(), 180.0, 40.0);
        let outcome = h.collector.on_fixes_received(&[fix_at(near, 10.0)]).unwrap();

        assert!(matches!(outcome, FixOutcome::Rejected(_)));
        let rearmed = h.rearmer.armed_region().unwrap();
        assert_eq!(rearmed.center, london());
        assert_ne!(rearmed.id, region.id);
        assert_eq!(h.store.count_samples().unwrap(), 1);
    }

    #[test]
    fn test_imprecise_fix_after_exit_starts_updates() {
        let mut h = harness();
        h.collector.on_fixes_received(&[fix_at(london(), 10.0)]).unwrap();
        let region = h.rearmer.armed_region().unwrap();
        h.rearmer.on_region_exit(&region.id);

        h.collector.on_fixes_received(&[fix_at(london(), 500.0)]).unwrap();
        assert!(h.service.is_updating());
        assert_eq!(h.rearmer.state(), RegionState::Unarmed { pending_fix: true });
    }

    #[test]
    fn test_disable_disarms_and_stops_updates() {
        let mut h = harness();
        h.collector.activate(TrackingPreferences::default());
        assert!(h.service.is_updating());

        h.collector.on_fixes_received(&[fix_at(london(), 10.0)]).unwrap();
        assert!(h.rearmer.armed_region().is_some());

        h.collector.set_tracking_enabled(false);
        assert!(h.rearmer.armed_region().is_none());
        assert!(!h.service.is_updating());
        assert!(h.service.monitored_regions().is_empty());
    }

    #[test]
    fn test_preferences_reconfigure_service() {
        let mut h = harness();
        h.collector.apply_preferences(TrackingPreferences {
            desired_accuracy_meters: 25.0,
            min_distance_meters: 10.0,
            enabled: true,
        });

        assert_eq!(
            h.service.calls(),
            vec![ServiceCall::Configure {
                desired_accuracy_meters: 25.0,
                distance_filter_meters: 10.0,
            }]
        );
        let outcome = h.collector.on_fixes_received(&[fix_at(london(), 30.0)]).unwrap();
        assert!(matches!(
            outcome,
            FixOutcome::Rejected(RejectReason::TooImprecise { .. })
        ));
    }
}

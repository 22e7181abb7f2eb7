//! Single moving geofence.
//!
//! [`RegionReArmer`] keeps at most one exit region armed around the most
//! recent accepted sample. Swapping regions holds one lock across the
//! platform's stop and start calls so no observer can see two regions
//! registered at once.
//!
//! ```text
//!            rearm(center)               exit(current id)
//!  Unarmed ───────────────▶ Armed(r) ─────────────────────▶ Unarmed{pending_fix}
//!     ▲                       │  ▲                                  │
//!     │       disarm()        │  └──────── rearm(new center) ───────┘
//!     └───────────────────────┘
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use rumpel_types::{Coordinate, MonitoredRegion, RegionId};

use crate::error::RegionMonitoringError;
use crate::traits::LocationService;

/// Current geofence state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RegionState {
    /// No region is registered.
    Unarmed {
        /// A one-shot fix was requested after an exit and has not been
        /// accepted yet.
        pending_fix: bool,
    },
    /// Exactly one region is registered with the platform.
    Armed { region: MonitoredRegion },
}

/// Result of handling a region exit callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The armed region was left and a fresh fix was requested.
    FixRequested,
    /// The callback named a region that is no longer armed. Ignored.
    Stale,
}

#[derive(Debug)]
struct Inner {
    state: RegionState,
    next_id: u64,
}

/// Arms, swaps and disarms the single exit region.
pub struct RegionReArmer {
    service: Arc<dyn LocationService>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for RegionReArmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionReArmer")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl RegionReArmer {
    /// Create an unarmed re-armer driving `service`.
    pub fn new(service: Arc<dyn LocationService>) -> Self {
        Self {
            service,
            inner: Mutex::new(Inner {
                state: RegionState::Unarmed { pending_fix: false },
                next_id: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace any armed region with a new one centered on `center`.
    ///
    /// If the platform refuses the new region the re-armer ends up unarmed
    /// and the caller is expected to fall back to continuous updates.
    pub fn rearm(&self, center: Coordinate) -> Result<MonitoredRegion, RegionMonitoringError> {
        let mut inner = self.lock();

        if let RegionState::Armed { region } = inner.state {
            self.service.stop_monitoring(&region.id);
            debug!("Stopped monitoring {}", region.id);
        }

        inner.next_id += 1;
        let region = MonitoredRegion::new(RegionId(inner.next_id), center, OffsetDateTime::now_utc());

        match self.service.start_monitoring(&region) {
            Ok(()) => {
                inner.state = RegionState::Armed { region };
                info!("Armed {} around {}", region.id, center);
                Ok(region)
            }
            Err(e) => {
                inner.state = RegionState::Unarmed { pending_fix: false };
                warn!("Failed to arm {}: {}", region.id, e);
                Err(e)
            }
        }
    }

    /// Handle an exit callback for `id`.
    ///
    /// Only the currently armed region counts. Exits for regions that were
    /// already swapped out are stale and change nothing.
    pub fn on_region_exit(&self, id: &RegionId) -> ExitOutcome {
        let mut inner = self.lock();

        match inner.state {
            RegionState::Armed { region } if region.id == *id => {
                self.service.stop_monitoring(&region.id);
                inner.state = RegionState::Unarmed { pending_fix: true };
                self.service.request_location();
                info!("Left {}, requested a fresh fix", region.id);
                ExitOutcome::FixRequested
            }
            _ => {
                debug!("Ignoring exit for stale region {}", id);
                ExitOutcome::Stale
            }
        }
    }

    /// Stop monitoring whatever is armed. Returns the disarmed region's id.
    pub fn disarm(&self) -> Option<RegionId> {
        let mut inner = self.lock();
        let previous = match inner.state {
            RegionState::Armed { region } => {
                self.service.stop_monitoring(&region.id);
                info!("Disarmed {}", region.id);
                Some(region.id)
            }
            RegionState::Unarmed { .. } => None,
        };
        inner.state = RegionState::Unarmed { pending_fix: false };
        previous
    }

    /// Current state.
    pub fn state(&self) -> RegionState {
        self.lock().state
    }

    /// The armed region, if any.
    pub fn armed_region(&self) -> Option<MonitoredRegion> {
        match self.lock().state {
            RegionState::Armed { region } => Some(region),
            RegionState::Unarmed { .. } => None,
        }
    }
}

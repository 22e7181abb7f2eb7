//! [`LocationService`] backed by the host app.
//!
//! The bridge cannot touch the OS location API itself. Every request the
//! core makes is published as a [`HostCommand`] which the host picks up
//! over the WebSocket and replays against the real platform. Region
//! bookkeeping is mirrored locally so the bridge can enforce the platform
//! limit and report what should currently be monitored.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use rumpel_core::{LocationService, MonitoredRegion, RegionId, RegionMonitoringError};

/// Regions the bridge lets the host monitor at once.
pub const MAX_MONITORED_REGIONS: usize = 20;

/// A request for the host's OS location service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum HostCommand {
    Configure {
        desired_accuracy_meters: f64,
        distance_filter_meters: f64,
    },
    StartUpdating,
    StopUpdating,
    RequestLocation,
    StartMonitoring { region: MonitoredRegion },
    StopMonitoring { region_id: RegionId },
}

/// Publishes location service calls as [`HostCommand`]s.
#[derive(Debug)]
pub struct BridgeLocationService {
    commands: broadcast::Sender<HostCommand>,
    monitored: Mutex<Vec<MonitoredRegion>>,
}

impl BridgeLocationService {
    pub fn new(commands: broadcast::Sender<HostCommand>) -> Self {
        Self {
            commands,
            monitored: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to host commands.
    pub fn subscribe(&self) -> broadcast::Receiver<HostCommand> {
        self.commands.subscribe()
    }

    /// Regions the host should currently be monitoring.
    pub fn monitored_regions(&self) -> Vec<MonitoredRegion> {
        self.monitored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, command: HostCommand) {
        debug!("Host command: {:?}", command);
        // Ignore error if no host is connected
        let _ = self.commands.send(command);
    }
}

impl LocationService for BridgeLocationService {
    fn configure(&self, desired_accuracy_meters: f64, distance_filter_meters: f64) {
        self.publish(HostCommand::Configure {
            desired_accuracy_meters,
            distance_filter_meters,
        });
    }

    fn start_updating(&self) {
        self.publish(HostCommand::StartUpdating);
    }

    fn stop_updating(&self) {
        self.publish(HostCommand::StopUpdating);
    }

    fn request_location(&self) {
        self.publish(HostCommand::RequestLocation);
    }

    fn start_monitoring(&self, region: &MonitoredRegion) -> Result<(), RegionMonitoringError> {
        let mut monitored = self.monitored.lock().unwrap_or_else(PoisonError::into_inner);
        if monitored.len() >= MAX_MONITORED_REGIONS {
            return Err(RegionMonitoringError::LimitReached(MAX_MONITORED_REGIONS));
        }
        monitored.push(*region);
        self.publish(HostCommand::StartMonitoring { region: *region });
        Ok(())
    }

    fn stop_monitoring(&self, id: &RegionId) {
        self.monitored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|r| r.id != *id);
        self.publish(HostCommand::StopMonitoring { region_id: *id });
    }
}

//! Error types for rumpel-core.
//!
//! Most failures inside the tracking core are absorbed into outcomes
//! ([`crate::FixOutcome`], [`crate::SyncOutcome`]) and surfaced through
//! notifications and [`crate::SyncHealth`]: a refused region shows up as
//! [`RegionMonitoringError`] in [`crate::CoreNotification::MonitoringDegraded`],
//! a failed upload as [`NetworkError`] or [`crate::SyncFailure::AuthExpired`]
//! in [`crate::SyncOutcome::Failed`]. [`Error`] is what the public entry
//! points return when the caller has to react.
//!
//! ## Recovery
//!
//! | Error | Strategy |
//! |-------|----------|
//! | [`Error::Storage`] | The fix is lost. Later fixes keep working if the store recovers |
//! | [`Error::ChannelClosed`] | The core has shut down. Restart it |

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur in the tracking core.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The local store could not complete an operation.
    #[error("Storage error: {0}")]
    Storage(#[from] rumpel_store::Error),

    /// The core's event loop is no longer running.
    #[error("Tracking core is not running")]
    ChannelClosed,
}

/// Transport-level upload failures.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
#[non_exhaustive]
pub enum NetworkError {
    /// The request could not be sent or the connection broke.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The transport gave up waiting for a response.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The configured endpoint is not a usable URL.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Failures reported by the platform's region monitor.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
#[non_exhaustive]
pub enum RegionMonitoringError {
    /// The per-app limit on monitored regions has been reached.
    #[error("Region monitoring limit of {0} reached")]
    LimitReached(usize),

    /// Region monitoring is unavailable or not authorized.
    #[error("Region monitoring unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias using rumpel-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RegionMonitoringError::LimitReached(20);
        assert_eq!(err.to_string(), "Region monitoring limit of 20 reached");

        let err = NetworkError::Timeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "Request timed out after 5s");

        assert_eq!(Error::ChannelClosed.to_string(), "Tracking core is not running");
    }

    #[test]
    fn test_store_error_converts() {
        let err: Error = rumpel_store::Error::InvalidSample("bad".into()).into();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[test]
    fn test_network_error_serializes_tagged() {
        let json = serde_json::to_value(NetworkError::Transport("reset".into())).unwrap();
        assert_eq!(json["kind"], "transport");
        assert_eq!(json["detail"], "reset");
    }
}

//! Platform-agnostic location types for the Rumpel tracking pipeline.
//!
//! This crate provides the value types shared by the local store
//! (rumpel-store), the tracking core (rumpel-core) and the host bridge
//! (rumpel-service).
//!
//! # Features
//!
//! - Coordinates and great-circle distance
//! - Raw OS fixes and persisted location samples
//! - Monitored region descriptors with host-visible identifiers
//! - Tracking preferences
//!
//! # Example
//!
//! ```
//! use rumpel_types::{Coordinate, RawFix, LocationSample};
//! use time::OffsetDateTime;
//!
//! let fix = RawFix::new(51.5, -0.1, 10.0, OffsetDateTime::now_utc());
//! let sample = LocationSample::from_fix(&fix);
//! assert!(!sample.is_synced());
//! assert_eq!(sample.coordinate(), Coordinate { latitude: 51.5, longitude: -0.1 });
//! ```

pub mod error;
pub mod geo;
pub mod types;

pub use error::{CoordinateError, ParseError, ParseResult};
pub use types::{
    Coordinate, LocationSample, MonitoredRegion, REGION_RADIUS_METERS, RawFix, RegionId,
    TrackingPreferences,
};

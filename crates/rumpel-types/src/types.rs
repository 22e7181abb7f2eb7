//! Core types for location tracking.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{CoordinateError, ParseError};
use crate::geo;

/// Radius of every monitored region, in meters.
pub const REGION_RADIUS_METERS: f64 = 150.0;

/// A WGS-84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Coordinate {
    /// Latitude in degrees, positive north.
    pub latitude: f64,
    /// Longitude in degrees, positive east.
    pub longitude: f64,
}

impl Coordinate {
    /// Create a coordinate, checking that both components are in range.
    ///
    /// # Examples
    ///
    /// ```
    /// use rumpel_types::Coordinate;
    ///
    /// assert!(Coordinate::new(51.5, -0.1).is_ok());
    /// assert!(Coordinate::new(91.0, 0.0).is_err());
    /// assert!(Coordinate::new(0.0, f64::NAN).is_err());
    /// ```
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoordinateError> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(CoordinateError::InvalidLatitude(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(CoordinateError::InvalidLongitude(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Whether both components are finite and in range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        Self::new(self.latitude, self.longitude).is_ok()
    }

    /// Great-circle distance to `other` in meters.
    #[must_use]
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        geo::haversine_distance(self, other)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// A single location reading as delivered by the OS location service.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RawFix {
    /// Reported position.
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub coordinate: Coordinate,
    /// Horizontal accuracy radius in meters. Negative means the fix is invalid.
    pub horizontal_accuracy: f64,
    /// When the OS captured the fix.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
}

impl RawFix {
    /// Create a fix from raw components.
    pub fn new(
        latitude: f64,
        longitude: f64,
        horizontal_accuracy: f64,
        timestamp: OffsetDateTime,
    ) -> Self {
        Self {
            coordinate: Coordinate {
                latitude,
                longitude,
            },
            horizontal_accuracy,
            timestamp,
        }
    }
}

/// A persisted location sample.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LocationSample {
    /// Insertion-ordered primary key. Zero until the store assigns one.
    pub sequence_id: i64,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Horizontal accuracy in meters (never negative once stored).
    pub horizontal_accuracy: f64,
    /// When the fix was captured, to the millisecond.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub captured_at: OffsetDateTime,
    /// When the sample was confirmed uploaded, if ever.
    #[cfg_attr(
        feature = "serde",
        serde(default, with = "time::serde::rfc3339::option")
    )]
    pub synced_at: Option<OffsetDateTime>,
}

impl LocationSample {
    /// Create an unsynced sample from an accepted fix.
    ///
    /// The capture time is truncated to whole milliseconds, the resolution
    /// samples are persisted at.
    pub fn from_fix(fix: &RawFix) -> Self {
        Self {
            sequence_id: 0, // Assigned by the store
            latitude: fix.coordinate.latitude,
            longitude: fix.coordinate.longitude,
            horizontal_accuracy: fix.horizontal_accuracy,
            captured_at: truncate_to_millis(fix.timestamp),
            synced_at: None,
        }
    }

    /// Position of this sample.
    #[must_use]
    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    /// Whether the sample has been uploaded.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.synced_at.is_some()
    }
}

fn truncate_to_millis(time: OffsetDateTime) -> OffsetDateTime {
    time.replace_millisecond(time.millisecond()).unwrap_or(time)
}

/// Identifier of a monitored region.
///
/// Rendered as `rumpel.region.<n>`, which is the identifier handed to the OS
/// and echoed back in region-exit callbacks.
///
/// ```
/// use rumpel_types::RegionId;
///
/// let id: RegionId = "rumpel.region.7".parse().unwrap();
/// assert_eq!(id, RegionId(7));
/// assert_eq!(id.to_string(), "rumpel.region.7");
/// assert!("region-7".parse::<RegionId>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "String", into = "String")
)]
pub struct RegionId(pub u64);

const REGION_ID_PREFIX: &str = "rumpel.region.";

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", REGION_ID_PREFIX, self.0)
    }
}

impl FromStr for RegionId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(REGION_ID_PREFIX)
            .and_then(|n| n.parse().ok())
            .map(RegionId)
            .ok_or_else(|| ParseError::InvalidRegionId(s.to_string()))
    }
}

impl TryFrom<String> for RegionId {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RegionId> for String {
    fn from(id: RegionId) -> Self {
        id.to_string()
    }
}

/// A circular exit-only geofence around the last accepted fix.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MonitoredRegion {
    /// Region identifier.
    pub id: RegionId,
    /// Center of the circle.
    pub center: Coordinate,
    /// Radius in meters.
    pub radius_meters: f64,
    /// When the region was armed.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub armed_at: OffsetDateTime,
}

impl MonitoredRegion {
    /// Create a region with the standard radius.
    pub fn new(id: RegionId, center: Coordinate, armed_at: OffsetDateTime) -> Self {
        Self {
            id,
            center,
            radius_meters: REGION_RADIUS_METERS,
            armed_at,
        }
    }

    /// Whether `point` lies inside the circle.
    #[must_use]
    pub fn contains(&self, point: &Coordinate) -> bool {
        self.center.distance_to(point) <= self.radius_meters
    }
}

/// User-controlled tracking settings.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct TrackingPreferences {
    /// Fixes less accurate than this (meters) are discarded.
    pub desired_accuracy_meters: f64,
    /// Distance filter handed to the OS location service, in meters.
    pub min_distance_meters: f64,
    /// Whether tracking is enabled.
    pub enabled: bool,
}

impl Default for TrackingPreferences {
    fn default() -> Self {
        Self {
            desired_accuracy_meters: 100.0,
            min_distance_meters: 50.0,
            enabled: true,
        }
    }
}

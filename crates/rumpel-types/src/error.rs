//! Error types for rumpel-types.

use thiserror::Error;

/// Errors raised when constructing location values.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum CoordinateError {
    /// Latitude outside of -90..=90 degrees.
    #[error("Latitude {0} is outside -90..=90 degrees")]
    InvalidLatitude(f64),

    /// Longitude outside of -180..=180 degrees.
    #[error("Longitude {0} is outside -180..=180 degrees")]
    InvalidLongitude(f64),
}

/// Errors raised when parsing identifiers delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Region identifier not in the `rumpel.region.<n>` form.
    #[error("Invalid region identifier: {0}")]
    InvalidRegionId(String),
}

/// Result type alias using rumpel-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;

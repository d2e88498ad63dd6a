//! Geospatial types and the nearest-provider query seam.
//!
//! The core does not own a spatial index. Production deployments answer the
//! nearest-provider query with a database-side geo index; tests answer it with
//! an in-memory scan. Both sit behind [`GeoIndex`], which returns candidates
//! ordered nearest-first by great-circle distance.
//!
//! Results are a snapshot of last-reported locations: a provider returned as
//! available may have gone unavailable a moment later. Callers must treat the
//! candidate list as advisory and rely on the lock-acquire conflict path for
//! correctness, never on the index.

use crate::types::{ProviderSummary, ServiceTag};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Mean Earth radius in meters, as used by the haversine formula.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A geographic point as `(longitude, latitude)` in degrees.
///
/// Field order follows the GeoJSON convention (longitude first), which is also
/// how booking locations are stored upstream.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Longitude in degrees, range [-180, 180]
    pub longitude: f64,
    /// Latitude in degrees, range [-90, 90]
    pub latitude: f64,
}

impl GeoPoint {
    /// Creates a new `GeoPoint` from longitude and latitude in degrees.
    #[must_use]
    pub const fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// Great-circle distance to `other` in meters (haversine).
    ///
    /// Distance ordering for candidate ranking uses this, not Euclidean
    /// distance on raw coordinates.
    #[must_use]
    pub fn distance_m(&self, other: &Self) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_M * c
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.longitude, self.latitude)
    }
}

/// A service location: geographic point plus free-text address.
///
/// Immutable once attached to a booking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// Geographic point (longitude, latitude)
    pub point: GeoPoint,
    /// Human-readable address
    pub address: String,
}

impl Location {
    /// Creates a new `Location`
    #[must_use]
    pub const fn new(point: GeoPoint, address: String) -> Self {
        Self { point, address }
    }
}

/// Predicate filter applied to candidates before ranking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFilter {
    /// Only providers offering this service tag
    pub service: ServiceTag,
    /// Require the provider's advisory availability flag
    pub require_available: bool,
    /// Require the provider to be verified
    pub require_verified: bool,
}

impl CandidateFilter {
    /// Filter used by emergency dispatch: verified, available, offers the tag.
    #[must_use]
    pub const fn emergency(service: ServiceTag) -> Self {
        Self {
            service,
            require_available: true,
            require_verified: true,
        }
    }
}

/// Errors from the geo index.
#[derive(Error, Debug)]
pub enum GeoIndexError {
    /// The underlying index/query backend failed.
    #[error("geo query failed: {0}")]
    QueryFailed(String),
}

/// Spatial query capability over provider current-location points.
///
/// Implementations must return candidates ordered nearest-first by
/// great-circle distance from `origin`, filtered by `filter`, and never
/// farther than `max_distance_m`.
///
/// # Freshness
///
/// No guarantee beyond "last reported location". Stale availability is
/// expected and tolerated by callers (see module docs).
#[async_trait::async_trait]
pub trait GeoIndex: Send + Sync {
    /// Find up to `limit` matching providers, nearest first.
    ///
    /// # Errors
    ///
    /// Returns [`GeoIndexError`] if the underlying query backend fails.
    /// An empty result is not an error.
    async fn find_candidates(
        &self,
        origin: GeoPoint,
        max_distance_m: f64,
        filter: &CandidateFilter,
        limit: usize,
    ) -> Result<Vec<ProviderSummary>, GeoIndexError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn distance_between_known_cities() {
        // Bangalore to Mumbai, roughly 845 km
        let bangalore = GeoPoint::new(77.5946, 12.9716);
        let mumbai = GeoPoint::new(72.8777, 19.0760);

        let d = bangalore.distance_m(&mumbai);
        assert!(d > 795_000.0, "distance {d} too small");
        assert!(d < 895_000.0, "distance {d} too large");
    }

    #[test]
    fn distance_to_self_is_zero() {
        let p = GeoPoint::new(77.5946, 12.9716);
        assert!(p.distance_m(&p).abs() < 1e-6);
    }

    #[test]
    fn distance_handles_negative_coordinates() {
        let a = GeoPoint::new(-77.5946, -12.9716);
        let b = GeoPoint::new(-72.8777, -19.0760);
        assert!(a.distance_m(&b) > 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = GeoPoint::new(2.3522, 48.8566);
        let b = GeoPoint::new(-0.1278, 51.5074);
        let ab = a.distance_m(&b);
        let ba = b.distance_m(&a);
        assert!((ab - ba).abs() < 1e-6);
    }
}

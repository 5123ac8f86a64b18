//! Scalar values and timestamped readings

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::Timestamp;

/// A geographic coordinate in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Mean Earth radius in meters
    pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance to `other` in meters (haversine formula)
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lon = (other.lon - self.lon).to_radians();

        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        Self::EARTH_RADIUS_M * c
    }
}

/// A single sensor or constant value
///
/// Integers are listed before doubles so that untagged deserialization keeps
/// `5` an integer and `5.5` a double.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Double(f64),
    Text(String),
    Geo(GeoPoint),
}

impl Scalar {
    /// Short name of the value kind, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Scalar::Int(_) => "integer",
            Scalar::Double(_) => "double",
            Scalar::Text(_) => "string",
            Scalar::Geo(_) => "geo",
        }
    }

    /// Numeric view of the value, None for strings and coordinates
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Scalar::Int(_) | Scalar::Double(_))
    }

    /// Whether `self` and `other` can be ordered against each other
    pub fn is_comparable_with(&self, other: &Scalar) -> bool {
        matches!(
            (self, other),
            (Scalar::Int(_) | Scalar::Double(_), Scalar::Int(_) | Scalar::Double(_))
                | (Scalar::Text(_), Scalar::Text(_))
                | (Scalar::Geo(_), Scalar::Geo(_))
        )
    }
}

impl PartialOrd for Scalar {
    /// Natural order: numbers numerically (integers and doubles mix), strings
    /// lexically, coordinates by latitude then longitude. Mixed kinds and NaN
    /// are unordered.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Int(a), Scalar::Int(b)) => Some(a.cmp(b)),
            (Scalar::Text(a), Scalar::Text(b)) => Some(a.cmp(b)),
            (Scalar::Geo(a), Scalar::Geo(b)) => match a.lat.partial_cmp(&b.lat)? {
                Ordering::Equal => a.lon.partial_cmp(&b.lon),
                ord => Some(ord),
            },
            (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Double(d) => write!(f, "{d}"),
            Scalar::Text(s) => write!(f, "{s}"),
            Scalar::Geo(g) => write!(f, "({}, {})", g.lat, g.lon),
        }
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Double(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

impl From<GeoPoint> for Scalar {
    fn from(v: GeoPoint) -> Self {
        Scalar::Geo(v)
    }
}

/// A value observed at a point in time
///
/// Readings are immutable once created. An optional expiry marks the instant
/// after which the reading no longer describes the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedValue {
    pub value: Scalar,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<Timestamp>,
}

impl TimestampedValue {
    pub fn new(value: impl Into<Scalar>, timestamp: Timestamp) -> Self {
        Self {
            value: value.into(),
            timestamp,
            expire_at: None,
        }
    }

    /// Set an expiry instant
    pub fn expiring_at(mut self, expire_at: Timestamp) -> Self {
        self.expire_at = Some(expire_at);
        self
    }

    /// Whether the reading has expired at `now`
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expire_at.is_some_and(|at| at <= now)
    }

    /// Compare by value only
    pub fn cmp_value(&self, other: &TimestampedValue) -> Option<Ordering> {
        self.value.partial_cmp(&other.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_deserialize_untagged() {
        let v: Scalar = serde_json::from_str("5").unwrap();
        assert_eq!(v, Scalar::Int(5));

        let v: Scalar = serde_json::from_str("5.5").unwrap();
        assert_eq!(v, Scalar::Double(5.5));

        let v: Scalar = serde_json::from_str("\"home\"").unwrap();
        assert_eq!(v, Scalar::Text("home".to_string()));

        let v: Scalar = serde_json::from_str(r#"{"lat": 52.5, "lon": 13.4}"#).unwrap();
        assert_eq!(v, Scalar::Geo(GeoPoint::new(52.5, 13.4)));
    }

    #[test]
    fn test_scalar_ordering() {
        assert!(Scalar::Int(3) < Scalar::Double(3.5));
        assert!(Scalar::from("abc") < Scalar::from("abd"));
        assert_eq!(Scalar::Int(1).partial_cmp(&Scalar::from("1")), None);
        assert_eq!(Scalar::Double(f64::NAN).partial_cmp(&Scalar::Int(1)), None);
        assert!(Scalar::Geo(GeoPoint::new(1.0, 5.0)) < Scalar::Geo(GeoPoint::new(1.0, 6.0)));
    }

    #[test]
    fn test_comparable_kinds() {
        assert!(Scalar::Int(1).is_comparable_with(&Scalar::Double(2.0)));
        assert!(!Scalar::Int(1).is_comparable_with(&Scalar::from("x")));
        assert!(!Scalar::from("x").is_comparable_with(&Scalar::Geo(GeoPoint::new(0.0, 0.0))));
    }

    #[test]
    fn test_geo_distance() {
        // Berlin to Paris is roughly 878 km
        let berlin = GeoPoint::new(52.5200, 13.4050);
        let paris = GeoPoint::new(48.8566, 2.3522);
        let d = berlin.distance_to(&paris);
        assert!((d - 877_500.0).abs() < 5_000.0, "distance was {d}");
        assert_eq!(berlin.distance_to(&berlin), 0.0);
    }

    #[test]
    fn test_expiry() {
        let v = TimestampedValue::new(1, Timestamp::from_millis(0))
            .expiring_at(Timestamp::from_millis(100));
        assert!(!v.is_expired(Timestamp::from_millis(99)));
        assert!(v.is_expired(Timestamp::from_millis(100)));
        assert!(!TimestampedValue::new(1, Timestamp::ZERO).is_expired(Timestamp::MAX));
    }
}

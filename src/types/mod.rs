pub mod trip;

pub use trip::*;

use chrono::{DateTime, Utc};
use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};

/// Meters per second to miles per hour
pub const MPS_TO_MPH: f64 = 2.236_936_292;

pub fn mps_to_mph(mps: f64) -> f64 {
    mps * MPS_TO_MPH
}

pub fn mph_to_mps(mph: f64) -> f64 {
    mph / MPS_TO_MPH
}

/// WGS84 position in degrees
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Finite and inside [-90, 90] x [-180, 180]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance in meters
    pub fn distance_m(&self, other: &Coordinate) -> f64 {
        self.to_point().haversine_distance(&other.to_point())
    }

    /// geo crate uses Point(lon, lat)
    pub fn to_point(&self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }
}

/// Accelerometer reading in g
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InertialVector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl InertialVector {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn vertical(&self) -> f64 {
        self.z.abs()
    }
}

/// Accelerometer reading from the inertial stream, delivered independently of fixes
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InertialReading {
    pub timestamp: DateTime<Utc>,
    pub vector: InertialVector,
}

/// One positional fix, optionally carrying inertial data
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub coordinate: Coordinate,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
    /// Meters per second, negative means unknown
    #[serde(default)]
    pub speed: Option<f64>,
    /// Degrees, -1 means unknown
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub inertial: Option<InertialVector>,
}

impl Sample {
    pub fn new(coordinate: Coordinate, timestamp: DateTime<Utc>) -> Self {
        Self {
            coordinate,
            timestamp,
            accuracy: None,
            altitude: None,
            speed: None,
            heading: None,
            inertial: None,
        }
    }

    pub fn with_speed_mps(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_speed_mph(mut self, speed: f64) -> Self {
        self.speed = Some(mph_to_mps(speed));
        self
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn with_inertial(mut self, inertial: InertialVector) -> Self {
        self.inertial = Some(inertial);
        self
    }

    /// Speed in m/s when reported and non-negative
    pub fn speed_mps(&self) -> Option<f64> {
        self.speed.filter(|s| s.is_finite() && *s >= 0.0)
    }

    pub fn speed_mph(&self) -> Option<f64> {
        self.speed_mps().map(mps_to_mph)
    }

    /// Heading in degrees when reported and non-negative
    pub fn valid_heading(&self) -> Option<f64> {
        self.heading.filter(|h| h.is_finite() && *h >= 0.0)
    }
}

use super::{Confidence, LimitSource, SpeedLimitResult, SpeedLimitTier, TierQuery};
use crate::types::Coordinate;
use geo::{Coord, EuclideanDistance, LineString, Point};
use serde::{Deserialize, Serialize};

const KM_PER_DEGREE: f64 = 111.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AreaBucket {
    Highway,
    Urban,
    Suburban,
    Rural,
}

impl AreaBucket {
    pub fn limit_mph(&self) -> u32 {
        match self {
            AreaBucket::Highway => 65,
            AreaBucket::Urban => 30,
            AreaBucket::Suburban => 40,
            AreaBucket::Rural => 55,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Metro {
    pub name: String,
    pub center: Coordinate,
    pub core_radius_km: f64,
}

/// Highway alignment as a polyline of (lat, lon) waypoints
#[derive(Clone, Debug)]
pub struct Corridor {
    pub name: String,
    pub path: LineString<f64>,
}

impl Corridor {
    pub fn new(name: &str, waypoints: &[(f64, f64)]) -> Self {
        let coords: Vec<Coord<f64>> = waypoints
            .iter()
            .map(|&(lat, lon)| Coord { x: lon, y: lat })
            .collect();
        Corridor {
            name: name.to_string(),
            path: LineString::new(coords),
        }
    }

    /// Approximate distance in km on a local plane around `coordinate`
    ///
    /// Longitude is scaled by cos(lat) so east-west offsets are not
    /// overstated away from the equator.
    pub fn distance_km(&self, coordinate: &Coordinate) -> f64 {
        let lon_scale = coordinate.latitude.to_radians().cos() * KM_PER_DEGREE;
        let project = |c: &Coord<f64>| Coord {
            x: c.x * lon_scale,
            y: c.y * KM_PER_DEGREE,
        };

        let path: LineString<f64> = self.path.coords().map(project).collect();
        let point = Point::from(project(&Coord {
            x: coordinate.longitude,
            y: coordinate.latitude,
        }));
        point.euclidean_distance(&path)
    }
}

/// Coarse urban/suburban/highway/rural estimate from proximity to known places
///
/// Returns nothing outside `max_range_km` of every metro so no limit is
/// invented for unknown territory.
pub struct RegionalEstimator {
    metros: Vec<Metro>,
    corridors: Vec<Corridor>,
    corridor_width_km: f64,
    suburban_factor: f64,
    max_range_km: f64,
}

impl RegionalEstimator {
    pub fn new(metros: Vec<Metro>, corridors: Vec<Corridor>) -> Self {
        RegionalEstimator {
            metros,
            corridors,
            corridor_width_km: 0.5,
            suburban_factor: 2.5,
            max_range_km: 150.0,
        }
    }

    pub fn bucket(&self, coordinate: &Coordinate) -> Option<AreaBucket> {
        if self
            .corridors
            .iter()
            .any(|c| c.distance_km(coordinate) <= self.corridor_width_km)
        {
            return Some(AreaBucket::Highway);
        }

        let (metro, distance_km) = self
            .metros
            .iter()
            .map(|m| (m, m.center.distance_m(coordinate) / 1000.0))
            .min_by(|a, b| a.1.total_cmp(&b.1))?;

        if distance_km <= metro.core_radius_km {
            Some(AreaBucket::Urban)
        } else if distance_km <= metro.core_radius_km * self.suburban_factor {
            Some(AreaBucket::Suburban)
        } else if distance_km <= self.max_range_km {
            Some(AreaBucket::Rural)
        } else {
            None
        }
    }
}

fn metro(name: &str, lat: f64, lon: f64, core_radius_km: f64) -> Metro {
    Metro {
        name: name.to_string(),
        center: Coordinate::new(lat, lon),
        core_radius_km,
    }
}

impl Default for RegionalEstimator {
    fn default() -> Self {
        let metros = vec![
            metro("San Francisco", 37.7749, -122.4194, 10.0),
            metro("San Jose", 37.3382, -121.8863, 12.0),
            metro("Los Angeles", 34.0522, -118.2437, 25.0),
            metro("Seattle", 47.6062, -122.3321, 12.0),
            metro("New York", 40.7128, -74.0060, 20.0),
            metro("Boston", 42.3601, -71.0589, 10.0),
            metro("Chicago", 41.8781, -87.6298, 18.0),
            metro("Houston", 29.7604, -95.3698, 20.0),
            metro("Atlanta", 33.7490, -84.3880, 15.0),
            metro("Denver", 39.7392, -104.9903, 12.0),
            metro("Phoenix", 33.4484, -112.0740, 20.0),
        ];
        let corridors = vec![
            Corridor::new(
                "US-101 Peninsula",
                &[(37.7680, -122.4050), (37.6000, -122.3800), (37.4400, -122.1600), (37.3700, -121.9300)],
            ),
            Corridor::new(
                "I-80 Bay Area",
                &[(37.8250, -122.3130), (38.0170, -122.2500), (38.5816, -121.4944)],
            ),
        ];
        Self::new(metros, corridors)
    }
}

impl SpeedLimitTier for RegionalEstimator {
    fn source(&self) -> LimitSource {
        LimitSource::RegionalEstimate
    }

    fn lookup(&self, query: &TierQuery<'_>) -> Option<SpeedLimitResult> {
        let bucket = self.bucket(&query.coordinate)?;
        Some(SpeedLimitResult {
            speed_limit_mph: bucket.limit_mph(),
            confidence: Confidence::VeryLow,
            source: LimitSource::RegionalEstimate,
            road_name: None,
            road_type: None,
            resolved_at: query.now,
        })
    }
}

pub mod cache;
pub mod curated;
pub mod dataset;
pub mod geocode;
pub mod heuristic;
pub mod limit_tree;
pub mod osm_parser;
pub mod regional;
pub mod resolver;

pub use cache::{CacheKey, SpeedLimitCache};
pub use curated::{normalize_road_name, CuratedDatabase, CuratedRoad};
pub use dataset::{load_entries, save_entries};
pub use geocode::{GeocodeError, NominatimGeocoder, ReverseGeocoder};
pub use heuristic::GeocodeHeuristic;
pub use limit_tree::{CrowdSourcedIndex, SpeedLimitEntry};
pub use osm_parser::{parse_maxspeed, parse_osm_maxspeed, RoadClass};
pub use regional::{AreaBucket, Corridor, Metro, RegionalEstimator};
pub use resolver::SpeedLimitResolver;

use crate::types::Coordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How far a resolved limit can be trusted
///
/// Ordering follows trust: `High > Medium > Low > VeryLow`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Confidence {
    VeryLow,
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn value(&self) -> f64 {
        match self {
            Confidence::High => 1.0,
            Confidence::Medium => 0.7,
            Confidence::Low => 0.4,
            Confidence::VeryLow => 0.1,
        }
    }
}

/// Which tier produced a result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitSource {
    Curated,
    CrowdSourced,
    Geocoded,
    RegionalEstimate,
}

impl LimitSource {
    /// Cascade position; the cache is tier 1
    pub fn tier(&self) -> u8 {
        match self {
            LimitSource::Curated => 2,
            LimitSource::CrowdSourced => 3,
            LimitSource::Geocoded => 4,
            LimitSource::RegionalEstimate => 5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeedLimitResult {
    pub speed_limit_mph: u32,
    pub confidence: Confidence,
    pub source: LimitSource,
    pub road_name: Option<String>,
    pub road_type: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

/// Road context from a reverse lookup
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoadInfo {
    pub road_name: Option<String>,
    /// OSM highway type when the lookup landed on a road ("residential", "motorway")
    pub road_type: Option<String>,
    /// Named feature at the point (school, hospital, park)
    pub place_name: Option<String>,
    pub locality: Option<String>,
    /// State / province
    pub admin_area: Option<String>,
}

/// Input handed to each tier
pub struct TierQuery<'a> {
    pub coordinate: Coordinate,
    /// Present once the reverse lookup has run and succeeded
    pub road: Option<&'a RoadInfo>,
    pub now: DateTime<Utc>,
}

/// One fallible step of the resolution cascade
pub trait SpeedLimitTier: Send + Sync {
    fn source(&self) -> LimitSource;

    /// Tier consumes `TierQuery::road`; the resolver performs the reverse lookup first
    fn needs_road(&self) -> bool {
        false
    }

    fn lookup(&self, query: &TierQuery<'_>) -> Option<SpeedLimitResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_ordering() {
        assert!(Confidence::High > Confidence::Medium);
        assert!(Confidence::Medium > Confidence::Low);
        assert!(Confidence::Low > Confidence::VeryLow);
        assert_eq!(Confidence::High.value(), 1.0);
        assert_eq!(Confidence::VeryLow.value(), 0.1);
    }

    #[test]
    fn test_tier_order() {
        let mut sources = vec![
            LimitSource::RegionalEstimate,
            LimitSource::Curated,
            LimitSource::Geocoded,
            LimitSource::CrowdSourced,
        ];
        sources.sort_by_key(|s| s.tier());
        assert_eq!(
            sources,
            vec![
                LimitSource::Curated,
                LimitSource::CrowdSourced,
                LimitSource::Geocoded,
                LimitSource::RegionalEstimate
            ]
        );
    }
}

use super::{Confidence, LimitSource, SpeedLimitResult, SpeedLimitTier, TierQuery};
use crate::types::Coordinate;
use rstar::primitives::GeomWithData;
use rstar::RTree;
use serde::{Deserialize, Serialize};

const METERS_PER_DEGREE: f64 = 111_000.0;

/// One posted limit observed at a point
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeedLimitEntry {
    pub coordinate: Coordinate,
    pub speed_limit_mph: u32,
    #[serde(default)]
    pub road_name: Option<String>,
    #[serde(default)]
    pub road_type: Option<String>,
}

/// Indexed point: [lon, lat] like geo's (x, y)
type IndexedEntry = GeomWithData<[f64; 2], SpeedLimitEntry>;

/// R-Tree over crowd-sourced limits for radius queries
///
/// # Usage
/// ```no_run
/// use drive_telemetry::speed_limit::{CrowdSourcedIndex, SpeedLimitEntry};
/// use drive_telemetry::types::Coordinate;
///
/// let entries: Vec<SpeedLimitEntry> = vec![/* ... */];
/// let index = CrowdSourcedIndex::from_entries(entries, 100.0);
///
/// // Nearest limit within 100 m
/// let hit = index.nearest_within(&Coordinate::new(37.7749, -122.4194), 100.0);
/// ```
pub struct CrowdSourcedIndex {
    tree: RTree<IndexedEntry>,
    radius_m: f64,
}

impl CrowdSourcedIndex {
    /// Bulk-load entries; invalid coordinates and zero limits are skipped
    pub fn from_entries(entries: Vec<SpeedLimitEntry>, radius_m: f64) -> Self {
        let total = entries.len();
        let indexed: Vec<IndexedEntry> = entries
            .into_iter()
            .filter(|e| e.coordinate.is_valid() && e.speed_limit_mph > 0)
            .map(|e| GeomWithData::new([e.coordinate.longitude, e.coordinate.latitude], e))
            .collect();

        if indexed.len() < total {
            log::warn!(
                "Skipped {} invalid crowd-sourced entries",
                total - indexed.len()
            );
        }

        CrowdSourcedIndex {
            tree: RTree::bulk_load(indexed),
            radius_m,
        }
    }

    /// Nearest entry within `max_distance_m`, with its great-circle distance
    ///
    /// The tree works in degree space, so the query circle is sized for the
    /// longitude stretch at this latitude and every candidate is confirmed
    /// with haversine.
    pub fn nearest_within(
        &self,
        coordinate: &Coordinate,
        max_distance_m: f64,
    ) -> Option<(&SpeedLimitEntry, f64)> {
        let cos_lat = coordinate.latitude.to_radians().cos().abs().max(0.01);
        let radius_deg = max_distance_m / (METERS_PER_DEGREE * cos_lat);
        let query = [coordinate.longitude, coordinate.latitude];

        self.tree
            .locate_within_distance(query, radius_deg * radius_deg)
            .map(|indexed| (&indexed.data, coordinate.distance_m(&indexed.data.coordinate)))
            .filter(|(_, dist)| *dist <= max_distance_m)
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SpeedLimitTier for CrowdSourcedIndex {
    fn source(&self) -> LimitSource {
        LimitSource::CrowdSourced
    }

    fn lookup(&self, query: &TierQuery<'_>) -> Option<SpeedLimitResult> {
        let (entry, _) = self.nearest_within(&query.coordinate, self.radius_m)?;
        Some(SpeedLimitResult {
            speed_limit_mph: entry.speed_limit_mph,
            confidence: Confidence::Medium,
            source: LimitSource::CrowdSourced,
            road_name: entry.road_name.clone(),
            road_type: entry.road_type.clone(),
            resolved_at: query.now,
        })
    }
}

use super::{Confidence, LimitSource, SpeedLimitResult, SpeedLimitTier, TierQuery};
use crate::error::{Result, TelemetryError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Shortest normalized name allowed to match as a substring
const MIN_SUBSTRING_LEN: usize = 5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CuratedRoad {
    pub name: String,
    pub speed_limit_mph: u32,
    #[serde(default)]
    pub road_type: Option<String>,
    /// State / province the entry applies to; None applies everywhere
    #[serde(default)]
    pub region: Option<String>,
}

/// Canonical form of a road name for matching
///
/// Lowercases, strips punctuation and expands common suffix abbreviations,
/// so "Hwy. 1" and "highway 1" compare equal.
pub fn normalize_road_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .map(|token| match token {
            "st" => "street",
            "ave" | "av" => "avenue",
            "blvd" => "boulevard",
            "rd" => "road",
            "dr" => "drive",
            "ln" => "lane",
            "hwy" => "highway",
            "fwy" => "freeway",
            "pkwy" => "parkway",
            "expy" => "expressway",
            "i" => "interstate",
            other => other,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hand-maintained limits for well-known roads
pub struct CuratedDatabase {
    by_name: HashMap<String, Vec<CuratedRoad>>,
}

impl CuratedDatabase {
    pub fn from_entries(entries: Vec<CuratedRoad>) -> Self {
        let mut by_name: HashMap<String, Vec<CuratedRoad>> = HashMap::new();
        for entry in entries {
            by_name
                .entry(normalize_road_name(&entry.name))
                .or_default()
                .push(entry);
        }
        CuratedDatabase { by_name }
    }

    /// Load a JSON array of `CuratedRoad`
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            TelemetryError::Dataset(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let entries: Vec<CuratedRoad> = serde_json::from_str(&json)
            .map_err(|e| TelemetryError::Dataset(format!("Failed to parse curated roads: {}", e)))?;
        Ok(Self::from_entries(entries))
    }

    pub fn len(&self) -> usize {
        self.by_name.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Exact normalized match first, then the longest curated name contained in the query
    pub fn find(&self, road_name: &str, admin_area: Option<&str>) -> Option<&CuratedRoad> {
        let normalized = normalize_road_name(road_name);
        if normalized.is_empty() {
            return None;
        }

        if let Some(hit) = self
            .by_name
            .get(&normalized)
            .and_then(|candidates| pick_region(candidates, admin_area))
        {
            return Some(hit);
        }

        self.by_name
            .iter()
            .filter(|(key, _)| key.len() >= MIN_SUBSTRING_LEN && contains_words(&normalized, key))
            .filter_map(|(key, candidates)| pick_region(candidates, admin_area).map(|c| (key, c)))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, road)| road)
    }
}

/// Prefer an entry for the caller's region, fall back to a region-less one
fn pick_region<'a>(candidates: &'a [CuratedRoad], admin_area: Option<&str>) -> Option<&'a CuratedRoad> {
    let regional = admin_area.and_then(|area| {
        candidates.iter().find(|c| {
            c.region
                .as_deref()
                .map(|r| r.eq_ignore_ascii_case(area))
                .unwrap_or(false)
        })
    });
    regional.or_else(|| candidates.iter().find(|c| c.region.is_none()))
}

/// Whole-word containment: "interstate 280" is in "interstate 280 north" but not "interstate 2800"
fn contains_words(haystack: &str, needle: &str) -> bool {
    let padded = format!(" {} ", haystack);
    padded.contains(&format!(" {} ", needle))
}

impl SpeedLimitTier for CuratedDatabase {
    fn source(&self) -> LimitSource {
        LimitSource::Curated
    }

    fn needs_road(&self) -> bool {
        true
    }

    fn lookup(&self, query: &TierQuery<'_>) -> Option<SpeedLimitResult> {
        let road = query.road?;
        let name = road.road_name.as_deref()?;
        let curated = self.find(name, road.admin_area.as_deref())?;

        Some(SpeedLimitResult {
            speed_limit_mph: curated.speed_limit_mph,
            confidence: Confidence::High,
            source: LimitSource::Curated,
            road_name: Some(curated.name.clone()),
            road_type: curated.road_type.clone().or_else(|| road.road_type.clone()),
            resolved_at: query.now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speed_limit::RoadInfo;
    use crate::types::Coordinate;
    use chrono::Utc;

    fn road(name: &str, mph: u32, region: Option<&str>) -> CuratedRoad {
        CuratedRoad {
            name: name.to_string(),
            speed_limit_mph: mph,
            road_type: None,
            region: region.map(str::to_string),
        }
    }

    fn database() -> CuratedDatabase {
        CuratedDatabase::from_entries(vec![
            road("I-280", 65, None),
            road("Market St", 25, Some("California")),
            road("Market Street", 30, None),
            road("El Camino Real", 35, None),
            road("Pacific Coast Hwy", 55, None),
        ])
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_road_name("Market St."), "market street");
        assert_eq!(normalize_road_name("  I-280  "), "interstate 280");
        assert_eq!(normalize_road_name("Pacific Coast Hwy"), "pacific coast highway");
        assert_eq!(normalize_road_name("Sunset BLVD"), "sunset boulevard");
        assert_eq!(normalize_road_name("---"), "");
    }

    #[test]
    fn test_exact_match_prefers_region() {
        let db = database();
        assert_eq!(db.find("Market Street", Some("California")).unwrap().speed_limit_mph, 25);
        assert_eq!(db.find("Market Street", Some("Oregon")).unwrap().speed_limit_mph, 30);
        assert_eq!(db.find("market st", None).unwrap().speed_limit_mph, 30);
    }

    #[test]
    fn test_substring_match() {
        let db = database();
        let hit = db.find("Interstate 280 Northbound", None).unwrap();
        assert_eq!(hit.speed_limit_mph, 65);

        let hit = db.find("North El Camino Real", None).unwrap();
        assert_eq!(hit.speed_limit_mph, 35);

        assert!(db.find("Interstate 2800", None).is_none());
        assert!(db.find("Main Street", None).is_none());
    }

    #[test]
    fn test_tier_requires_road_name() {
        let db = database();
        let now = Utc::now();
        let no_road = TierQuery {
            coordinate: Coordinate::new(37.0, -122.0),
            road: None,
            now,
        };
        assert!(db.lookup(&no_road).is_none());

        let info = RoadInfo {
            road_name: Some("Pacific Coast Highway".to_string()),
            road_type: Some("primary".to_string()),
            ..Default::default()
        };
        let query = TierQuery {
            coordinate: Coordinate::new(37.0, -122.0),
            road: Some(&info),
            now,
        };
        let result = db.lookup(&query).unwrap();
        assert_eq!(result.speed_limit_mph, 55);
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.source, LimitSource::Curated);
        assert_eq!(result.road_type.as_deref(), Some("primary"));
        assert!(db.needs_road());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("drive_telemetry_curated_{}.json", std::process::id()));
        fs::write(&path, r#"[{"name": "Lombard St", "speed_limit_mph": 5}]"#).unwrap();

        let db = CuratedDatabase::load(&path).unwrap();
        assert_eq!(db.len(), 1);
        assert_eq!(db.find("Lombard Street", None).unwrap().speed_limit_mph, 5);

        let _ = fs::remove_file(&path);
    }
}

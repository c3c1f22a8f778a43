use super::SpeedLimitEntry;
use crate::error::{Result, TelemetryError};
use crate::types::Coordinate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const KMH_TO_MPH: f64 = 0.621_371;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoadClass {
    Motorway,
    Primary,
    Secondary,
    Residential,
    Service,
    Unknown,
}

impl RoadClass {
    /// Parse from OSM highway tag
    pub fn from_highway_tag(tag: &str) -> Self {
        match tag {
            "motorway" | "motorway_link" | "trunk" | "trunk_link" => RoadClass::Motorway,
            "primary" | "primary_link" => RoadClass::Primary,
            "secondary" | "secondary_link" | "tertiary" | "tertiary_link" => RoadClass::Secondary,
            "residential" | "living_street" | "unclassified" => RoadClass::Residential,
            "service" | "parking_aisle" => RoadClass::Service,
            _ => RoadClass::Unknown,
        }
    }

    /// Typical US posted limit for the class
    pub fn typical_limit_mph(&self) -> Option<u32> {
        match self {
            RoadClass::Motorway => Some(65),
            RoadClass::Primary => Some(45),
            RoadClass::Secondary => Some(35),
            RoadClass::Residential => Some(25),
            RoadClass::Service => Some(15),
            RoadClass::Unknown => None,
        }
    }
}

/// Parse an OSM `maxspeed` value into mph
///
/// Bare numbers are km/h per OSM convention. Symbolic values
/// ("none", "signals", "walk", "US:urban") yield None.
pub fn parse_maxspeed(value: &str) -> Option<u32> {
    let value = value.trim().to_ascii_lowercase();
    let (number, is_mph) = match value.strip_suffix("mph") {
        Some(rest) => (rest.trim(), true),
        None => (value.strip_suffix("km/h").unwrap_or(&value).trim(), false),
    };

    let parsed: f64 = number.parse().ok()?;
    if !parsed.is_finite() || parsed <= 0.0 {
        return None;
    }

    let mph = if is_mph { parsed } else { parsed * KMH_TO_MPH };
    Some(mph.round() as u32)
}

// OSM JSON deserialization structures
#[derive(Debug, Deserialize)]
struct OsmResponse {
    elements: Vec<OsmElement>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum OsmElement {
    #[serde(rename = "node")]
    Node { id: u64, lat: f64, lon: f64 },
    #[serde(rename = "way")]
    Way {
        id: u64,
        nodes: Vec<u64>,
        #[serde(default)]
        tags: HashMap<String, String>,
    },
    #[serde(other)]
    Other,
}

/// Extract posted limits from an Overpass/OSM JSON dump
///
/// Every node of a tagged way becomes one point entry carrying the way's
/// limit, name and highway type.
pub fn parse_osm_maxspeed(json: &str) -> Result<Vec<SpeedLimitEntry>> {
    let response: OsmResponse = serde_json::from_str(json)
        .map_err(|e| TelemetryError::Dataset(format!("Failed to parse OSM JSON: {}", e)))?;

    let nodes: HashMap<u64, Coordinate> = response
        .elements
        .iter()
        .filter_map(|element| match element {
            OsmElement::Node { id, lat, lon } => Some((*id, Coordinate::new(*lat, *lon))),
            _ => None,
        })
        .collect();

    let mut entries = Vec::new();

    for element in &response.elements {
        let OsmElement::Way {
            id,
            nodes: node_ids,
            tags,
        } = element
        else {
            continue;
        };

        let Some(highway) = tags.get("highway") else {
            continue;
        };
        let Some(limit) = tags.get("maxspeed").and_then(|v| parse_maxspeed(v)) else {
            continue;
        };

        let before = entries.len();
        for node_id in node_ids {
            match nodes.get(node_id) {
                Some(coordinate) => entries.push(SpeedLimitEntry {
                    coordinate: *coordinate,
                    speed_limit_mph: limit,
                    road_name: tags.get("name").cloned(),
                    road_type: Some(highway.clone()),
                }),
                None => log::debug!("Way {} references missing node {}", id, node_id),
            }
        }
        if entries.len() == before {
            log::warn!("Way {} has a maxspeed but no resolvable nodes", id);
        }
    }

    if entries.is_empty() {
        return Err(TelemetryError::Dataset(
            "No ways with maxspeed found in OSM data".to_string(),
        ));
    }

    Ok(entries)
}

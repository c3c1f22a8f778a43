use super::{parse_osm_maxspeed, SpeedLimitEntry};
use crate::error::{Result, TelemetryError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

/// Load a crowd-sourced limit dataset
///
/// # File Formats
/// - `*.gz`: gzip-compressed JSON
/// - anything else: plain JSON
///
/// The JSON is either an array of `SpeedLimitEntry` or a raw Overpass dump
/// (`{"elements": [...]}`) whose ways carry `maxspeed` tags.
pub fn load_entries(path: &Path) -> Result<Vec<SpeedLimitEntry>> {
    let file = File::open(path).map_err(|e| {
        TelemetryError::Dataset(format!("Failed to open {}: {}", path.display(), e))
    })?;

    let mut json = String::new();
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        GzDecoder::new(file)
            .read_to_string(&mut json)
            .map_err(|e| TelemetryError::Dataset(format!("Failed to decompress dataset: {}", e)))?;
    } else {
        let mut file = file;
        file.read_to_string(&mut json)?;
    }

    if json.trim_start().starts_with('{') {
        return parse_osm_maxspeed(&json);
    }

    serde_json::from_str(&json)
        .map_err(|e| TelemetryError::Dataset(format!("Failed to deserialize entries: {}", e)))
}

/// Save entries as gzip-compressed JSON
pub fn save_entries(path: &Path, entries: &[SpeedLimitEntry]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string(entries)?;

    let file = File::create(path)?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(json.as_bytes())?;
    encoder.finish()?;

    Ok(())
}

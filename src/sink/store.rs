use super::{Record, RecordStore};
use crate::error::{Result, TelemetryError};
use crate::types::Trip;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::io::AsyncWriteExt;

/// Keep only the last copy of each trip id, in first-seen order
pub(crate) fn dedup_trips(trips: Vec<Trip>) -> Vec<Trip> {
    let mut order: Vec<String> = Vec::new();
    let mut latest: HashMap<String, Trip> = HashMap::new();
    for trip in trips {
        if !latest.contains_key(&trip.id) {
            order.push(trip.id.clone());
        }
        latest.insert(trip.id.clone(), trip);
    }
    order.into_iter().filter_map(|id| latest.remove(&id)).collect()
}

/// Append-only JSON-lines store, one file per device
///
/// # File Format
/// `{dir}/{device_id}.jsonl`, one serialized `Record` per line.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JsonFileStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn device_path(&self, device_id: &str) -> PathBuf {
        let safe: String = device_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.jsonl", safe))
    }

    async fn append(&self, device_id: &str, records: Vec<Record>) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut buffer = String::new();
        for record in &records {
            buffer.push_str(&serde_json::to_string(record)?);
            buffer.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.device_path(device_id))
            .await?;
        file.write_all(buffer.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_trips(&self, device_id: &str) -> Result<Vec<Trip>> {
        let path = self.device_path(device_id);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut trips = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Record>(line) {
                Ok(Record::Trip(trip)) => trips.push(trip),
                Ok(_) => {}
                Err(e) => log::warn!("{}:{}: skipping bad record: {}", path.display(), line_no + 1, e),
            }
        }
        Ok(dedup_trips(trips))
    }
}

impl RecordStore for JsonFileStore {
    fn write<'a>(&'a self, device_id: &'a str, records: Vec<Record>) -> BoxFuture<'a, Result<()>> {
        self.append(device_id, records).boxed()
    }

    fn trips<'a>(&'a self, device_id: &'a str) -> BoxFuture<'a, Result<Vec<Trip>>> {
        self.read_trips(device_id).boxed()
    }
}

/// In-process store with switchable availability
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Vec<Record>>>,
    offline: AtomicBool,
    fail_next: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While unavailable every write and read fails
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    /// Fail the next `count` writes
    pub fn fail_next_writes(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn records(&self, device_id: &str) -> Vec<Record> {
        self.lock().get(device_id).cloned().unwrap_or_default()
    }

    pub fn sample_count(&self, device_id: &str) -> usize {
        self.records(device_id)
            .iter()
            .map(|r| match r {
                Record::Samples(samples) => samples.len(),
                Record::Trip(_) => 0,
            })
            .sum()
    }

    fn check_available(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TelemetryError::Store("store unavailable".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Record>>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RecordStore for MemoryStore {
    fn write<'a>(&'a self, device_id: &'a str, records: Vec<Record>) -> BoxFuture<'a, Result<()>> {
        let result = self.check_available().and_then(|_| {
            let remaining = self.fail_next.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_next.store(remaining - 1, Ordering::SeqCst);
                return Err(TelemetryError::Store("injected write failure".to_string()));
            }
            self.lock()
                .entry(device_id.to_string())
                .or_default()
                .extend(records);
            Ok(())
        });
        futures::future::ready(result).boxed()
    }

    fn trips<'a>(&'a self, device_id: &'a str) -> BoxFuture<'a, Result<Vec<Trip>>> {
        let result = self.check_available().map(|_| {
            let trips = self
                .records(device_id)
                .into_iter()
                .filter_map(|r| match r {
                    Record::Trip(trip) => Some(trip),
                    Record::Samples(_) => None,
                })
                .collect();
            dedup_trips(trips)
        });
        futures::future::ready(result).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Coordinate, Sample};
    use chrono::{TimeZone, Utc};

    fn trip(id: &str, score: u32) -> Trip {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let mut trip = Trip::new("dev", start, Coordinate::new(37.0, -122.0), None);
        trip.id = id.to_string();
        trip.end_time = Some(start + chrono::Duration::minutes(5));
        trip.driver_score = score;
        trip
    }

    fn sample() -> Sample {
        Sample::new(
            Coordinate::new(37.0, -122.0),
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        )
    }

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("drive_telemetry_store_{}_{}", std::process::id(), name))
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = temp_dir("round_trip");
        let store = JsonFileStore::new(&dir);

        store
            .write("car/1", vec![Record::Samples(vec![sample()]), Record::Trip(trip("a", 90))])
            .await
            .unwrap();
        store.write("car/1", vec![Record::Trip(trip("b", 80))]).await.unwrap();

        let trips = store.trips("car/1").await.unwrap();
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0].id, "a");
        assert_eq!(trips[1].driver_score, 80);
        assert!(dir.join("car_1.jsonl").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_file_store_unknown_device() {
        let store = JsonFileStore::new(temp_dir("empty"));
        assert!(store.trips("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_skips_bad_lines() {
        let dir = temp_dir("bad_lines");
        let store = JsonFileStore::new(&dir);
        store.write("dev", vec![Record::Trip(trip("a", 90))]).await.unwrap();

        let path = dir.join("dev.jsonl");
        let mut contents = std::fs::read_to_string(&path).unwrap();
        contents.push_str("{truncated\n");
        std::fs::write(&path, contents).unwrap();

        assert_eq!(store.trips("dev").await.unwrap().len(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_duplicate_trip_writes_collapse() {
        let store = MemoryStore::new();
        store.write("dev", vec![Record::Trip(trip("a", 90))]).await.unwrap();
        store.write("dev", vec![Record::Trip(trip("a", 85))]).await.unwrap();

        let trips = store.trips("dev").await.unwrap();
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].driver_score, 85);
    }

    #[tokio::test]
    async fn test_memory_store_availability() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(store.write("dev", vec![Record::Samples(vec![sample()])]).await.is_err());
        assert!(store.trips("dev").await.is_err());

        store.set_available(true);
        store.fail_next_writes(1);
        assert!(store.write("dev", vec![Record::Samples(vec![sample()])]).await.is_err());
        store.write("dev", vec![Record::Samples(vec![sample()])]).await.unwrap();
        assert_eq!(store.sample_count("dev"), 1);
    }

    #[test]
    fn test_record_tagging() {
        let json = serde_json::to_string(&Record::Trip(trip("a", 90))).unwrap();
        assert!(json.contains(r#""kind":"trip""#));
        assert_eq!(Record::Samples(Vec::new()).kind(), "samples");
    }
}

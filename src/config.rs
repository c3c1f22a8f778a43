use crate::error::{Result, TelemetryError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level pipeline configuration
///
/// Every section has defaults, so a config file only needs the fields it overrides:
/// ```json
/// { "device_id": "van-7", "sink": { "mode": "batched", "queue_path": "/data/queue.json" } }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub device_id: String,
    pub trip: TripConfig,
    pub detector: DetectorConfig,
    pub resolver: ResolverConfig,
    pub sink: SinkConfig,
    pub validation: ValidationConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            device_id: "default-device".to_string(),
            trip: TripConfig::default(),
            detector: DetectorConfig::default(),
            resolver: ResolverConfig::default(),
            sink: SinkConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

impl TelemetryConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| TelemetryError::Config(format!("{}: {}", path.display(), e)))?;
        let config: TelemetryConfig = serde_json::from_str(&contents)
            .map_err(|e| TelemetryError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the state machine or sink misbehave
    pub fn validate(&self) -> Result<()> {
        if self.device_id.trim().is_empty() {
            return Err(TelemetryError::Config("device_id is empty".to_string()));
        }
        if self.trip.start_threshold_mph <= 0.0 || self.trip.stop_threshold_mph <= 0.0 {
            return Err(TelemetryError::Config(
                "trip thresholds must be positive".to_string(),
            ));
        }
        if self.resolver.cache_capacity == 0 {
            return Err(TelemetryError::Config(
                "resolver.cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.resolver.cache_precision_deg <= 0.0 {
            return Err(TelemetryError::Config(
                "resolver.cache_precision_deg must be positive".to_string(),
            ));
        }
        if self.sink.batch_size == 0 {
            return Err(TelemetryError::Config(
                "sink.batch_size must be at least 1".to_string(),
            ));
        }
        if self.sink.max_retries == 0 {
            return Err(TelemetryError::Config(
                "sink.max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TripConfig {
    /// Idle -> Driving at or above this speed
    pub start_threshold_mph: f64,
    /// Driving -> Cooldown below this speed
    pub stop_threshold_mph: f64,
    pub cooldown_secs: i64,
}

impl Default for TripConfig {
    fn default() -> Self {
        Self {
            start_threshold_mph: 15.0,
            stop_threshold_mph: 15.0,
            cooldown_secs: 180,
        }
    }
}

impl TripConfig {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub hard_stop_mps2: f64,
    /// Diagnostic only, never counted
    pub moderate_braking_mps2: f64,
    pub sharp_turn_deg: f64,
    pub pothole_vertical_g: f64,
    pub pothole_total_g: f64,
    /// Oldest cached accelerometer reading still attributed to a fix
    pub inertial_max_age_ms: i64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            hard_stop_mps2: 2.5,
            moderate_braking_mps2: 1.5,
            sharp_turn_deg: 40.0,
            pothole_vertical_g: 1.8,
            pothole_total_g: 2.0,
            inertial_max_age_ms: 1000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub cache_capacity: usize,
    /// Cache slot size in degrees (0.00005 deg is about 5.5 m of latitude)
    pub cache_precision_deg: f64,
    pub crowd_radius_m: f64,
    pub lookup_timeout_ms: u64,
    /// How long the last resolved limit keeps applying to later samples
    pub carry_forward_secs: i64,
    pub curated_path: Option<PathBuf>,
    pub crowd_dataset_path: Option<PathBuf>,
    pub geocoder_url: Option<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1000,
            cache_precision_deg: 0.00005,
            crowd_radius_m: 100.0,
            lookup_timeout_ms: 3000,
            carry_forward_secs: 30,
            curated_path: None,
            crowd_dataset_path: None,
            geocoder_url: None,
        }
    }
}

impl ResolverConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkMode {
    /// Accumulate samples and write them as one atomic batch
    Batched,
    /// Write every record immediately, queue on failure
    OfflineQueued,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub mode: SinkMode,
    pub batch_size: usize,
    pub batch_interval_secs: i64,
    pub retry_backoff_secs: i64,
    pub max_retries: u32,
    pub queue_path: Option<PathBuf>,
    pub store_timeout_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            mode: SinkMode::OfflineQueued,
            batch_size: 20,
            batch_interval_secs: 60,
            retry_backoff_secs: 5,
            max_retries: 3,
            queue_path: None,
            store_timeout_ms: 5000,
        }
    }
}

impl SinkConfig {
    pub fn batch_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.batch_interval_secs)
    }

    pub fn retry_backoff(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retry_backoff_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub stale_after_secs: i64,
    /// Samples stamped further than this into the future are rejected
    pub max_future_skew_secs: i64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 300,
            max_future_skew_secs: 60,
        }
    }
}

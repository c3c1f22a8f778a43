use crate::config::ValidationConfig;
use crate::error::{Result, TelemetryError};
use crate::types::Sample;
use chrono::{DateTime, Duration, Utc};

/// Outcome of checking an accepted sample
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleQuality {
    pub age: Duration,
    /// Older than the staleness bound; still processed
    pub stale: bool,
}

/// Gate every sample before it reaches a detector
///
/// Rejects non-finite or out-of-range coordinates and timestamps from too far in the
/// future. Old samples pass but are flagged stale.
pub fn validate_sample(
    sample: &Sample,
    now: DateTime<Utc>,
    config: &ValidationConfig,
) -> Result<SampleQuality> {
    if !sample.coordinate.is_valid() {
        return Err(TelemetryError::MalformedSample(format!(
            "coordinate out of range: ({}, {})",
            sample.coordinate.latitude, sample.coordinate.longitude
        )));
    }

    let age = now - sample.timestamp;
    if age < -Duration::seconds(config.max_future_skew_secs) {
        return Err(TelemetryError::MalformedSample(format!(
            "timestamp {} is {}s in the future",
            sample.timestamp.to_rfc3339(),
            -age.num_seconds()
        )));
    }

    if let Some(accuracy) = sample.accuracy {
        if !accuracy.is_finite() {
            return Err(TelemetryError::MalformedSample(
                "accuracy is not finite".to_string(),
            ));
        }
    }

    if let Some(inertial) = sample.inertial {
        if !(inertial.x.is_finite() && inertial.y.is_finite() && inertial.z.is_finite()) {
            return Err(TelemetryError::MalformedSample(
                "inertial vector is not finite".to_string(),
            ));
        }
    }

    let stale = age > Duration::seconds(config.stale_after_secs);
    Ok(SampleQuality { age, stale })
}

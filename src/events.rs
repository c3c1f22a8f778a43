use crate::config::DetectorConfig;
use crate::types::{Coordinate, InertialReading, InertialVector, Sample};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Speeding,
    HardStop,
    SharpTurn,
    Pothole,
}

/// A counted safety event, located at the sample that produced it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SafetyEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub magnitude: f64, // mph over limit, m/s^2, degrees or g
    pub speed_mph: Option<f64>,
    pub coordinate: Coordinate,
}

/// Per-sample detector output
///
/// `speeding` is set only on the sample where an excursion begins; `speeding_ongoing`
/// stays set for the rest of the excursion.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EventFlags {
    pub speeding: bool,
    pub speeding_ongoing: bool,
    pub hard_stop: bool,
    pub sharp_turn: bool,
    pub pothole: bool,
    pub deceleration_mps2: Option<f64>,
    /// Above the soft braking threshold; diagnostics only
    pub moderate_braking: bool,
    pub heading_delta_deg: Option<f64>,
    pub impact_g: Option<f64>,
    pub over_limit_mph: Option<f64>,
}

impl EventFlags {
    pub fn any(&self) -> bool {
        self.speeding || self.hard_stop || self.sharp_turn || self.pothole
    }

    /// Counted events as records
    pub fn events(&self, sample: &Sample) -> Vec<SafetyEvent> {
        let speed_mph = sample.speed_mph();
        let mut events = Vec::new();
        let mut push = |kind: EventKind, magnitude: f64| {
            events.push(SafetyEvent {
                timestamp: sample.timestamp,
                kind,
                magnitude,
                speed_mph,
                coordinate: sample.coordinate,
            });
        };

        if self.speeding {
            push(EventKind::Speeding, self.over_limit_mph.unwrap_or(0.0));
        }
        if self.hard_stop {
            push(EventKind::HardStop, self.deceleration_mps2.unwrap_or(0.0));
        }
        if self.sharp_turn {
            push(EventKind::SharpTurn, self.heading_delta_deg.unwrap_or(0.0));
        }
        if self.pothole {
            push(EventKind::Pothole, self.impact_g.unwrap_or(0.0));
        }
        events
    }
}

/// Smallest angle between two headings, in [0, 180]
pub fn heading_delta(previous_deg: f64, current_deg: f64) -> f64 {
    let delta = (current_deg - previous_deg).abs() % 360.0;
    delta.min(360.0 - delta)
}

/// Derives speeding, hard-stop, sharp-turn and pothole flags from consecutive fixes
///
/// # State
/// - previous accepted sample (braking and turn rates)
/// - speeding latch: one count per excursion above the limit
/// - most recent accelerometer reading from the inertial stream, consumed at most once
pub struct MotionEventDetector {
    config: DetectorConfig,
    previous: Option<Sample>,
    speeding_latched: bool,
    cached_inertial: Option<InertialReading>,
}

impl MotionEventDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            previous: None,
            speeding_latched: false,
            cached_inertial: None,
        }
    }

    /// Cache an accelerometer reading for the next fix that lacks its own
    pub fn record_inertial(&mut self, reading: InertialReading) {
        self.cached_inertial = Some(reading);
    }

    pub fn is_speeding_latched(&self) -> bool {
        self.speeding_latched
    }

    pub fn evaluate(&mut self, sample: &Sample, speed_limit_mph: Option<f64>) -> EventFlags {
        let mut flags = EventFlags::default();

        self.check_speeding(sample, speed_limit_mph, &mut flags);

        if let Some(previous) = self.previous.as_ref() {
            check_hard_stop(&self.config, previous, sample, &mut flags);
            check_sharp_turn(&self.config, previous, sample, &mut flags);
        }

        if let Some(inertial) = self.inertial_for(sample) {
            let total = inertial.magnitude();
            let vertical = inertial.vertical();
            flags.impact_g = Some(total.max(vertical));
            flags.pothole =
                vertical > self.config.pothole_vertical_g || total > self.config.pothole_total_g;
        }

        self.previous = Some(sample.clone());
        flags
    }

    fn check_speeding(
        &mut self,
        sample: &Sample,
        speed_limit_mph: Option<f64>,
        flags: &mut EventFlags,
    ) {
        // Without both values the latch is left untouched
        let (Some(speed), Some(limit)) = (sample.speed_mph(), speed_limit_mph) else {
            return;
        };

        if speed > limit {
            flags.over_limit_mph = Some(speed - limit);
            flags.speeding_ongoing = true;
            if !self.speeding_latched {
                self.speeding_latched = true;
                flags.speeding = true;
            }
        } else {
            self.speeding_latched = false;
        }
    }

    /// Sample's own vector first, then a fresh cached reading (taken, never reused)
    fn inertial_for(&mut self, sample: &Sample) -> Option<InertialVector> {
        if let Some(vector) = sample.inertial {
            return Some(vector);
        }

        let reading = self.cached_inertial.take()?;
        let age = sample.timestamp - reading.timestamp;
        let max_age = Duration::milliseconds(self.config.inertial_max_age_ms);
        if age.abs() <= max_age {
            Some(reading.vector)
        } else {
            None
        }
    }
}

fn check_hard_stop(
    config: &DetectorConfig,
    previous: &Sample,
    current: &Sample,
    flags: &mut EventFlags,
) {
    let (Some(prev_speed), Some(cur_speed)) = (previous.speed_mps(), current.speed_mps()) else {
        return;
    };

    let elapsed = (current.timestamp - previous.timestamp).num_milliseconds() as f64 / 1000.0;
    if elapsed <= 0.0 {
        return;
    }

    let deceleration = (prev_speed - cur_speed) / elapsed;
    flags.deceleration_mps2 = Some(deceleration);
    flags.moderate_braking = deceleration > config.moderate_braking_mps2;
    flags.hard_stop = deceleration > config.hard_stop_mps2;
}

fn check_sharp_turn(
    config: &DetectorConfig,
    previous: &Sample,
    current: &Sample,
    flags: &mut EventFlags,
) {
    let (Some(prev_heading), Some(cur_heading)) =
        (previous.valid_heading(), current.valid_heading())
    else {
        return;
    };

    let delta = heading_delta(prev_heading, cur_heading);
    flags.heading_delta_deg = Some(delta);
    flags.sharp_turn = delta > config.sharp_turn_deg;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn t(secs: f64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
            + Duration::milliseconds((secs * 1000.0) as i64)
    }

    fn fix(secs: f64, mph: f64) -> Sample {
        Sample::new(Coordinate::new(37.7749, -122.4194), t(secs)).with_speed_mph(mph)
    }

    fn detector() -> MotionEventDetector {
        MotionEventDetector::new(DetectorConfig::default())
    }

    #[test]
    fn test_heading_wraparound() {
        assert_relative_eq!(heading_delta(350.0, 10.0), 20.0);
        assert_relative_eq!(heading_delta(10.0, 350.0), 20.0);
        assert_relative_eq!(heading_delta(0.0, 180.0), 180.0);
        assert_relative_eq!(heading_delta(90.0, 90.0), 0.0);
    }

    #[test]
    fn test_heading_delta_always_in_range() {
        let mut a = 0.0;
        while a < 360.0 {
            let mut b = 0.0;
            while b < 360.0 {
                let d = heading_delta(a, b);
                assert!((0.0..=180.0).contains(&d), "delta({}, {}) = {}", a, b, d);
                assert_relative_eq!(d, heading_delta(b, a));
                b += 7.5;
            }
            a += 7.5;
        }
    }

    #[test]
    fn test_hard_stop_scenario() {
        let mut det = detector();
        det.evaluate(&fix(0.0, 30.0), None);
        let flags = det.evaluate(&fix(2.0, 10.0), None);

        let decel = flags.deceleration_mps2.unwrap();
        assert_relative_eq!(decel, 4.4704, epsilon = 1e-3);
        assert!(flags.hard_stop);
        assert!(flags.moderate_braking);
    }

    #[test]
    fn test_moderate_braking_not_counted() {
        let mut det = detector();
        det.evaluate(&fix(0.0, 30.0), None);
        // 30 -> 25 mph over 1s = 2.2 m/s^2
        let flags = det.evaluate(&fix(1.0, 25.0), None);
        assert!(flags.moderate_braking);
        assert!(!flags.hard_stop);
        assert!(!flags.any());
    }

    #[test]
    fn test_hard_stop_requires_elapsed_time() {
        let mut det = detector();
        det.evaluate(&fix(1.0, 30.0), None);
        let flags = det.evaluate(&fix(1.0, 0.0), None);
        assert!(!flags.hard_stop);
        assert!(flags.deceleration_mps2.is_none());
    }

    #[test]
    fn test_sharp_turn() {
        let mut det = detector();
        det.evaluate(&fix(0.0, 20.0).with_heading(350.0), None);
        let flags = det.evaluate(&fix(1.0, 20.0).with_heading(10.0), None);
        assert!(!flags.sharp_turn);
        assert_relative_eq!(flags.heading_delta_deg.unwrap(), 20.0);

        let flags = det.evaluate(&fix(2.0, 20.0).with_heading(60.0), None);
        assert!(flags.sharp_turn);
    }

    #[test]
    fn test_sharp_turn_requires_valid_headings() {
        let mut det = detector();
        det.evaluate(&fix(0.0, 20.0).with_heading(-1.0), None);
        let flags = det.evaluate(&fix(1.0, 20.0).with_heading(180.0), None);
        assert!(!flags.sharp_turn);
        assert!(flags.heading_delta_deg.is_none());
    }

    #[test]
    fn test_pothole_scenario() {
        let mut det = detector();
        let sample = fix(0.0, 20.0).with_inertial(InertialVector::new(0.2, 0.3, 2.1));
        let flags = det.evaluate(&sample, None);
        assert!(flags.pothole);
    }

    #[test]
    fn test_pothole_total_threshold() {
        let mut det = detector();
        // vertical 1.0 but total ~2.24
        let sample = fix(0.0, 20.0).with_inertial(InertialVector::new(1.5, 1.3, 1.0));
        assert!(det.evaluate(&sample, None).pothole);

        let calm = fix(1.0, 20.0).with_inertial(InertialVector::new(0.1, 0.1, 1.0));
        assert!(!det.evaluate(&calm, None).pothole);
    }

    #[test]
    fn test_cached_inertial_consumed_once() {
        let mut det = detector();
        det.record_inertial(InertialReading {
            timestamp: t(0.8),
            vector: InertialVector::new(0.0, 0.0, 2.5),
        });

        assert!(det.evaluate(&fix(1.0, 20.0), None).pothole);
        // Same physical impact must not be counted on the next fix
        assert!(!det.evaluate(&fix(2.0, 20.0), None).pothole);
    }

    #[test]
    fn test_stale_cached_inertial_ignored() {
        let mut det = detector();
        det.record_inertial(InertialReading {
            timestamp: t(0.0),
            vector: InertialVector::new(0.0, 0.0, 2.5),
        });
        assert!(!det.evaluate(&fix(5.0, 20.0), None).pothole);
    }

    #[test]
    fn test_speeding_hysteresis() {
        let mut det = detector();
        let speeds = [30.0, 45.0, 50.0, 30.0, 40.0];
        let mut increments = Vec::new();

        for (i, mph) in speeds.iter().enumerate() {
            let flags = det.evaluate(&fix(i as f64 * 10.0, *mph), Some(35.0));
            increments.push(flags.speeding);
        }

        assert_eq!(increments, vec![false, true, false, false, true]);
    }

    #[test]
    fn test_speeding_ongoing_while_latched() {
        let mut det = detector();
        let first = det.evaluate(&fix(0.0, 45.0), Some(35.0));
        let second = det.evaluate(&fix(10.0, 50.0), Some(35.0));

        assert!(first.speeding && first.speeding_ongoing);
        assert!(!second.speeding && second.speeding_ongoing);
        assert_relative_eq!(second.over_limit_mph.unwrap(), 15.0, epsilon = 1e-6);
        assert!(det.is_speeding_latched());
    }

    #[test]
    fn test_speeding_at_limit_resets_latch() {
        let mut det = detector();
        det.evaluate(&fix(0.0, 45.0), Some(35.0));
        let at_limit = det.evaluate(&fix(10.0, 35.0), Some(35.0));
        assert!(!at_limit.speeding_ongoing);
        assert!(!det.is_speeding_latched());
    }

    #[test]
    fn test_unknown_limit_skips_speeding() {
        let mut det = detector();
        let flags = det.evaluate(&fix(0.0, 90.0), None);
        assert!(!flags.speeding);
        assert!(!flags.speeding_ongoing);
    }

    #[test]
    fn test_events_simultaneous() {
        let mut det = detector();
        det.evaluate(&fix(0.0, 50.0).with_heading(0.0), Some(35.0));
        let sample = fix(1.0, 40.0)
            .with_heading(90.0)
            .with_inertial(InertialVector::new(0.0, 0.0, 2.0));
        let flags = det.evaluate(&sample, Some(35.0));

        // Latched from the previous fix, so speeding is ongoing but not new
        assert!(flags.speeding_ongoing && !flags.speeding);
        assert!(flags.hard_stop);
        assert!(flags.sharp_turn);
        assert!(flags.pothole);

        let kinds: Vec<EventKind> = flags.events(&sample).iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::HardStop, EventKind::SharpTurn, EventKind::Pothole]
        );
    }
}

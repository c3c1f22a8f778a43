use crate::types::{Trip, ViolationCounters};
use serde::{Deserialize, Serialize};

/// Points deducted per counted event
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub speeding: u32,
    pub hard_stop: u32,
    pub sharp_turn: u32,
    pub pothole: u32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            speeding: 5,
            hard_stop: 3,
            sharp_turn: 2,
            pothole: 1,
        }
    }
}

pub const MAX_SCORE: u32 = 100;

/// Derives driver scores from violation counters
///
/// The score is a pure function of the counters, so recomputing it after every
/// increment can never deduct twice for the same event.
#[derive(Clone, Copy, Debug, Default)]
pub struct DriverScoreEngine {
    weights: ScoreWeights,
}

impl DriverScoreEngine {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    pub fn score(&self, counters: &ViolationCounters) -> u32 {
        let deduction = u64::from(self.weights.speeding) * u64::from(counters.speeding)
            + u64::from(self.weights.hard_stop) * u64::from(counters.hard_stops)
            + u64::from(self.weights.sharp_turn) * u64::from(counters.sharp_turns)
            + u64::from(self.weights.pothole) * u64::from(counters.potholes);

        u64::from(MAX_SCORE).saturating_sub(deduction) as u32
    }

    /// Authoritative score written onto a trip
    pub fn apply(&self, trip: &mut Trip) {
        trip.driver_score = self.score(&trip.counters);
    }
}

/// Cumulative summary over finalized trips
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    /// Mean of trip scores, 100 when no trips exist
    pub average_score: f64,
    pub trip_count: usize,
    pub total_distance_m: f64,
    pub counters: ViolationCounters,
}

impl Default for ScoreSummary {
    fn default() -> Self {
        Self {
            average_score: f64::from(MAX_SCORE),
            trip_count: 0,
            total_distance_m: 0.0,
            counters: ViolationCounters::default(),
        }
    }
}

/// Summarize finalized trips; active trips are skipped
pub fn summarize<'a>(trips: impl IntoIterator<Item = &'a Trip>) -> ScoreSummary {
    let mut summary = ScoreSummary::default();
    let mut score_total = 0u64;

    for trip in trips.into_iter().filter(|t| !t.is_active()) {
        summary.trip_count += 1;
        summary.total_distance_m += trip.distance_m;
        summary.counters.accumulate(&trip.counters);
        score_total += u64::from(trip.driver_score);
    }

    if summary.trip_count > 0 {
        summary.average_score = score_total as f64 / summary.trip_count as f64;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Coordinate;
    use chrono::{Duration, TimeZone, Utc};

    fn counters(speeding: u32, hard_stops: u32, sharp_turns: u32, potholes: u32) -> ViolationCounters {
        ViolationCounters {
            speeding,
            hard_stops,
            sharp_turns,
            potholes,
        }
    }

    fn finished_trip(score: u32, distance_m: f64) -> Trip {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let mut trip = Trip::new("dev", start, Coordinate::new(37.0, -122.0), None);
        trip.end_time = Some(start + Duration::minutes(10));
        trip.driver_score = score;
        trip.distance_m = distance_m;
        trip
    }

    #[test]
    fn test_score_formula() {
        let engine = DriverScoreEngine::default();
        assert_eq!(engine.score(&counters(0, 0, 0, 0)), 100);
        assert_eq!(engine.score(&counters(1, 0, 0, 0)), 95);
        assert_eq!(engine.score(&counters(1, 1, 1, 1)), 89);
        assert_eq!(engine.score(&counters(2, 3, 4, 5)), 100 - 10 - 9 - 8 - 5);
    }

    #[test]
    fn test_score_idempotent() {
        let engine = DriverScoreEngine::default();
        let c = counters(3, 2, 1, 7);
        assert_eq!(engine.score(&c), engine.score(&c));
    }

    #[test]
    fn test_score_clamped() {
        let engine = DriverScoreEngine::default();
        assert_eq!(engine.score(&counters(30, 0, 0, 0)), 0);
        assert_eq!(
            engine.score(&counters(u32::MAX, u32::MAX, u32::MAX, u32::MAX)),
            0
        );
    }

    #[test]
    fn test_score_non_increasing_as_counters_grow() {
        let engine = DriverScoreEngine::default();
        let mut c = ViolationCounters::default();
        let mut last = engine.score(&c);
        for i in 0..40 {
            match i % 4 {
                0 => c.speeding += 1,
                1 => c.hard_stops += 1,
                2 => c.sharp_turns += 1,
                _ => c.potholes += 1,
            }
            let next = engine.score(&c);
            assert!(next <= last);
            last = next;
        }
        assert_eq!(last, 0);
    }

    #[test]
    fn test_apply_to_trip() {
        let engine = DriverScoreEngine::default();
        let mut trip = finished_trip(100, 0.0);
        trip.counters = counters(1, 1, 0, 0);
        engine.apply(&mut trip);
        assert_eq!(trip.driver_score, 92);
    }

    #[test]
    fn test_summary_defaults_to_100() {
        let summary = summarize(&Vec::<Trip>::new());
        assert_eq!(summary.average_score, 100.0);
        assert_eq!(summary.trip_count, 0);
    }

    #[test]
    fn test_summary_mean() {
        let trips = vec![finished_trip(100, 1000.0), finished_trip(80, 500.0), finished_trip(90, 0.0)];
        let summary = summarize(&trips);
        assert_eq!(summary.trip_count, 3);
        assert_eq!(summary.average_score, 90.0);
        assert_eq!(summary.total_distance_m, 1500.0);
    }

    #[test]
    fn test_summary_ignores_active_trip() {
        let mut active = finished_trip(10, 0.0);
        active.end_time = None;
        let trips = vec![finished_trip(70, 0.0), active];
        let summary = summarize(&trips);
        assert_eq!(summary.trip_count, 1);
        assert_eq!(summary.average_score, 70.0);
    }
}

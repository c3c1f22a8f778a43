use super::Coordinate;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Per-category safety event counts for one trip
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationCounters {
    pub speeding: u32,
    pub hard_stops: u32,
    pub sharp_turns: u32,
    pub potholes: u32,
}

impl ViolationCounters {
    pub fn total(&self) -> u32 {
        self.speeding + self.hard_stops + self.sharp_turns + self.potholes
    }

    pub fn accumulate(&mut self, other: &ViolationCounters) {
        self.speeding += other.speeding;
        self.hard_stops += other.hard_stops;
        self.sharp_turns += other.sharp_turns;
        self.potholes += other.potholes;
    }
}

/// A contiguous driving session
///
/// Mutated only by the trip state machine while `end_time` is `None`; after
/// finalization it is an immutable record handed to the sink.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: String,
    pub device_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub start_coordinate: Coordinate,
    pub end_coordinate: Option<Coordinate>,
    pub distance_m: f64,
    pub max_speed_mph: f64,
    pub average_speed_mph: Option<f64>,
    pub counters: ViolationCounters,
    pub driver_score: u32,
    pub destination: Option<String>,
    pub sample_count: u64,
}

impl Trip {
    pub fn new(
        device_id: &str,
        start_time: DateTime<Utc>,
        start_coordinate: Coordinate,
        destination: Option<String>,
    ) -> Self {
        Trip {
            id: format!("trip_{}_{}", device_id, start_time.timestamp_millis()),
            device_id: device_id.to_string(),
            start_time,
            end_time: None,
            start_coordinate,
            end_coordinate: None,
            distance_m: 0.0,
            max_speed_mph: 0.0,
            average_speed_mph: None,
            counters: ViolationCounters::default(),
            driver_score: 100,
            destination,
            sample_count: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    /// Elapsed time, measured to `now` while the trip is still active
    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        let end = self.end_time.unwrap_or(now);
        (end - self.start_time).max(Duration::zero())
    }

    pub fn distance_miles(&self) -> f64 {
        self.distance_m / 1609.344
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_trip_defaults() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let trip = Trip::new("dev-1", start, Coordinate::new(37.0, -122.0), None);

        assert!(trip.is_active());
        assert_eq!(trip.driver_score, 100);
        assert_eq!(trip.counters.total(), 0);
        assert!(trip.id.starts_with("trip_dev-1_"));
        assert_eq!(trip.duration(start + Duration::seconds(90)), Duration::seconds(90));
    }

    #[test]
    fn test_counter_accumulate() {
        let mut total = ViolationCounters::default();
        let trip = ViolationCounters {
            speeding: 2,
            hard_stops: 1,
            sharp_turns: 0,
            potholes: 3,
        };
        total.accumulate(&trip);
        total.accumulate(&trip);
        assert_eq!(total.speeding, 4);
        assert_eq!(total.potholes, 6);
        assert_eq!(total.total(), 12);
    }
}

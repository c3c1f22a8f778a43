use crate::config::TripConfig;
use crate::error::{Result, TelemetryError};
use crate::events::EventFlags;
use crate::score::DriverScoreEngine;
use crate::types::{mps_to_mph, Coordinate, Sample, Trip};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Trip lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripState {
    /// No active trip
    Idle,
    /// Active trip, moving at or above the stop threshold
    Driving,
    /// Active trip with the pending-stop deadline running
    Cooldown,
}

/// Transition taken while handling one input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripTransition {
    Started,
    CooldownStarted,
    Resumed,
    Ended,
}

/// Single-shot, cancellable stop deadline
///
/// Arming always replaces any earlier deadline, so at most one is outstanding.
#[derive(Debug, Clone, Default)]
pub struct CooldownTimer {
    deadline: Option<DateTime<Utc>>,
}

impl CooldownTimer {
    pub fn arm(&mut self, deadline: DateTime<Utc>) {
        self.deadline = Some(deadline);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Deadline that has passed at `now`, if any
    pub fn fired(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.deadline.filter(|deadline| now >= *deadline)
    }
}

/// Result of `start_trip`
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Started(Trip),
    /// No coordinate known yet; the trip opens on the next sample
    Pending,
    /// A trip was already active; only its destination changed
    AlreadyActive,
}

/// What one sample did to the lifecycle
#[derive(Debug, Clone, Default)]
pub struct SampleUpdate {
    pub transitions: Vec<TripTransition>,
    /// Trip closed by a deadline that passed before this sample
    pub finished: Option<Trip>,
    pub running_score: Option<u32>,
}

/// Owns trip boundaries and per-trip aggregates for one device
///
/// # Transitions
/// - Idle -> Driving: speed >= start threshold, or a pending manual start
/// - Driving -> Cooldown: speed < stop threshold, arms the deadline
/// - Cooldown -> Driving: speed >= stop threshold before the deadline
/// - Cooldown -> Idle: deadline passes, the trip is finalized
///
/// All deadlines live on the sample timeline. A clock reading passed to `tick`,
/// `start_trip` or `end_trip` is mapped onto it as the latest sample timestamp
/// plus the wall time elapsed since that sample was processed, so a replayed
/// backlog of old samples is not cut short by the current time.
pub struct TripStateMachine {
    device_id: String,
    config: TripConfig,
    scorer: DriverScoreEngine,
    active: Option<Trip>,
    cooldown: CooldownTimer,
    pending_start: Option<Option<String>>,
    last_coordinate: Option<Coordinate>,
    trip_previous: Option<Coordinate>,
    /// Latest sample timestamp and the clock reading when it was processed
    timeline: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl TripStateMachine {
    pub fn new(device_id: &str, config: TripConfig, scorer: DriverScoreEngine) -> Self {
        Self {
            device_id: device_id.to_string(),
            config,
            scorer,
            active: None,
            cooldown: CooldownTimer::default(),
            pending_start: None,
            last_coordinate: None,
            trip_previous: None,
            timeline: None,
        }
    }

    pub fn state(&self) -> TripState {
        match (&self.active, self.cooldown.is_armed()) {
            (None, _) => TripState::Idle,
            (Some(_), false) => TripState::Driving,
            (Some(_), true) => TripState::Cooldown,
        }
    }

    pub fn current_trip(&self) -> Option<&Trip> {
        self.active.as_ref()
    }

    pub fn cooldown_deadline(&self) -> Option<DateTime<Utc>> {
        self.cooldown.deadline()
    }

    pub fn has_pending_start(&self) -> bool {
        self.pending_start.is_some()
    }

    /// Manual start
    pub fn start_trip(&mut self, destination: Option<String>, now: DateTime<Utc>) -> StartOutcome {
        let now = self.sample_time(now);
        if let Some(trip) = self.active.as_mut() {
            if destination.is_some() {
                trip.destination = destination;
            }
            return StartOutcome::AlreadyActive;
        }

        match self.last_coordinate {
            Some(coordinate) => {
                let trip = self.open_trip(now, coordinate, destination);
                StartOutcome::Started(trip)
            }
            None => {
                log::info!("Trip start deferred until the first fix arrives");
                self.pending_start = Some(destination);
                StartOutcome::Pending
            }
        }
    }

    /// Manual stop
    ///
    /// Without an active trip nothing is finalized and `InvalidState` is
    /// returned; a pending start is cancelled on the way.
    pub fn end_trip(&mut self, now: DateTime<Utc>) -> Result<Trip> {
        if self.active.is_none() {
            let reason = if self.pending_start.take().is_some() {
                "no active trip, pending start cancelled"
            } else {
                "no active trip"
            };
            return Err(TelemetryError::InvalidState(reason.to_string()));
        }
        let end = self.sample_time(now);
        self.finalize(end)
            .ok_or_else(|| TelemetryError::InvalidState("no active trip".to_string()))
    }

    /// Close the trip if the cooldown deadline has passed at clock reading `now`
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<Trip> {
        let now = self.sample_time(now);
        self.expire(now)
    }

    /// Handle a sample processed at its own timestamp
    pub fn on_sample(&mut self, sample: &Sample, flags: &EventFlags) -> SampleUpdate {
        self.on_sample_at(sample, flags, sample.timestamp)
    }

    /// Handle a sample processed at clock reading `processed_at`
    pub fn on_sample_at(
        &mut self,
        sample: &Sample,
        flags: &EventFlags,
        processed_at: DateTime<Utc>,
    ) -> SampleUpdate {
        let mut update = SampleUpdate::default();

        if self.timeline.map_or(true, |(latest, _)| sample.timestamp >= latest) {
            self.timeline = Some((sample.timestamp, processed_at));
        }

        if let Some(trip) = self.expire(sample.timestamp) {
            update.transitions.push(TripTransition::Ended);
            update.finished = Some(trip);
        }

        let speed_mph = sample.speed_mph();

        if self.active.is_none() {
            if let Some(destination) = self.pending_start.take() {
                self.open_trip(sample.timestamp, sample.coordinate, destination);
                update.transitions.push(TripTransition::Started);
            } else if speed_mph.is_some_and(|s| s >= self.config.start_threshold_mph) {
                self.open_trip(sample.timestamp, sample.coordinate, None);
                update.transitions.push(TripTransition::Started);
            }
        }

        self.last_coordinate = Some(sample.coordinate);

        if self.active.is_none() {
            return update;
        }

        update.running_score = Some(self.accumulate(sample, flags));

        if let Some(speed) = speed_mph {
            match self.state() {
                TripState::Driving if speed < self.config.stop_threshold_mph => {
                    self.cooldown.arm(sample.timestamp + self.config.cooldown());
                    update.transitions.push(TripTransition::CooldownStarted);
                }
                TripState::Cooldown if speed >= self.config.stop_threshold_mph => {
                    self.cooldown.cancel();
                    update.transitions.push(TripTransition::Resumed);
                }
                _ => {}
            }
        }

        update
    }

    /// Map a clock reading onto the sample timeline
    fn sample_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.timeline {
            Some((latest, processed_at)) => latest + (now - processed_at).max(Duration::zero()),
            None => now,
        }
    }

    fn expire(&mut self, at: DateTime<Utc>) -> Option<Trip> {
        let deadline = self.cooldown.fired(at)?;
        self.finalize(deadline)
    }

    fn open_trip(
        &mut self,
        start: DateTime<Utc>,
        coordinate: Coordinate,
        destination: Option<String>,
    ) -> Trip {
        let trip = Trip::new(&self.device_id, start, coordinate, destination);
        log::info!(
            "Trip {} started at ({:.5}, {:.5})",
            trip.id,
            coordinate.latitude,
            coordinate.longitude
        );
        self.pending_start = None;
        self.cooldown.cancel();
        self.trip_previous = None;
        self.active = Some(trip.clone());
        trip
    }

    /// Fold one sample into the active trip and return the running score
    fn accumulate(&mut self, sample: &Sample, flags: &EventFlags) -> u32 {
        let Some(trip) = self.active.as_mut() else {
            return 100;
        };

        if let Some(previous) = self.trip_previous {
            trip.distance_m += previous.distance_m(&sample.coordinate);
        }
        self.trip_previous = Some(sample.coordinate);

        if let Some(speed) = sample.speed_mph() {
            trip.max_speed_mph = trip.max_speed_mph.max(speed);
        }

        if flags.speeding {
            trip.counters.speeding += 1;
        }
        if flags.hard_stop {
            trip.counters.hard_stops += 1;
        }
        if flags.sharp_turn {
            trip.counters.sharp_turns += 1;
        }
        if flags.pothole {
            trip.counters.potholes += 1;
        }

        trip.sample_count += 1;
        trip.end_coordinate = Some(sample.coordinate);
        trip.driver_score = self.scorer.score(&trip.counters);
        trip.driver_score
    }

    fn finalize(&mut self, end_time: DateTime<Utc>) -> Option<Trip> {
        let mut trip = self.active.take()?;
        self.cooldown.cancel();
        self.trip_previous = None;

        let end_time = end_time.max(trip.start_time);
        trip.end_time = Some(end_time);
        if trip.end_coordinate.is_none() {
            trip.end_coordinate = self.last_coordinate.or(Some(trip.start_coordinate));
        }

        let seconds = (end_time - trip.start_time).num_milliseconds() as f64 / 1000.0;
        trip.average_speed_mph = Some(if seconds > 0.0 {
            mps_to_mph(trip.distance_m / seconds)
        } else {
            0.0
        });

        self.scorer.apply(&mut trip);

        log::info!(
            "Trip {} ended: {:.2} mi, max {:.1} mph, score {}",
            trip.id,
            trip.distance_miles(),
            trip.max_speed_mph,
            trip.driver_score
        );
        Some(trip)
    }
}

use crate::clock::Clock;
use crate::config::TelemetryConfig;
use crate::error::Result;
use crate::events::{EventFlags, MotionEventDetector, SafetyEvent};
use crate::lifecycle::{StartOutcome, TripState, TripStateMachine, TripTransition};
use crate::score::{summarize, DriverScoreEngine, ScoreSummary};
use crate::sink::store::dedup_trips;
use crate::sink::{Delivery, DurableRecordSink, FlushReport, RecordStore};
use crate::speed_limit::{SpeedLimitResolver, SpeedLimitResult};
use crate::types::{Coordinate, InertialReading, Sample, Trip};
use crate::validation::{validate_sample, SampleQuality};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Everything one accepted sample produced
#[derive(Clone, Debug)]
pub struct IngestOutcome {
    pub quality: SampleQuality,
    pub speed_limit: Option<SpeedLimitResult>,
    pub flags: EventFlags,
    /// Events counted against the active trip
    pub events: Vec<SafetyEvent>,
    pub transitions: Vec<TripTransition>,
    pub trip_state: TripState,
    /// Trip whose cooldown ran out before this sample
    pub finished_trip: Option<Trip>,
    pub running_score: Option<u32>,
    pub delivery: Delivery,
}

/// Single-writer state: detector and trip machine mutate together, in arrival order
struct Pipeline {
    detector: MotionEventDetector,
    trips: TripStateMachine,
    history: Vec<Trip>,
}

/// Telemetry pipeline for one device
///
/// Per sample: validate, look up the limit without blocking, detect events,
/// advance the trip lifecycle, then hand the sample (and any finished trip)
/// to the durable sink.
pub struct TelemetryService {
    device_id: String,
    config: TelemetryConfig,
    clock: Arc<dyn Clock>,
    pipeline: Mutex<Pipeline>,
    resolver: Arc<SpeedLimitResolver>,
    sink: Arc<DurableRecordSink>,
}

impl TelemetryService {
    /// Build the full pipeline from config
    pub fn new(
        config: TelemetryConfig,
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let resolver = Arc::new(SpeedLimitResolver::from_config(&config.resolver, clock.clone()));
        Self::with_resolver(config, resolver, store, clock)
    }

    /// Build with a preconfigured resolver
    pub fn with_resolver(
        config: TelemetryConfig,
        resolver: Arc<SpeedLimitResolver>,
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let device_id = config.device_id.clone();
        let pipeline = Pipeline {
            detector: MotionEventDetector::new(config.detector.clone()),
            trips: TripStateMachine::new(&device_id, config.trip.clone(), DriverScoreEngine::default()),
            history: Vec::new(),
        };
        let sink = Arc::new(DurableRecordSink::new(
            &device_id,
            config.sink.clone(),
            store,
            clock.clone(),
        ));

        log::info!("Telemetry service ready for device {}", device_id);

        Ok(TelemetryService {
            device_id,
            config,
            clock,
            pipeline: Mutex::new(pipeline),
            resolver,
            sink,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn sink(&self) -> &Arc<DurableRecordSink> {
        &self.sink
    }

    /// Manual trip start, opening at the last known position
    pub async fn start_trip(&self, destination: Option<String>) -> StartOutcome {
        let now = self.clock.now();
        self.pipeline.lock().await.trips.start_trip(destination, now)
    }

    /// Manual trip stop; the finished trip is scored and persisted
    pub async fn end_trip(&self) -> Option<Trip> {
        let now = self.clock.now();
        let trip = {
            let mut pipeline = self.pipeline.lock().await;
            let trip = match pipeline.trips.end_trip(now) {
                Ok(trip) => trip,
                Err(e) => {
                    log::warn!("end_trip ignored: {}", e);
                    return None;
                }
            };
            pipeline.history.push(trip.clone());
            trip
        };
        self.sink.submit_trip(trip.clone()).await;
        Some(trip)
    }

    pub async fn ingest(&self, sample: Sample) -> Result<IngestOutcome> {
        let now = self.clock.now();
        let quality = match validate_sample(&sample, now, &self.config.validation) {
            Ok(quality) => quality,
            Err(e) => {
                log::warn!("Rejected sample at {}: {}", sample.timestamp, e);
                return Err(e);
            }
        };
        if quality.stale {
            log::debug!("Stale sample ({}s old)", quality.age.num_seconds());
        }

        let speed_limit = self.resolver.limit_for_sample(sample.coordinate);
        let limit_mph = speed_limit.as_ref().map(|l| f64::from(l.speed_limit_mph));

        let (flags, update, trip_state, active) = {
            let mut pipeline = self.pipeline.lock().await;
            let flags = pipeline.detector.evaluate(&sample, limit_mph);
            let update = pipeline.trips.on_sample_at(&sample, &flags, now);
            if let Some(trip) = &update.finished {
                pipeline.history.push(trip.clone());
            }
            let active = pipeline.trips.current_trip().is_some();
            (flags, update, pipeline.trips.state(), active)
        };

        if let Some(trip) = &update.finished {
            self.sink.submit_trip(trip.clone()).await;
        }

        let events = if active { flags.events(&sample) } else { Vec::new() };
        let delivery = self.sink.submit_sample(sample).await;

        Ok(IngestOutcome {
            quality,
            speed_limit,
            flags,
            events,
            transitions: update.transitions,
            trip_state,
            finished_trip: update.finished,
            running_score: update.running_score,
            delivery,
        })
    }

    /// Feed the inertial stream; readings are matched to the next fix
    pub async fn record_inertial(&self, reading: InertialReading) {
        self.pipeline.lock().await.detector.record_inertial(reading);
    }

    pub async fn current_trip(&self) -> Option<Trip> {
        self.pipeline.lock().await.trips.current_trip().cloned()
    }

    pub async fn trip_state(&self) -> TripState {
        self.pipeline.lock().await.trips.state()
    }

    /// Fire an expired cooldown and deliver an aged batch
    pub async fn tick(&self) -> Option<Trip> {
        let now = self.clock.now();
        let finished = {
            let mut pipeline = self.pipeline.lock().await;
            let trip = pipeline.trips.tick(now);
            if let Some(trip) = &trip {
                pipeline.history.push(trip.clone());
            }
            trip
        };

        if let Some(trip) = &finished {
            self.sink.submit_trip(trip.clone()).await;
        }
        self.sink.tick().await;
        finished
    }

    /// Resolve a limit, waiting for the cascade
    pub async fn resolve_speed_limit(&self, coordinate: Coordinate) -> Option<SpeedLimitResult> {
        self.resolver.resolve(coordinate).await
    }

    pub fn clear_speed_limit_cache(&self) {
        self.resolver.clear_cache();
    }

    /// Summary over every finalized trip: stored, still queued, or finished
    /// in this session
    pub async fn driver_score_summary(&self) -> ScoreSummary {
        let mut trips = match self.sink.store().trips(&self.device_id).await {
            Ok(trips) => trips,
            Err(e) => {
                log::warn!("Trip history unavailable, summarizing local trips: {}", e);
                Vec::new()
            }
        };
        trips.extend(self.sink.queued_trips().await);
        trips.extend(self.pipeline.lock().await.history.iter().cloned());
        summarize(&dedup_trips(trips))
    }

    pub async fn flush_pending_writes(&self) -> FlushReport {
        self.sink.flush().await
    }

    pub fn set_online(&self, online: bool) {
        self.sink.set_online(online);
    }
}

//! Driving telemetry pipeline: trip detection, safety events, speed limits,
//! driver scoring and durable delivery of samples and trips.

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod score;
pub mod service;
pub mod sink;
pub mod speed_limit;
pub mod types;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TelemetryConfig;
pub use error::{Result, TelemetryError};
pub use events::{EventFlags, EventKind, MotionEventDetector, SafetyEvent};
pub use lifecycle::{StartOutcome, TripState, TripStateMachine, TripTransition};
pub use score::{summarize, DriverScoreEngine, ScoreSummary};
pub use service::{IngestOutcome, TelemetryService};
pub use sink::{DurableRecordSink, FlushReport, JsonFileStore, MemoryStore, Record, RecordStore};
pub use speed_limit::{Confidence, LimitSource, SpeedLimitResolver, SpeedLimitResult};
pub use types::{Coordinate, InertialReading, InertialVector, Sample, Trip, ViolationCounters};

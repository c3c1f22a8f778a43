use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use clap::Parser;
use drive_telemetry::{
    Coordinate, InertialReading, InertialVector, JsonFileStore, ManualClock, RecordStore, Sample,
    TelemetryConfig, TelemetryService,
};
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const STANDARD_GRAVITY: f64 = 9.80665;

#[derive(Parser, Debug)]
#[command(name = "drive_telemetry")]
#[command(about = "Replay a recorded drive through the telemetry pipeline", long_about = None)]
struct Args {
    /// Sample log (*.json or *.json.gz)
    #[arg(value_name = "LOG")]
    log: PathBuf,

    /// Pipeline config (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Device id, overrides the config
    #[arg(long)]
    device: Option<String>,

    /// Directory for the JSON-lines record store
    #[arg(long, default_value = "drive_telemetry_store")]
    store_dir: PathBuf,

    /// Crowd-sourced speed limit dataset (entries or Overpass dump, optionally gzipped)
    #[arg(long)]
    speed_limits: Option<PathBuf>,

    /// Curated road list (JSON)
    #[arg(long)]
    curated: Option<PathBuf>,

    /// Print the summary as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

/// Sensor log as recorded on the phone: epoch seconds, accel in m/s^2
#[derive(Deserialize)]
struct GpsData {
    timestamp: f64,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default)]
    bearing: Option<f64>,
    #[serde(default)]
    accuracy: Option<f64>,
    #[serde(default)]
    altitude: Option<f64>,
}

#[derive(Deserialize)]
struct AccelData {
    timestamp: f64,
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Deserialize)]
struct Reading {
    #[serde(default)]
    accel: Option<AccelData>,
    #[serde(default)]
    gps: Option<GpsData>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReplayLog {
    Readings { readings: Vec<Reading> },
    Samples(Vec<Sample>),
}

enum Event {
    Fix(Sample),
    Inertial(InertialReading),
}

impl Event {
    fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::Fix(sample) => sample.timestamp,
            Event::Inertial(reading) => reading.timestamp,
        }
    }
}

fn epoch_seconds(t: f64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt((t * 1000.0).round() as i64).single()
}

fn fix_from_gps(gps: &GpsData, at: DateTime<Utc>) -> Sample {
    let mut sample = Sample::new(Coordinate::new(gps.latitude, gps.longitude), at);
    if let Some(speed) = gps.speed {
        sample = sample.with_speed_mps(speed);
    }
    if let Some(bearing) = gps.bearing {
        sample = sample.with_heading(bearing);
    }
    if let Some(accuracy) = gps.accuracy {
        sample = sample.with_accuracy(accuracy);
    }
    if let Some(altitude) = gps.altitude {
        sample = sample.with_altitude(altitude);
    }
    sample
}

fn load_log(path: &Path) -> Result<ReplayLog> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        let reader = BufReader::new(GzDecoder::new(file));
        Ok(serde_json::from_reader(reader)?)
    } else {
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Flatten a log into time-ordered fixes and inertial readings
fn events(log: ReplayLog) -> Vec<Event> {
    let mut events = match log {
        ReplayLog::Samples(samples) => samples.into_iter().map(Event::Fix).collect(),
        ReplayLog::Readings { readings } => {
            let mut events = Vec::new();
            for reading in readings {
                if let Some(gps) = reading.gps {
                    if let Some(at) = epoch_seconds(gps.timestamp) {
                        events.push(Event::Fix(fix_from_gps(&gps, at)));
                    }
                }
                if let Some(accel) = reading.accel {
                    if let Some(at) = epoch_seconds(accel.timestamp) {
                        events.push(Event::Inertial(InertialReading {
                            timestamp: at,
                            vector: InertialVector::new(
                                accel.x / STANDARD_GRAVITY,
                                accel.y / STANDARD_GRAVITY,
                                accel.z / STANDARD_GRAVITY,
                            ),
                        }));
                    }
                }
            }
            events
        }
    };
    events.sort_by_key(Event::timestamp);
    events
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TelemetryConfig::load(path)?,
        None => TelemetryConfig::default(),
    };
    if let Some(device) = args.device {
        config.device_id = device;
    }
    if args.speed_limits.is_some() {
        config.resolver.crowd_dataset_path = args.speed_limits;
    }
    if args.curated.is_some() {
        config.resolver.curated_path = args.curated;
    }

    let events = events(load_log(&args.log)?);
    let Some(first) = events.first() else {
        anyhow::bail!("{} contains no samples", args.log.display());
    };

    let clock = Arc::new(ManualClock::new(first.timestamp()));
    let store = Arc::new(JsonFileStore::new(&args.store_dir));
    let service = TelemetryService::new(config, store.clone(), clock.clone())?;

    let mut accepted = 0usize;
    let mut rejected = 0usize;
    let mut safety_events = 0usize;

    for event in events {
        clock.set(event.timestamp());
        match event {
            Event::Inertial(reading) => service.record_inertial(reading).await,
            Event::Fix(sample) => match service.ingest(sample).await {
                Ok(outcome) => {
                    accepted += 1;
                    safety_events += outcome.events.len();
                    if let Some(trip) = outcome.finished_trip {
                        log::info!("Trip {} finished, score {}", trip.id, trip.driver_score);
                    }
                }
                Err(_) => rejected += 1,
            },
        }
        service.tick().await;
        // Let background speed limit lookups land before the next fix
        tokio::task::yield_now().await;
    }

    if let Some(trip) = service.end_trip().await {
        log::info!("Trip {} closed at end of log", trip.id);
    }

    let report = service.flush_pending_writes().await;
    if report.pending > 0 || !report.dropped.is_empty() {
        log::warn!(
            "{} writes still queued, {} dropped",
            report.pending,
            report.dropped.len()
        );
    }

    let trips = store.trips(service.device_id()).await?;
    let summary = service.driver_score_summary().await;

    if args.json {
        let output = serde_json::json!({
            "device_id": service.device_id(),
            "samples_accepted": accepted,
            "samples_rejected": rejected,
            "trips": trips,
            "summary": summary,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("=== Replay: {} ===", args.log.display());
    println!("  Samples: {} accepted, {} rejected", accepted, rejected);
    println!("  Safety events: {}", safety_events);
    println!();
    for trip in &trips {
        let minutes = trip.duration(trip.start_time).num_seconds() as f64 / 60.0;
        println!(
            "  {}  {:>6.2} mi  {:>5.1} min  max {:>5.1} mph  score {:>3}  (speeding {}, hard stops {}, sharp turns {}, potholes {})",
            trip.id,
            trip.distance_miles(),
            minutes,
            trip.max_speed_mph,
            trip.driver_score,
            trip.counters.speeding,
            trip.counters.hard_stops,
            trip.counters.sharp_turns,
            trip.counters.potholes
        );
    }
    println!();
    println!(
        "  Average score {:.1} over {} trips, {:.2} mi",
        summary.average_score,
        summary.trip_count,
        summary.total_distance_m / 1609.344
    );

    Ok(())
}

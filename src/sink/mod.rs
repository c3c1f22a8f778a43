pub mod connectivity;
pub mod durable;
pub mod offline_queue;
pub mod store;

pub use connectivity::ConnectivityMonitor;
pub use durable::{Delivery, DurableRecordSink, FlushReport};
pub use offline_queue::{OfflineQueue, QueuedOperation};
pub use store::{JsonFileStore, MemoryStore};

use crate::error::Result;
use crate::types::{Sample, Trip};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Unit of persisted data
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Record {
    Samples(Vec<Sample>),
    Trip(Trip),
}

impl Record {
    pub fn kind(&self) -> &'static str {
        match self {
            Record::Samples(_) => "samples",
            Record::Trip(_) => "trip",
        }
    }
}

/// Remote (or local) persistence for telemetry records
///
/// A write either lands every record or fails as a whole.
pub trait RecordStore: Send + Sync {
    fn write<'a>(&'a self, device_id: &'a str, records: Vec<Record>) -> BoxFuture<'a, Result<()>>;

    /// Finalized trips stored for a device, oldest first
    fn trips<'a>(&'a self, device_id: &'a str) -> BoxFuture<'a, Result<Vec<Trip>>>;
}

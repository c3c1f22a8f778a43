use super::{ConnectivityMonitor, OfflineQueue, QueuedOperation, Record, RecordStore};
use crate::clock::Clock;
use crate::config::{SinkConfig, SinkMode};
use crate::error::{Result, TelemetryError};
use crate::types::{Sample, Trip};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

/// What happened to a submitted record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Held in the open batch
    Buffered,
    /// Parked in the offline queue
    Queued,
}

/// Outcome of one `flush` pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlushReport {
    pub delivered: usize,
    /// Attempted, failed, still queued
    pub failed: usize,
    /// Hit the retry ceiling and were discarded
    pub dropped: Vec<QueuedOperation>,
    /// Left in the queue after the pass
    pub pending: usize,
}

struct SinkState {
    batch: Vec<Sample>,
    batch_started: Option<DateTime<Utc>>,
    queue: OfflineQueue,
}

/// Write path from the pipeline to a `RecordStore`
///
/// # Modes
/// - `Batched`: samples accumulate until the batch size or age is reached,
///   a failed batch is queued as one operation
/// - `OfflineQueued`: every sample is written at once, failures are queued
///
/// Trips are always written immediately. Queued operations are retried by
/// `flush` after the backoff and dropped after `max_retries` failed attempts.
/// Flushes never overlap, so no queued operation is in flight twice.
pub struct DurableRecordSink {
    device_id: String,
    config: SinkConfig,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    connectivity: ConnectivityMonitor,
    state: Mutex<SinkState>,
    flush_lock: Mutex<()>,
}

impl DurableRecordSink {
    pub fn new(
        device_id: &str,
        config: SinkConfig,
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let queue = match &config.queue_path {
            Some(path) => OfflineQueue::open(path),
            None => OfflineQueue::in_memory(),
        };

        DurableRecordSink {
            device_id: device_id.to_string(),
            config,
            store,
            clock,
            connectivity: ConnectivityMonitor::default(),
            state: Mutex::new(SinkState {
                batch: Vec::new(),
                batch_started: None,
                queue,
            }),
            flush_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub async fn submit_sample(&self, sample: Sample) -> Delivery {
        match self.config.mode {
            SinkMode::OfflineQueued => self.deliver(vec![Record::Samples(vec![sample])]).await,
            SinkMode::Batched => {
                let now = self.clock.now();
                let ready = {
                    let mut state = self.state.lock().await;
                    state.batch.push(sample);
                    let started = *state.batch_started.get_or_insert(now);
                    let full = state.batch.len() >= self.config.batch_size;
                    let aged = now.signed_duration_since(started) >= self.config.batch_interval();
                    if full || aged {
                        Some(take_batch(&mut state))
                    } else {
                        None
                    }
                };

                match ready {
                    Some(batch) => self.deliver(vec![Record::Samples(batch)]).await,
                    None => Delivery::Buffered,
                }
            }
        }
    }

    /// Write a finished trip now; in batched mode the open batch goes with it
    pub async fn submit_trip(&self, trip: Trip) -> Delivery {
        let mut records = Vec::with_capacity(2);
        {
            let mut state = self.state.lock().await;
            if !state.batch.is_empty() {
                records.push(Record::Samples(take_batch(&mut state)));
            }
        }
        records.push(Record::Trip(trip));
        self.deliver(records).await
    }

    /// Deliver an aged batch when no new samples arrive to trigger it
    pub async fn tick(&self) -> Option<Delivery> {
        let now = self.clock.now();
        let batch = {
            let mut state = self.state.lock().await;
            let aged = state
                .batch_started
                .map(|started| now.signed_duration_since(started) >= self.config.batch_interval())
                .unwrap_or(false);
            if !aged || state.batch.is_empty() {
                return None;
            }
            take_batch(&mut state)
        };
        Some(self.deliver(vec![Record::Samples(batch)]).await)
    }

    /// Retry queued operations whose backoff has elapsed
    ///
    /// The open batch, if any, is delivered first.
    pub async fn flush(&self) -> FlushReport {
        let _flushing = self.flush_lock.lock().await;
        let mut report = FlushReport::default();

        let open_batch = {
            let mut state = self.state.lock().await;
            (!state.batch.is_empty()).then(|| take_batch(&mut state))
        };
        if let Some(batch) = open_batch {
            if self.deliver(vec![Record::Samples(batch)]).await == Delivery::Delivered {
                report.delivered += 1;
            }
        }

        if !self.connectivity.is_online() {
            report.pending = self.pending_operations().await;
            return report;
        }

        let now = self.clock.now();
        let due = self
            .state
            .lock()
            .await
            .queue
            .due(now, self.config.retry_backoff());

        for op in due {
            let result = self.write(&op.device_id, op.records.clone()).await;

            let mut state = self.state.lock().await;
            match result {
                Ok(()) => {
                    state.queue.remove(op.id);
                    report.delivered += 1;
                }
                Err(e) => {
                    let retries = state
                        .queue
                        .record_failure(op.id, now, &e.to_string())
                        .unwrap_or(self.config.max_retries);
                    if retries >= self.config.max_retries {
                        if let Some(dropped) = state.queue.remove(op.id) {
                            log::error!(
                                "Dropping queued {} operation {} after {} attempts: {}",
                                dropped.kind(),
                                dropped.id,
                                retries,
                                e
                            );
                            report.dropped.push(dropped);
                        }
                    } else {
                        log::warn!(
                            "Queued operation {} failed (attempt {}/{}): {}",
                            op.id,
                            retries,
                            self.config.max_retries,
                            e
                        );
                        report.failed += 1;
                    }
                }
            }
        }

        let state = self.state.lock().await;
        persist(&state.queue);
        report.pending = state.queue.len();

        if report.delivered > 0 || !report.dropped.is_empty() {
            log::info!(
                "Flush: {} delivered, {} failed, {} dropped, {} pending",
                report.delivered,
                report.failed,
                report.dropped.len(),
                report.pending
            );
        }
        report
    }

    /// Update connectivity; coming back online starts a background flush
    pub fn set_online(self: &Arc<Self>, online: bool) {
        if !self.connectivity.set(online) {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let this = Arc::clone(self);
                handle.spawn(async move {
                    this.flush().await;
                });
            }
            Err(_) => log::debug!("No runtime for automatic flush"),
        }
    }

    pub async fn pending_operations(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Finalized trips still waiting in the offline queue
    pub async fn queued_trips(&self) -> Vec<Trip> {
        let state = self.state.lock().await;
        state
            .queue
            .operations()
            .flat_map(|op| op.records.iter())
            .filter_map(|record| match record {
                Record::Trip(trip) => Some(trip.clone()),
                Record::Samples(_) => None,
            })
            .collect()
    }

    pub async fn buffered_samples(&self) -> usize {
        self.state.lock().await.batch.len()
    }

    async fn deliver(&self, records: Vec<Record>) -> Delivery {
        if !self.connectivity.is_online() {
            self.enqueue(records, None).await;
            return Delivery::Queued;
        }

        match self.write(&self.device_id, records.clone()).await {
            Ok(()) => Delivery::Delivered,
            Err(e) => {
                log::warn!("Write failed, queueing for retry: {}", e);
                self.enqueue(records, Some(e.to_string())).await;
                Delivery::Queued
            }
        }
    }

    async fn write(&self, device_id: &str, records: Vec<Record>) -> Result<()> {
        let timeout = self.config.store_timeout();
        match tokio::time::timeout(timeout, self.store.write(device_id, records)).await {
            Ok(result) => result,
            Err(_) => Err(TelemetryError::Store(format!(
                "write timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    async fn enqueue(&self, records: Vec<Record>, error: Option<String>) {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.queue.enqueue(&self.device_id, records, now, error);
        persist(&state.queue);
    }
}

fn take_batch(state: &mut SinkState) -> Vec<Sample> {
    state.batch_started = None;
    std::mem::take(&mut state.batch)
}

fn persist(queue: &OfflineQueue) {
    if let Err(e) = queue.persist() {
        log::error!("Failed to persist offline queue: {}", e);
    }
}

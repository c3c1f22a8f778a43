use super::Record;
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

/// A write that could not be delivered
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: u64,
    pub device_id: String,
    pub records: Vec<Record>,
    pub enqueued_at: DateTime<Utc>,
    /// Failed flush attempts so far
    pub retry_count: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl QueuedOperation {
    /// "trip" when any record is a trip, so a lost trip is never reported as samples
    pub fn kind(&self) -> &'static str {
        if self.records.iter().any(|r| matches!(r, Record::Trip(_))) {
            return "trip";
        }
        match self.records.first() {
            Some(record) => record.kind(),
            None => "empty",
        }
    }

    /// Backoff since the last attempt has elapsed
    pub fn is_due(&self, now: DateTime<Utc>, backoff: Duration) -> bool {
        match self.last_attempt {
            Some(last) => now.signed_duration_since(last) >= backoff,
            None => true,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueFile {
    next_id: u64,
    operations: VecDeque<QueuedOperation>,
}

/// FIFO of undelivered writes, mirrored to disk when a path is set
///
/// # File Format
/// Pretty JSON `{ "next_id": n, "operations": [...] }`, replaced atomically
/// through a `.tmp` sibling so a crash mid-save leaves the previous queue.
#[derive(Debug)]
pub struct OfflineQueue {
    path: Option<PathBuf>,
    state: QueueFile,
}

impl OfflineQueue {
    pub fn in_memory() -> Self {
        OfflineQueue {
            path: None,
            state: QueueFile::default(),
        }
    }

    /// Open a persisted queue, starting empty if the file is missing or unreadable
    pub fn open(path: &Path) -> Self {
        let state = match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str::<QueueFile>(&json) {
                Ok(state) => {
                    log::info!(
                        "Restored {} queued operations from {}",
                        state.operations.len(),
                        path.display()
                    );
                    state
                }
                Err(e) => {
                    log::warn!("Discarding unreadable queue {}: {}", path.display(), e);
                    QueueFile::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => QueueFile::default(),
            Err(e) => {
                log::warn!("Failed to read queue {}: {}", path.display(), e);
                QueueFile::default()
            }
        };

        OfflineQueue {
            path: Some(path.to_path_buf()),
            state,
        }
    }

    pub fn enqueue(
        &mut self,
        device_id: &str,
        records: Vec<Record>,
        now: DateTime<Utc>,
        error: Option<String>,
    ) -> u64 {
        let id = self.state.next_id;
        self.state.next_id += 1;
        self.state.operations.push_back(QueuedOperation {
            id,
            device_id: device_id.to_string(),
            records,
            enqueued_at: now,
            retry_count: 0,
            last_attempt: error.as_ref().map(|_| now),
            last_error: error,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.state.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.operations.is_empty()
    }

    pub fn operations(&self) -> impl Iterator<Item = &QueuedOperation> {
        self.state.operations.iter()
    }

    /// Operations whose backoff has elapsed, oldest first
    pub fn due(&self, now: DateTime<Utc>, backoff: Duration) -> Vec<QueuedOperation> {
        self.state
            .operations
            .iter()
            .filter(|op| op.is_due(now, backoff))
            .cloned()
            .collect()
    }

    pub fn remove(&mut self, id: u64) -> Option<QueuedOperation> {
        let index = self.state.operations.iter().position(|op| op.id == id)?;
        self.state.operations.remove(index)
    }

    /// Record a failed attempt; returns the new retry count
    pub fn record_failure(&mut self, id: u64, now: DateTime<Utc>, error: &str) -> Option<u32> {
        let op = self.state.operations.iter_mut().find(|op| op.id == id)?;
        op.retry_count += 1;
        op.last_attempt = Some(now);
        op.last_error = Some(error.to_string());
        Some(op.retry_count)
    }

    /// Write the queue to disk; no-op for in-memory queues
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&self.state)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

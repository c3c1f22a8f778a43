use super::SpeedLimitResult;
use crate::types::Coordinate;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Cache slot: coordinate quantized to the configured precision
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct CacheKey {
    pub lat: i64,
    pub lon: i64,
}

impl CacheKey {
    pub fn from_coordinate(coordinate: &Coordinate, precision_deg: f64) -> Self {
        CacheKey {
            lat: (coordinate.latitude / precision_deg).round() as i64,
            lon: (coordinate.longitude / precision_deg).round() as i64,
        }
    }
}

/// Bounded LRU of resolved limits keyed by ~5 m slots
///
/// Slots are small so a limit resolved on one street does not bleed onto a
/// parallel street. A write never replaces a more confident entry.
pub struct SpeedLimitCache {
    precision_deg: f64,
    entries: Mutex<LruCache<CacheKey, SpeedLimitResult>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SpeedLimitCache {
    pub fn new(capacity: usize, precision_deg: f64) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        SpeedLimitCache {
            precision_deg,
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn key_for(&self, coordinate: &Coordinate) -> CacheKey {
        CacheKey::from_coordinate(coordinate, self.precision_deg)
    }

    pub fn get(&self, coordinate: &Coordinate) -> Option<SpeedLimitResult> {
        let key = self.key_for(coordinate);
        let found = self.lock().get(&key).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Store a result; returns false when a more confident entry already holds the slot
    pub fn insert(&self, coordinate: &Coordinate, result: SpeedLimitResult) -> bool {
        let key = self.key_for(coordinate);
        let mut entries = self.lock();
        if let Some(existing) = entries.peek(&key) {
            if existing.confidence > result.confidence {
                return false;
            }
        }
        entries.put(key, result);
        true
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<CacheKey, SpeedLimitResult>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

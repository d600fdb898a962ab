//! Cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Value, json};

/// A point-in-time view of coordinator activity.
///
/// Counters are cumulative since the coordinator was created; `entries`
/// and `pending` describe the moment the snapshot was taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Frames currently cached.
    pub entries: usize,
    /// Maximum number of cached frames.
    pub capacity: usize,
    /// Extractions currently in flight.
    pub pending: usize,
    /// Requests answered straight from the cache.
    pub hits: u64,
    /// Requests that had to wait for an extraction.
    pub misses: u64,
    /// Misses that joined an extraction already in flight.
    pub joined: u64,
    /// Decoder runs started.
    pub extractions: u64,
    /// Decoder runs that produced no frame.
    pub failures: u64,
    /// Requests abandoned through cancellation.
    pub cancellations: u64,
    /// Frames pushed out by the LRU policy.
    pub evictions: u64,
    /// Frames added to the cache.
    pub insertions: u64,
}

impl CacheStats {
    /// Share of requests served from the cache, in percent (0.0 – 100.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Machine-readable form used by the command-line tool.
    pub fn to_json(&self) -> Value {
        json!({
            "entries": self.entries,
            "capacity": self.capacity,
            "pending": self.pending,
            "hits": self.hits,
            "misses": self.misses,
            "joined": self.joined,
            "extractions": self.extractions,
            "failures": self.failures,
            "cancellations": self.cancellations,
            "evictions": self.evictions,
            "insertions": self.insertions,
            "hit_rate": self.hit_rate(),
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) joined: AtomicU64,
    pub(crate) extractions: AtomicU64,
    pub(crate) failures: AtomicU64,
    pub(crate) cancellations: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) insertions: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entries: usize, capacity: usize, pending: usize) -> CacheStats {
        CacheStats {
            entries,
            capacity,
            pending,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            extractions: self.extractions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
        }
    }
}

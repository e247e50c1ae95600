//! Application context shared by all request handlers and background tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use shiftcast_core::config::Config;
use shiftcast_db::pool::DbPool;
use shiftcast_media::ring::RingBuffer;

use crate::chunkstore::ChunkStore;

/// Application context shared via axum state.
///
/// This is cheaply cloneable because it only holds `Arc`s and the pool
/// handle (itself an `Arc` internally).
#[derive(Clone)]
pub struct AppContext {
    /// Database connection pool.
    pub db: DbPool,
    /// Immutable application configuration.
    pub config: Arc<Config>,
    /// On-disk segment store for hls streams.
    pub store: Arc<ChunkStore>,
    /// Per-stream ring buffers for icy streams, keyed by stream id.
    pub rings: Arc<DashMap<String, Arc<RingBuffer>>>,
    /// Per-stream transient fetch error counters.
    pub fetch_errors: Arc<FetchErrorCounters>,
}

/// Monotonic per-stream counters for upstream fetch failures.
///
/// Transient errors never kill a fetcher, so a climbing counter is the only
/// externally visible sign of a struggling upstream.
#[derive(Default)]
pub struct FetchErrorCounters {
    counters: DashMap<String, AtomicU64>,
}

impl FetchErrorCounters {
    pub fn increment(&self, stream_id: &str) {
        self.counters
            .entry(stream_id.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, stream_id: &str) -> u64 {
        self.counters
            .get(stream_id)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Snapshot of all counters, sorted by stream id.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let mut all: Vec<(String, u64)> = self
            .counters
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        all.sort();
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let counters = FetchErrorCounters::default();
        assert_eq!(counters.get("jjj"), 0);

        counters.increment("jjj");
        counters.increment("jjj");
        counters.increment("pbs");

        assert_eq!(counters.get("jjj"), 2);
        assert_eq!(counters.get("pbs"), 1);
        assert_eq!(
            counters.snapshot(),
            vec![("jjj".to_string(), 2), ("pbs".to_string(), 1)]
        );
    }
}

//! Periodic garbage collection of expired chunks and idle sessions.
//!
//! Chunk deletion runs row-then-file inside one transaction per chunk: a
//! crash between the two steps leaves an orphan file (harmless, the delete
//! is idempotent and retried implicitly), never an index row pointing at a
//! missing file.
//!
//! The fixed-bitrate rings are self-overwriting and need no collection.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use shiftcast_core::{Error, Result};
use shiftcast_db::pool::get_conn;
use shiftcast_db::queries::{chunks, sessions};

use crate::context::AppContext;

/// How often a collection cycle runs.
const GC_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Sessions idle longer than this are dropped.
const SESSION_MAX_AGE: Duration = Duration::from_secs(12 * 60 * 60);

/// Upper bound on chunk deletions per cycle.
const MAX_CHUNKS_PER_CYCLE: i64 = 1000;

/// Outcome of one collection cycle.
#[derive(Debug, Default, PartialEq)]
pub struct GcStats {
    pub sessions_removed: usize,
    pub chunks_removed: usize,
}

/// Run the collector until cancelled. A cycle runs immediately at startup,
/// then hourly. Cycle failures are logged and retried next interval.
pub async fn run_gc(ctx: AppContext, cancel: CancellationToken) {
    tracing::info!("garbage collector started");

    loop {
        match collect(&ctx) {
            Ok(stats) => {
                tracing::debug!(
                    sessions = stats.sessions_removed,
                    chunks = stats.chunks_removed,
                    "gc cycle complete"
                );
            }
            Err(e) => tracing::error!("gc cycle failed: {e}"),
        }

        tokio::select! {
            _ = tokio::time::sleep(GC_INTERVAL) => {}
            _ = cancel.cancelled() => break,
        }
    }

    tracing::info!("garbage collector stopped");
}

/// One collection cycle.
pub fn collect(ctx: &AppContext) -> Result<GcStats> {
    let now = Utc::now();
    let conn = get_conn(&ctx.db)?;
    let mut stats = GcStats::default();

    tracing::debug!("gc sessions");
    let session_cutoff = now
        - chrono::Duration::from_std(SESSION_MAX_AGE)
            .map_err(|e| Error::Internal(e.to_string()))?;
    stats.sessions_removed = sessions::delete_idle(&conn, session_cutoff)?;

    tracing::debug!("gc chunks");
    let chunk_cutoff = now
        - chrono::Duration::from_std(ctx.config.max_offset)
            .map_err(|e| Error::Internal(e.to_string()))?;
    let expired = chunks::expired(&conn, chunk_cutoff, MAX_CHUNKS_PER_CYCLE)?;

    for record in expired {
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;

        chunks::delete(&tx, record.id)?;
        ctx.store.delete_chunk(&record.stream_id, &record.chunk_id)?;

        tx.commit().map_err(|e| Error::database(e.to_string()))?;
        stats.chunks_removed += 1;
    }

    Ok(stats)
}

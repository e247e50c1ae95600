//! Chunk index operations.
//!
//! The chunk index is an append-only log: one row per stored chunk, with a
//! dense per-stream `sequence` assigned at insert time. HLS players key off
//! the sequence (EXT-X-MEDIA-SEQUENCE), so assignment must never produce a
//! gap or a duplicate within a stream.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use shiftcast_core::{Error, Result};

use crate::models::{store_ts, ChunkRecord};

/// Record a stored chunk, assigning the next sequence for its stream.
///
/// The sequence is computed inside the INSERT (`COALESCE(MAX(sequence),0)+1`
/// over the same stream) so assignment is atomic; SQLite serializes writers,
/// so two streams never interfere and one stream never collides with
/// itself. Re-recording an existing `(stream_id, chunk_id)` is a no-op.
pub fn record_chunk(
    conn: &Connection,
    stream_id: &str,
    chunk_id: &str,
    duration: f64,
    fetched_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO chunks (sequence, stream_id, chunk_id, duration, fetched_at)
         SELECT COALESCE(MAX(sequence), 0) + 1, ?1, ?2, ?3, ?4
         FROM chunks WHERE stream_id = ?1",
        rusqlite::params![stream_id, chunk_id, duration, store_ts(fetched_at)],
    )
    .map_err(|e| Error::database(format!("inserting chunk {stream_id}/{chunk_id}: {e}")))?;
    Ok(())
}

/// The appropriate playback start sequence for a stream at a target time.
///
/// Returns the sequence of the latest chunk fetched strictly before
/// `before`, or the oldest chunk's sequence when nothing is old enough
/// (the target predates the retained window). Fails only when the stream
/// has no chunks at all.
pub fn sequence_for(conn: &Connection, stream_id: &str, before: DateTime<Utc>) -> Result<i64> {
    let latest = conn.query_row(
        "SELECT sequence FROM chunks WHERE stream_id = ?1 AND fetched_at < ?2
         ORDER BY fetched_at DESC LIMIT 1",
        rusqlite::params![stream_id, store_ts(before)],
        |row| row.get(0),
    );
    match latest {
        Ok(seq) => Ok(seq),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            let oldest = conn.query_row(
                "SELECT sequence FROM chunks WHERE stream_id = ?1
                 ORDER BY fetched_at ASC LIMIT 1",
                [stream_id],
                |row| row.get(0),
            );
            match oldest {
                Ok(seq) => Ok(seq),
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    Err(Error::not_found("chunks for stream", stream_id))
                }
                Err(e) => Err(Error::database(format!("getting oldest sequence: {e}"))),
            }
        }
        Err(e) => Err(Error::database(format!("getting sequence before time: {e}"))),
    }
}

/// Rows with `sequence >= start_sequence`, ascending, up to `limit`.
pub fn chunks(
    conn: &Connection,
    stream_id: &str,
    start_sequence: i64,
    limit: i64,
) -> Result<Vec<ChunkRecord>> {
    let q = format!(
        "SELECT {} FROM chunks WHERE stream_id = ?1 AND sequence >= ?2
         ORDER BY sequence ASC LIMIT ?3",
        ChunkRecord::COLS
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(
            rusqlite::params![stream_id, start_sequence, limit],
            ChunkRecord::from_row,
        )
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// Rows older than `cutoff`, oldest first, up to `limit`. All streams.
pub fn expired(conn: &Connection, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<ChunkRecord>> {
    let q = format!(
        "SELECT {} FROM chunks WHERE fetched_at < ?1
         ORDER BY fetched_at ASC LIMIT ?2",
        ChunkRecord::COLS
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(rusqlite::params![store_ts(cutoff), limit], ChunkRecord::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// Delete one index row by row id. Returns whether a row was deleted.
pub fn delete(conn: &Connection, id: i64) -> Result<bool> {
    let n = conn
        .execute("DELETE FROM chunks WHERE id = ?1", [id])
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Indexed chunk counts per stream, for the metrics endpoint.
pub fn counts(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn
        .prepare("SELECT stream_id, COUNT(*) FROM chunks GROUP BY stream_id ORDER BY stream_id")
        .map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

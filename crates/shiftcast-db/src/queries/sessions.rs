//! Session store operations.
//!
//! Sessions are keyed by sid and hold one JSON blob of playback state.
//! Unknown sids read as the zero value, so handlers can treat every
//! request as having a session without an explicit create step.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use shiftcast_core::{Error, Result, SessionId};

use crate::models::{store_ts, SessionData};

/// Fetch session data, or the zero value when the sid is unknown.
pub fn get(conn: &Connection, sid: SessionId) -> Result<SessionData> {
    let blob = conn.query_row(
        "SELECT data FROM sessions WHERE id = ?1",
        [sid.to_string()],
        |row| row.get::<_, String>(0),
    );
    match blob {
        Ok(json) => serde_json::from_str(&json)
            .map_err(|e| Error::database(format!("unmarshaling session {sid}: {e}"))),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(SessionData::default()),
        Err(e) => Err(Error::database(format!("getting session {sid}: {e}"))),
    }
}

/// Upsert session data, stamping `updated_at` so the garbage collector can
/// expire idle sessions.
pub fn set(conn: &Connection, sid: SessionId, data: &SessionData) -> Result<()> {
    let json = serde_json::to_string(data)
        .map_err(|e| Error::Internal(format!("marshaling session {sid}: {e}")))?;
    conn.execute(
        "INSERT INTO sessions (id, data, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        rusqlite::params![sid.to_string(), json, store_ts(Utc::now())],
    )
    .map_err(|e| Error::database(format!("upserting session {sid}: {e}")))?;
    Ok(())
}

/// Delete sessions not updated since `cutoff`. Returns how many were removed.
pub fn delete_idle(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize> {
    conn.execute(
        "DELETE FROM sessions WHERE updated_at < ?1",
        [store_ts(cutoff)],
    )
    .map_err(|e| Error::database(format!("gc sessions: {e}")))
}

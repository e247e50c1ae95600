//! Rust structs mapping to database tables.
//!
//! Each model implements `from_row` for constructing itself from a
//! `rusqlite::Row`. Timestamps are stored as RFC 3339 text in UTC with a
//! fixed precision so that SQL string comparison orders them correctly.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Render a timestamp the way this schema stores it.
///
/// Fixed microsecond precision and a `Z` suffix keep the text
/// lexicographically ordered, which the fetched_at range queries rely on.
pub fn store_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

// ---------------------------------------------------------------------------
// ChunkRecord
// ---------------------------------------------------------------------------

/// One indexed chunk of audio.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    /// Row id, used by the garbage collector to address deletions.
    pub id: i64,
    /// Dense per-stream sequence number, starting at 1.
    pub sequence: i64,
    pub stream_id: String,
    /// Segment URL basename (hls) or slot index rendered as text (ring).
    pub chunk_id: String,
    /// Playable length in seconds.
    pub duration: f64,
    /// When the chunk was durably stored.
    pub fetched_at: DateTime<Utc>,
}

impl ChunkRecord {
    pub const COLS: &'static str = "id, sequence, stream_id, chunk_id, duration, fetched_at";

    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let fetched: String = row.get(5)?;
        Ok(Self {
            id: row.get(0)?,
            sequence: row.get(1)?,
            stream_id: row.get(2)?,
            chunk_id: row.get(3)?,
            duration: row.get(4)?,
            fetched_at: parse_ts(5, &fetched)?,
        })
    }
}

// ---------------------------------------------------------------------------
// SessionData
// ---------------------------------------------------------------------------

/// Persisted playback state for one listener session.
///
/// Stored as a single JSON blob in the `sessions` table. The zero value is
/// a valid fresh session; every field defaults so unknown sids can be
/// treated as new.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionData {
    /// The sequence of the first media segment in the playlist we serve,
    /// i.e. what EXT-X-MEDIA-SEQUENCE is set to. 0 means uninitialized.
    pub latest_sequence: i64,
    /// When `latest_sequence` was first exposed to this client.
    pub introduced_at: Option<DateTime<Utc>>,
    #[serde(rename = "streamID")]
    pub stream_id: String,
    pub timezone: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn store_ts_is_fixed_width() {
        let a = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let b = a + chrono::Duration::milliseconds(500);
        let (sa, sb) = (store_ts(a), store_ts(b));
        assert_eq!(sa.len(), sb.len());
        assert!(sa < sb);
        assert!(sa.ends_with('Z'));
    }

    #[test]
    fn session_zero_value_round_trips() {
        let zero = SessionData::default();
        assert_eq!(zero.latest_sequence, 0);
        assert!(zero.introduced_at.is_none());

        let json = serde_json::to_string(&zero).unwrap();
        let back: SessionData = serde_json::from_str(&json).unwrap();
        assert_eq!(zero, back);

        // an empty object is also a valid fresh session
        let fresh: SessionData = serde_json::from_str("{}").unwrap();
        assert_eq!(fresh, zero);
    }

    #[test]
    fn session_field_names_are_camel_case() {
        let data = SessionData {
            latest_sequence: 7,
            introduced_at: Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()),
            stream_id: "jjj".into(),
            timezone: "Europe/London".into(),
        };
        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains("\"latestSequence\":7"), "{json}");
        assert!(json.contains("\"introducedAt\""), "{json}");
        assert!(json.contains("\"streamID\":\"jjj\""), "{json}");
    }
}

//! Time-shifted HLS playlist handler.
//!
//! Each listener gets a session (minted on first contact via a 303
//! redirect) holding an anchor sequence: the sequence of the first segment
//! in their playlist window. Successive requests slide the anchor forward
//! in real time, so EXT-X-MEDIA-SEQUENCE is monotone and a segment stays at
//! the head of the window exactly as long as its play time.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use shiftcast_core::config::SourceKind;
use shiftcast_core::{offset, Error, SessionId};
use shiftcast_db::models::{ChunkRecord, SessionData};
use shiftcast_db::pool::get_conn;
use shiftcast_db::queries::{chunks, sessions};
use shiftcast_media::hls::{generate_media_playlist, MediaPlaylist, Segment};

use crate::context::AppContext;
use crate::error::AppError;

/// Segments per emitted playlist window.
const WINDOW_SIZE: usize = 3;

#[derive(Debug, Deserialize)]
pub struct PlaylistQuery {
    stream: Option<String>,
    tz: Option<String>,
    sid: Option<String>,
}

/// GET /m3u8?stream=<id>&tz=<IANA>[&sid=<uuid>]
pub async fn serve_playlist(
    State(ctx): State<AppContext>,
    Query(query): Query<PlaylistQuery>,
) -> Result<Response, AppError> {
    let (stream_id, tz) = match (&query.stream, &query.tz) {
        (Some(s), Some(t)) if !s.is_empty() && !t.is_empty() => (s.clone(), t.clone()),
        _ => {
            return Err(Error::Validation("stream and tz must be present on query".into()).into())
        }
    };

    let stream = ctx
        .config
        .stream(&stream_id)
        .filter(|s| s.source == SourceKind::Hls)
        .ok_or_else(|| Error::not_found("stream", &stream_id))?;

    // First contact: mint a session id and bounce the client back with it,
    // so every poll thereafter carries a stable sid.
    let Some(sid) = query.sid.as_deref() else {
        let sid = SessionId::new();
        return Ok(Redirect::to(&format!("/m3u8?stream={stream_id}&tz={tz}&sid={sid}")).into_response());
    };
    let sid: SessionId = sid
        .parse()
        .map_err(|_| Error::Validation(format!("invalid sid {sid:?}")))?;

    let now = Utc::now();
    let conn = get_conn(&ctx.db)?;
    let mut session = sessions::get(&conn, sid)?;

    if session.latest_sequence == 0 {
        let shift = offset::offset_between(&stream.base_timezone, &tz)?;
        let target = now - shift;
        // A stream with nothing recorded yet is a server-side problem, not
        // a bad request: surface it as a 500 like any other empty window.
        session.latest_sequence =
            chunks::sequence_for(&conn, &stream_id, target).map_err(|e| match e {
                Error::NotFound { .. } => Error::Internal(format!("no chunks for {stream_id}")),
                other => other,
            })?;
        session.introduced_at = Some(now);
        session.stream_id = stream_id.clone();
        session.timezone = tz.clone();
        tracing::debug!(%sid, stream = %stream_id, offset = %shift, sequence = session.latest_sequence, "session anchored");
    }

    let rows = chunks::chunks(
        &conn,
        &stream_id,
        session.latest_sequence,
        (WINDOW_SIZE * 2) as i64,
    )?;
    if rows.len() < WINDOW_SIZE + 1 {
        return Err(Error::Internal(format!(
            "only {} chunks available for {stream_id}",
            rows.len()
        ))
        .into());
    }

    let start = advance_window(&mut session, &rows, now);
    let window = &rows[start..start + WINDOW_SIZE];

    let playlist = MediaPlaylist {
        media_sequence: session.latest_sequence,
        segments: window
            .iter()
            .map(|c| Segment {
                uri: format!("/segment/{stream_id}/{}", c.chunk_id),
                duration: c.duration,
            })
            .collect(),
    };

    // Persist on every request, if only to refresh updated_at so the GC
    // keeps its hands off live sessions.
    sessions::set(&conn, sid, &session)?;

    Ok((
        StatusCode::OK,
        [("content-type", "application/x-mpegURL")],
        generate_media_playlist(&playlist),
    )
        .into_response())
}

/// Apply the sliding-window advance policy. Returns the index into `rows`
/// the emitted window starts at, updating the session's anchor.
///
/// - The anchor row is gone (collected): snap to the oldest row we got.
/// - The head segment's real-time lifetime has elapsed: slide forward one.
/// - Otherwise hold position, so a polling player sees a stable window
///   until the head segment has actually played out.
fn advance_window(session: &mut SessionData, rows: &[ChunkRecord], now: DateTime<Utc>) -> usize {
    if rows[0].sequence != session.latest_sequence {
        session.latest_sequence = rows[0].sequence;
        session.introduced_at = Some(now);
        return 0;
    }

    let head_lifetime = Duration::milliseconds((rows[0].duration * 1000.0) as i64);
    let elapsed = match session.introduced_at {
        Some(at) => at < now - head_lifetime,
        // latest_sequence > 0 implies introduced_at is set; reset if not.
        None => true,
    };

    if elapsed {
        session.latest_sequence = rows[1].sequence;
        session.introduced_at = Some(now);
        1
    } else {
        0
    }
}

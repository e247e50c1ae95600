//! Direct (icecast-style) streaming handler.
//!
//! Serves a continuous `audio/aacp` byte stream at the listener's timezone
//! offset. The response body is produced by a pump task that reads chunks,
//! strips container framing where needed, and paces itself against the
//! wall clock with a fixed 30-second lead: the client gets a fast-start
//! burst, then real-time delivery with no cumulative drift.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use shiftcast_core::config::SourceKind;
use shiftcast_core::{offset, Error};
use shiftcast_media::ring::{Cursor, RingBuffer};
use shiftcast_media::ts::TsDemuxer;

use crate::context::AppContext;
use crate::error::AppError;

/// How far ahead of real time the client is kept. This is the minimum
/// buffer the listener always has against network hiccups.
const STREAM_BUFFER: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct IcecastQuery {
    stream: Option<String>,
    tz: Option<String>,
}

/// GET /icecast?stream=<id>&tz=<IANA>
pub async fn serve_icecast(
    State(ctx): State<AppContext>,
    Query(query): Query<IcecastQuery>,
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
        .ok_or_else(|| Error::not_found("stream", &stream_id))?
        .clone();

    let shift = offset::offset_between(&stream.base_timezone, &tz)?;
    let target = Utc::now() - shift;
    tracing::debug!(stream = %stream_id, %tz, offset = %shift, "icecast stream starting");

    // Everything that can fail with a proper status must fail before the
    // headers go out; after this point errors just end the body.
    let (tx, rx) = mpsc::channel::<std::result::Result<Bytes, std::io::Error>>(2);

    match stream.source {
        SourceKind::Hls => {
            let conn = shiftcast_db::pool::get_conn(&ctx.db)?;
            let start_sequence = shiftcast_db::queries::chunks::sequence_for(
                &conn,
                &stream_id,
                target,
            )
            .map_err(|e| Error::Internal(format!("getting sequence for {stream_id}: {e}")))?;
            drop(conn);

            tokio::spawn(pump_hls(ctx.clone(), stream_id.clone(), start_sequence, tx));
        }
        SourceKind::Icy => {
            let ring = ctx
                .rings
                .get(&stream_id)
                .map(|r| r.value().clone())
                .ok_or_else(|| {
                    Error::Internal(format!("ring for {stream_id} is not initialized"))
                })?;
            let cursor = ring.clone().cursor_from(target);

            tokio::spawn(pump_ring(stream_id.clone(), ring, cursor, tx));
        }
    }

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "audio/aacp")
        .header("icy-name", stream.name.as_str())
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .map_err(|e| Error::Internal(format!("building response: {e}")))?;
    Ok(response)
}

/// Pump demuxed audio from indexed hls chunks to the client.
async fn pump_hls(
    ctx: AppContext,
    stream_id: String,
    mut sequence: i64,
    tx: mpsc::Sender<std::result::Result<Bytes, std::io::Error>>,
) {
    let stream_start = Instant::now();
    let mut served = Duration::ZERO;
    let mut demuxer = TsDemuxer::new();

    loop {
        let record = {
            let conn = match shiftcast_db::pool::get_conn(&ctx.db) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!(stream = %stream_id, "getting connection: {e}");
                    return;
                }
            };
            match shiftcast_db::queries::chunks::chunks(&conn, &stream_id, sequence, 1) {
                Ok(rows) => match rows.into_iter().next() {
                    Some(r) => r,
                    None => {
                        tracing::warn!(stream = %stream_id, sequence, "got no chunks");
                        return;
                    }
                },
                Err(e) => {
                    tracing::error!(stream = %stream_id, sequence, "getting chunk: {e}");
                    return;
                }
            }
        };

        let path = match ctx.store.reader_path(&stream_id, &record.chunk_id) {
            Ok(p) => p,
            Err(e) => {
                // GC raced us; nothing sane to serve mid-stream.
                tracing::warn!(stream = %stream_id, chunk = %record.chunk_id, "getting chunk reader: {e}");
                return;
            }
        };
        let data = match tokio::fs::read(&path).await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(stream = %stream_id, chunk = %record.chunk_id, "reading chunk: {e}");
                return;
            }
        };

        let audio = demuxer.demux(&data);
        if tx.send(Ok(Bytes::from(audio))).await.is_err() {
            tracing::debug!(stream = %stream_id, "client disconnected");
            return;
        }

        served += Duration::from_secs_f64(record.duration);
        sequence = record.sequence + 1;

        tokio::time::sleep(pacing_sleep(stream_start.elapsed(), served)).await;
    }
}

/// Pump raw ring slots to the client.
async fn pump_ring(
    stream_id: String,
    ring: Arc<RingBuffer>,
    mut cursor: Cursor,
    tx: mpsc::Sender<std::result::Result<Bytes, std::io::Error>>,
) {
    let stream_start = Instant::now();
    let mut served = Duration::ZERO;
    let slot_time = Duration::from_secs(u64::from(ring.chunk_secs()));

    loop {
        let read = cursor.next();
        if read.timestamp == 0 {
            // Ran into a slot nothing has written yet.
            tracing::warn!(stream = %stream_id, "ring has no more data");
            return;
        }
        if read.gap {
            tracing::debug!(stream = %stream_id, "ring reader hit a discontinuity");
        }

        if tx.send(Ok(Bytes::from(read.payload))).await.is_err() {
            tracing::debug!(stream = %stream_id, "client disconnected");
            return;
        }

        served += slot_time;
        tokio::time::sleep(pacing_sleep(stream_start.elapsed(), served)).await;
    }
}

/// How long to sleep so the client stays exactly `STREAM_BUFFER` ahead.
///
/// `elapsed` is wall time since the response started, `served` the total
/// play time sent. Computing from wall clock rather than accumulated
/// sleeps means timer quantization never drifts the stream.
fn pacing_sleep(elapsed: Duration, served: Duration) -> Duration {
    served.saturating_sub(elapsed + STREAM_BUFFER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_time_stream_does_not_sleep() {
        // 60s in, 90s served, 30s buffer: exactly on target.
        assert_eq!(
            pacing_sleep(Duration::from_secs(60), Duration::from_secs(90)),
            Duration::ZERO
        );
    }

    #[test]
    fn ahead_of_target_sleeps_the_difference() {
        assert_eq!(
            pacing_sleep(Duration::from_secs(60), Duration::from_secs(100)),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn behind_target_never_sleeps() {
        assert_eq!(
            pacing_sleep(Duration::from_secs(60), Duration::from_secs(30)),
            Duration::ZERO
        );
    }

    #[test]
    fn long_running_stream_paces_by_wall_clock() {
        // An hour in and 50s ahead of real time: sleep 20s past the buffer.
        assert_eq!(
            pacing_sleep(Duration::from_secs(3600), Duration::from_secs(3650)),
            Duration::from_secs(20)
        );
    }
}

//! ICY/Shoutcast stream fetcher.
//!
//! One task per icy stream, reading the continuous byte stream in
//! fixed-size chunks (one ring slot each) and writing them into the
//! stream's ring buffer. Connection failures back off five seconds and
//! reconnect forever; only cancellation ends the loop.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use chrono::Utc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use shiftcast_core::config::StreamConfig;
use shiftcast_core::{Error, Result};
use shiftcast_media::ring::RingBuffer;

use crate::fetcher::UPSTREAM_TIMEOUT;

/// Delay before reconnecting after any connection or read failure.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Run the read loop for one icy stream until cancelled.
pub async fn run_icy_fetcher(stream: StreamConfig, ring: Arc<RingBuffer>, cancel: CancellationToken) {
    tracing::info!(stream = %stream.id, url = %stream.url, "icy fetcher started");

    // No total timeout here: the response body never ends. The connect
    // timeout still bounds a dead upstream.
    let client = match reqwest::Client::builder()
        .connect_timeout(UPSTREAM_TIMEOUT)
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(stream = %stream.id, "building http client: {e}");
            return;
        }
    };

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match read_stream(&client, &stream, &ring, &cancel).await {
            Ok(()) => break, // cancelled mid-read
            Err(e) => {
                tracing::warn!(stream = %stream.id, "reading from connection: {e}");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
            _ = cancel.cancelled() => break,
        }
    }

    tracing::info!(stream = %stream.id, "icy fetcher stopped");
}

/// Open one connection and pump chunks into the ring until it drops.
///
/// Returns `Ok(())` only on cancellation; connection EOF or errors come
/// back as `Err` so the caller backs off and reconnects.
async fn read_stream(
    client: &reqwest::Client,
    stream: &StreamConfig,
    ring: &RingBuffer,
    cancel: &CancellationToken,
) -> Result<()> {
    let response = client
        .get(&stream.url)
        .send()
        .await
        .map_err(|e| Error::upstream(&stream.url, e.to_string()))?;

    if response.status() != reqwest::StatusCode::OK {
        return Err(Error::upstream(
            &stream.url,
            format!("stream returned non-200 status: {}", response.status().as_u16()),
        ));
    }

    check_advertised_bitrate(stream, response.headers());
    tracing::info!(stream = %stream.id, "connection established");

    let chunk_len = ring.chunk_len();
    let mut buf = BytesMut::with_capacity(chunk_len * 2);
    let mut body = Box::pin(response.bytes_stream());

    loop {
        let frame = tokio::select! {
            frame = body.next() => frame,
            _ = cancel.cancelled() => return Ok(()),
        };

        match frame {
            Some(Ok(data)) => buf.extend_from_slice(&data),
            Some(Err(e)) => return Err(Error::upstream(&stream.url, e.to_string())),
            None => return Err(Error::upstream(&stream.url, "connection closed")),
        }

        while buf.len() >= chunk_len {
            let chunk = buf.split_to(chunk_len);
            ring.write_chunk(Utc::now(), &chunk)?;
        }
    }
}

/// Compare the `icy-br` header (kbit/s) against the configured bitrate.
///
/// The ring's geometry is immutable, so a mismatch can only be surfaced,
/// not honored.
fn check_advertised_bitrate(stream: &StreamConfig, headers: &reqwest::header::HeaderMap) {
    let advertised_kbps = headers
        .get("icy-br")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u32>().ok());

    if let (Some(kbps), Some(configured)) = (advertised_kbps, stream.bitrate) {
        if kbps * 1000 != configured {
            tracing::warn!(
                stream = %stream.id,
                advertised_kbps = kbps,
                configured_bps = configured,
                "upstream advertises a different bitrate than configured; keeping ring geometry"
            );
        }
    }
}

//! HLS stream fetcher.
//!
//! One fetcher task per hls stream. Each tick fetches the publisher's
//! playlist, downloads any segments not yet stored, and reschedules itself
//! at 75% of the downloaded window (never under five seconds) so there is
//! slack to retry before the publisher rolls segments out of its window.
//!
//! Nothing upstream is fatal: network errors, non-200s, and parse failures
//! are logged, counted, and retried on the next tick.

use std::time::Duration;

use m3u8_rs::Playlist;
use tokio_util::sync::CancellationToken;
use url::Url;

use shiftcast_core::config::StreamConfig;
use shiftcast_core::{Error, Result};

use crate::context::AppContext;

/// Floor for the poll interval; also the retry delay when nothing was
/// downloaded.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Total timeout for any single upstream request.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the fetch loop for one hls stream until cancelled.
pub async fn run_fetcher(ctx: AppContext, stream: StreamConfig, cancel: CancellationToken) {
    tracing::info!(stream = %stream.id, url = %stream.url, "hls fetcher started");

    let client = match reqwest::Client::builder().timeout(UPSTREAM_TIMEOUT).build() {
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

        let interval = match poll_once(&client, &ctx, &stream).await {
            Ok(window) => {
                // 75% of the fetched window gives headroom to retry before
                // the publisher rolls it.
                let next = window.mul_f64(0.75);
                if next < MIN_POLL_INTERVAL {
                    MIN_POLL_INTERVAL
                } else {
                    next
                }
            }
            Err(e) => {
                ctx.fetch_errors.increment(&stream.id);
                tracing::warn!(stream = %stream.id, "getting playlist: {e}");
                MIN_POLL_INTERVAL
            }
        };

        tracing::debug!(stream = %stream.id, ?interval, "fetcher sleeping");
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => break,
        }
    }

    tracing::info!(stream = %stream.id, "hls fetcher stopped");
}

/// One playlist poll. Returns the total duration of the processed window.
///
/// Segment failures do not abort the window: each one is logged, bumps the
/// stream's error counter, and the remaining segments are still attempted.
async fn poll_once(
    client: &reqwest::Client,
    ctx: &AppContext,
    stream: &StreamConfig,
) -> Result<Duration> {
    let url = Url::parse(&stream.url)
        .map_err(|e| Error::upstream(&stream.url, format!("parsing url: {e}")))?;
    let (playlist, playlist_url) = get_media_playlist(client, url).await?;

    let mut window = Duration::ZERO;
    for segment in &playlist.segments {
        match download_segment(client, ctx, stream, &playlist_url, segment).await {
            Ok(()) => window += Duration::from_secs_f64(segment.duration.into()),
            Err(e) => {
                ctx.fetch_errors.increment(&stream.id);
                tracing::warn!(stream = %stream.id, uri = %segment.uri, "downloading segment: {e}");
            }
        }
    }

    Ok(window)
}

/// Fetch a playlist; when it is a master playlist, follow the variant with
/// the highest bandwidth (one level of recursion).
async fn get_media_playlist(
    client: &reqwest::Client,
    url: Url,
) -> Result<(m3u8_rs::MediaPlaylist, Url)> {
    let (playlist, final_url) = fetch_playlist(client, url).await?;
    match playlist {
        Playlist::MediaPlaylist(media) => Ok((media, final_url)),
        Playlist::MasterPlaylist(master) => {
            let best = master
                .variants
                .iter()
                .max_by_key(|v| v.bandwidth)
                .ok_or_else(|| {
                    Error::upstream(final_url.as_str(), "master playlist has no variants")
                })?;
            tracing::debug!(
                url = %final_url,
                bandwidth = best.bandwidth,
                "master playlist, following best variant"
            );
            let variant_url = resolve_segment_url(&final_url, &best.uri)?;
            let (playlist, variant_final) = fetch_playlist(client, variant_url).await?;
            match playlist {
                Playlist::MediaPlaylist(media) => Ok((media, variant_final)),
                Playlist::MasterPlaylist(_) => Err(Error::upstream(
                    variant_final.as_str(),
                    "variant resolved to another master playlist",
                )),
            }
        }
    }
}

/// GET and parse one playlist, returning it with the post-redirect URL that
/// relative segment URIs resolve against.
async fn fetch_playlist(client: &reqwest::Client, url: Url) -> Result<(Playlist, Url)> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| Error::upstream(url.as_str(), e.to_string()))?;

    if response.status() != reqwest::StatusCode::OK {
        return Err(Error::upstream(
            url.as_str(),
            format!("wanted 200, got: {}", response.status().as_u16()),
        ));
    }

    let final_url = response.url().clone();
    let body = response
        .bytes()
        .await
        .map_err(|e| Error::upstream(final_url.as_str(), e.to_string()))?;

    let playlist = m3u8_rs::parse_playlist_res(&body)
        .map_err(|e| Error::upstream(final_url.as_str(), format!("reading playlist: {e:?}")))?;
    Ok((playlist, final_url))
}

/// Resolve and download one segment into the store, skipping ones already
/// present.
async fn download_segment(
    client: &reqwest::Client,
    ctx: &AppContext,
    stream: &StreamConfig,
    playlist_url: &Url,
    segment: &m3u8_rs::MediaSegment,
) -> Result<()> {
    let segment_url = resolve_segment_url(playlist_url, &segment.uri)?;
    let chunk_name = chunk_name_from_url(&segment_url)?;

    if ctx.store.chunk_exists(&stream.id, &chunk_name) {
        tracing::debug!(stream = %stream.id, chunk_name, "chunk exists, skipping");
        return Ok(());
    }

    tracing::debug!(stream = %stream.id, chunk_name, url = %segment_url, "downloading chunk");
    let response = client
        .get(segment_url.clone())
        .send()
        .await
        .map_err(|e| Error::upstream(segment_url.as_str(), e.to_string()))?;

    if response.status() != reqwest::StatusCode::OK {
        return Err(Error::upstream(
            segment_url.as_str(),
            format!("wanted 200, got: {}", response.status().as_u16()),
        ));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| Error::upstream(segment_url.as_str(), e.to_string()))?;

    ctx.store
        .write_chunk(&stream.id, &chunk_name, segment.duration.into(), &body)
}

/// Resolve a segment or variant URI against the playlist it came from.
fn resolve_segment_url(playlist_url: &Url, segment: &str) -> Result<Url> {
    playlist_url
        .join(segment)
        .map_err(|e| Error::upstream(segment, format!("resolving against playlist url: {e}")))
}

/// The chunk id for a segment: the basename of its URL path.
fn chunk_name_from_url(url: &Url) -> Result<String> {
    let name = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .unwrap_or("");
    if name.is_empty() {
        return Err(Error::upstream(
            url.as_str(),
            "segment url has no basename",
        ));
    }
    Ok(name.to_string())
}

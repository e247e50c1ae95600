//! shiftcast-server: HTTP API, stream fetchers, and garbage collector.
//!
//! This crate ties the other shiftcast crates into a running relay:
//!
//! - Axum HTTP surface: playlist, segment, and icecast endpoints
//! - One fetcher task per configured stream (hls or icy flavor)
//! - Hourly garbage collection of expired chunks and idle sessions
//! - Graceful shutdown via signal handling and a shared cancellation token

pub mod chunkstore;
pub mod context;
pub mod error;
pub mod fetcher;
pub mod gc;
pub mod icy;
pub mod router;
pub mod routes;

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use shiftcast_core::config::{Config, SourceKind};
use shiftcast_core::{Error, Result};
use shiftcast_media::ring::RingBuffer;

use crate::chunkstore::ChunkStore;
use crate::context::{AppContext, FetchErrorCounters};

/// Build the shared [`AppContext`] from a validated config.
///
/// Creates the chunk and database directories, opens the pool, the chunk
/// store, and one ring per icy stream. Ring geometry mismatches and
/// unwritable paths abort startup.
pub fn build_context(config: Config) -> Result<AppContext> {
    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::create_dir_all(&config.chunk_dir)?;

    let db = shiftcast_db::pool::init_pool(&config.db_path.to_string_lossy())?;
    tracing::info!("database ready at {}", config.db_path.display());

    let stream_ids: Vec<&str> = config.streams.iter().map(|s| s.id.as_str()).collect();
    let store = Arc::new(ChunkStore::new(&config.chunk_dir, db.clone(), &stream_ids)?);

    let rings: Arc<DashMap<String, Arc<RingBuffer>>> = Arc::new(DashMap::new());
    let max_offset_secs = u32::try_from(config.max_offset.as_secs())
        .map_err(|_| Error::Validation("maxOffset too large".into()))?;
    for stream in config.streams.iter().filter(|s| s.source == SourceKind::Icy) {
        let bitrate = stream
            .bitrate
            .ok_or_else(|| Error::Validation(format!("{}: icy stream must have bitrate", stream.id)))?;
        let path = config.chunk_dir.join(format!("{}.ring", stream.id));
        let ring = RingBuffer::open(&path, bitrate, stream.chunk_secs, max_offset_secs)?;
        tracing::info!(
            stream = %stream.id,
            slots = ring.slots(),
            chunk_len = ring.chunk_len(),
            "ring ready at {}",
            path.display()
        );
        rings.insert(stream.id.clone(), Arc::new(ring));
    }

    Ok(AppContext {
        db,
        config: Arc::new(config),
        store,
        rings,
        fetch_errors: Arc::new(FetchErrorCounters::default()),
    })
}

/// Start the shiftcast server.
///
/// Initializes state, spawns the per-stream fetchers and the garbage
/// collector, and serves HTTP until a shutdown signal arrives. All
/// background tasks exit at their next tick boundary once the shared
/// cancellation token fires.
pub async fn start(config: Config) -> Result<()> {
    let listen = config.listen.clone();
    let ctx = build_context(config)?;

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    for stream in ctx.config.streams.iter().cloned() {
        match stream.source {
            SourceKind::Hls => {
                tasks.push(tokio::spawn(fetcher::run_fetcher(
                    ctx.clone(),
                    stream,
                    cancel.clone(),
                )));
            }
            SourceKind::Icy => {
                let ring = ctx
                    .rings
                    .get(&stream.id)
                    .map(|r| r.value().clone())
                    .ok_or_else(|| Error::Internal(format!("no ring for {}", stream.id)))?;
                tasks.push(tokio::spawn(icy::run_icy_fetcher(
                    stream,
                    ring,
                    cancel.clone(),
                )));
            }
        }
    }

    tasks.push(tokio::spawn(gc::run_gc(ctx.clone(), cancel.clone())));

    let app = router::build_router(ctx);
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .map_err(|e| Error::Internal(format!("binding {listen}: {e}")))?;
    tracing::info!("listening on {listen}");

    let shutdown_cancel = cancel.clone();
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received");
            shutdown_cancel.cancel();
        })
        .await;

    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }

    serve_result.map_err(|e| Error::Internal(format!("serving: {e}")))
}

/// Wait for ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!("installing SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_yaml(dir: &std::path::Path) -> String {
        format!(
            r#"
chunkDir: {chunks}
dbPath: {db}
streams:
  - {{id: jjj, name: Triple J, url: http://example/m.m3u8, baseTimezone: Australia/Sydney}}
  - {{id: pbs, name: PBS FM, url: http://example/s.aac, baseTimezone: Australia/Melbourne, source: icy, bitrate: 128000, chunkSecs: 2}}
"#,
            chunks = dir.join("chunks").display(),
            db = dir.join("state.db").display(),
        )
    }

    #[test]
    fn build_context_creates_dirs_db_and_rings() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_yaml(&config_yaml(dir.path())).unwrap();
        let ctx = build_context(config).unwrap();

        assert!(dir.path().join("chunks/jjj").is_dir());
        assert!(dir.path().join("state.db").exists());
        assert!(dir.path().join("chunks/pbs.ring").exists());

        let ring = ctx.rings.get("pbs").unwrap();
        // 128 kbit = 16 kB/sec, two-second slots over 24 hours.
        assert_eq!(ring.chunk_len(), 32_000);
        assert_eq!(ring.slots(), 43_200);
        assert!(!ctx.rings.contains_key("jjj"));
    }

    #[test]
    fn build_context_rejects_reconfigured_ring() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_yaml(&config_yaml(dir.path())).unwrap();
        build_context(config).unwrap();

        // Same paths, different bitrate: the existing ring must win.
        let yaml = config_yaml(dir.path()).replace("bitrate: 128000", "bitrate: 64000");
        let config = Config::from_yaml(&yaml).unwrap();
        let err = build_context(config).unwrap_err();
        assert!(matches!(err, Error::Geometry(_)));
    }
}

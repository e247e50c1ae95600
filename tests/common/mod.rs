//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which builds a full [`AppContext`] over an
//! in-memory database and a tempdir chunk store, and starts the real axum
//! router on a random port for HTTP-level testing.

use std::net::SocketAddr;
use std::sync::Arc;

use shiftcast_core::config::Config;
use shiftcast_db::pool::{init_memory_pool, DbPool};
use shiftcast_media::ring::RingBuffer;
use shiftcast_server::chunkstore::ChunkStore;
use shiftcast_server::context::{AppContext, FetchErrorCounters};
use shiftcast_server::router::build_router;

/// Test harness wrapping a fully-constructed [`AppContext`].
pub struct TestHarness {
    pub ctx: AppContext,
    pub db: DbPool,
    // Held so the chunk directory outlives the harness.
    _chunk_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Config with one hls stream (`jjj`, Sydney) and one icy stream
    /// (`pbs`, Melbourne) over throwaway paths.
    pub fn test_config(chunk_dir: &std::path::Path) -> Config {
        Config::from_yaml(&format!(
            r#"
chunkDir: {chunks}
dbPath: unused-in-tests
streams:
  - {{id: jjj, name: Triple J, url: http://upstream/jjj/master.m3u8, baseTimezone: Australia/Sydney}}
  - {{id: pbs, name: PBS FM, url: http://upstream/pbs/stream.aac, baseTimezone: Australia/Melbourne, source: icy, bitrate: 32, chunkSecs: 1}}
maxOffset: 60s
"#,
            chunks = chunk_dir.display(),
        ))
        .expect("test config is valid")
    }

    /// Create a new harness with the default two-stream configuration.
    pub fn new() -> Self {
        let chunk_dir = tempfile::tempdir().expect("tempdir");
        let config = Self::test_config(chunk_dir.path());
        let db = init_memory_pool().expect("failed to create in-memory pool");

        let store = Arc::new(
            ChunkStore::new(chunk_dir.path(), db.clone(), &["jjj", "pbs"]).expect("chunk store"),
        );

        // A tiny ring for the icy stream: 32 bit/s, 1s slots, 60s window.
        let ring = RingBuffer::open(&chunk_dir.path().join("pbs.ring"), 32, 1, 60).expect("ring");
        let rings = Arc::new(dashmap::DashMap::new());
        rings.insert("pbs".to_string(), Arc::new(ring));

        let ctx = AppContext {
            db: db.clone(),
            config: Arc::new(config),
            store,
            rings,
            fetch_errors: Arc::new(FetchErrorCounters::default()),
        };

        Self {
            ctx,
            db,
            _chunk_dir: chunk_dir,
        }
    }

    /// Start the router on a random port and return the harness with the
    /// bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        let harness = Self::new();
        let app = build_router(harness.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    /// A client that does not follow redirects, so 303s can be asserted.
    pub fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("client")
    }
}

/// Build one 188-byte TS packet on `pid` carrying a PES-wrapped payload,
/// front-padded with adaptation-field stuffing.
#[allow(dead_code)] // not every test binary demuxes
pub fn ts_audio_packet(pid: u16, es: &[u8]) -> Vec<u8> {
    let mut pes = vec![0x00, 0x00, 0x01, 0xC0, 0x00, 0x00, 0x80, 0x80, 0x00];
    pes.extend_from_slice(es);
    assert!(pes.len() <= 184, "payload too large for one packet");

    let mut pkt = Vec::with_capacity(188);
    pkt.push(0x47);
    pkt.push(0x40 | ((pid >> 8) as u8 & 0x1F)); // unit start
    pkt.push((pid & 0xFF) as u8);

    let pad = 184 - pes.len();
    if pad == 0 {
        pkt.push(0x10);
    } else {
        pkt.push(0x30);
        pkt.push((pad - 1) as u8);
        if pad > 1 {
            pkt.push(0x00);
            pkt.extend(std::iter::repeat(0xFF).take(pad - 2));
        }
    }
    pkt.extend_from_slice(&pes);
    assert_eq!(pkt.len(), 188);
    pkt
}

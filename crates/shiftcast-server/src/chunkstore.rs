//! On-disk segment store for hls streams.
//!
//! Segments live at `<chunk_dir>/<stream_id>/<chunk_id>` and are indexed in
//! the chunks table. The store keeps one invariant: an index row always
//! refers to a file that was fully written first. Writers write the file
//! and then record the row; the garbage collector deletes the row and then
//! the file.

use std::path::{Path, PathBuf};

use chrono::Utc;
use shiftcast_core::{Error, Result};
use shiftcast_db::pool::{get_conn, DbPool};
use shiftcast_db::queries::chunks;

/// Disk-backed chunk store rooted at the configured chunk directory.
pub struct ChunkStore {
    base: PathBuf,
    db: DbPool,
}

impl ChunkStore {
    /// Create the store, ensuring per-stream directories exist.
    pub fn new(base: impl Into<PathBuf>, db: DbPool, stream_ids: &[&str]) -> Result<Self> {
        let base = base.into();
        for id in stream_ids {
            std::fs::create_dir_all(base.join(id))?;
        }
        Ok(Self { base, db })
    }

    /// Reject chunk names that could escape the stream directory.
    pub fn valid_name(name: &str) -> bool {
        !name.is_empty()
            && !name.contains('/')
            && !name.contains('\\')
            && !name.contains("..")
            && !name.starts_with('.')
    }

    fn file_path(&self, stream_id: &str, chunk_name: &str) -> PathBuf {
        self.base.join(stream_id).join(chunk_name)
    }

    /// Whether a chunk file is already on disk.
    pub fn chunk_exists(&self, stream_id: &str, chunk_name: &str) -> bool {
        self.file_path(stream_id, chunk_name).exists()
    }

    /// Store a chunk and record it in the index.
    ///
    /// Idempotent: when the `(stream, chunk)` pair is already indexed the
    /// write is a no-op, so replayed playlist windows don't re-download or
    /// double-record.
    pub fn write_chunk(
        &self,
        stream_id: &str,
        chunk_name: &str,
        duration: f64,
        data: &[u8],
    ) -> Result<()> {
        if !Self::valid_name(chunk_name) {
            return Err(Error::Validation(format!("invalid chunk name {chunk_name:?}")));
        }
        if self.chunk_exists(stream_id, chunk_name) {
            tracing::debug!(stream_id, chunk_name, "chunk exists, skipping");
            return Ok(());
        }

        let path = self.file_path(stream_id, chunk_name);
        std::fs::write(&path, data)?;

        let conn = get_conn(&self.db)?;
        chunks::record_chunk(&conn, stream_id, chunk_name, duration, Utc::now())?;
        Ok(())
    }

    /// Path to a stored chunk, for serving.
    pub fn reader_path(&self, stream_id: &str, chunk_id: &str) -> Result<PathBuf> {
        if !Self::valid_name(chunk_id) {
            return Err(Error::Validation(format!("invalid chunk name {chunk_id:?}")));
        }
        let path = self.file_path(stream_id, chunk_id);
        if !path.exists() {
            return Err(Error::not_found("chunk", format!("{stream_id}/{chunk_id}")));
        }
        Ok(path)
    }

    /// Remove a chunk file. Missing files are fine; the GC may race a crash
    /// that already removed one.
    pub fn delete_chunk(&self, stream_id: &str, chunk_id: &str) -> Result<()> {
        if !Self::valid_name(chunk_id) {
            return Err(Error::Validation(format!("invalid chunk name {chunk_id:?}")));
        }
        match std::fs::remove_file(self.file_path(stream_id, chunk_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// The store's base directory.
    pub fn base(&self) -> &Path {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiftcast_db::pool::init_memory_pool;

    fn store() -> (tempfile::TempDir, ChunkStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = init_memory_pool().unwrap();
        let store = ChunkStore::new(dir.path(), db, &["jjj"]).unwrap();
        (dir, store)
    }

    #[test]
    fn write_creates_file_and_index_row() {
        let (_dir, store) = store();
        store.write_chunk("jjj", "c1.ts", 6.0, b"segment-bytes").unwrap();

        assert!(store.chunk_exists("jjj", "c1.ts"));
        let path = store.reader_path("jjj", "c1.ts").unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"segment-bytes");

        let conn = get_conn(&store.db).unwrap();
        let rows = chunks::chunks(&conn, "jjj", 1, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].chunk_id, "c1.ts");
        assert_eq!(rows[0].duration, 6.0);
    }

    #[test]
    fn write_is_idempotent() {
        let (_dir, store) = store();
        store.write_chunk("jjj", "c1.ts", 6.0, b"first").unwrap();
        store.write_chunk("jjj", "c1.ts", 6.0, b"second").unwrap();

        // The original bytes and single index row survive.
        let path = store.reader_path("jjj", "c1.ts").unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"first");

        let conn = get_conn(&store.db).unwrap();
        assert_eq!(chunks::chunks(&conn, "jjj", 1, 10).unwrap().len(), 1);
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, store) = store();
        store.write_chunk("jjj", "c1.ts", 6.0, b"bytes").unwrap();

        store.delete_chunk("jjj", "c1.ts").unwrap();
        assert!(!store.chunk_exists("jjj", "c1.ts"));
        store.delete_chunk("jjj", "c1.ts").unwrap();
    }

    #[test]
    fn traversal_names_are_rejected() {
        let (_dir, store) = store();
        for bad in ["../evil", "a/b", "a\\b", ".hidden", ""] {
            assert!(!ChunkStore::valid_name(bad), "{bad:?}");
            assert!(store.write_chunk("jjj", bad, 1.0, b"x").is_err());
            assert!(store.reader_path("jjj", bad).is_err());
        }
    }

    #[test]
    fn missing_chunk_reads_as_not_found() {
        let (_dir, store) = store();
        let err = store.reader_path("jjj", "nope.ts").unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}

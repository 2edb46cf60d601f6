//! Storage utility: path-keyed byte blobs with a size guard.
//!
//! Every write is checked against the configured maximum before the backend
//! is touched, so a rejected write leaves the previous content in place.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OptionalExtension, params};
use scriptor_config::{StorageBackendKind, StorageSection};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::resource::normalize_path;

pub use scriptor_config::DEFAULT_MAX_STORAGE_FILE_SIZE_IN_BYTES as MAX_STORAGE_FILE_SIZE_IN_BYTES;

/// Errors raised by the storage utility.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The blob exceeds the configured maximum.
    #[error("Storage write to '{path}' rejected: {size} bytes exceeds maximum of {max} bytes")]
    OversizeStorageWrite { path: String, size: usize, max: usize },

    #[error("Invalid storage path: '{0}'")]
    InvalidPath(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageEntry {
    pub path: String,
    pub size: usize,
    pub updated_at: DateTime<Utc>,
}

/// A place to keep blobs. Each call is atomic with respect to the others.
pub trait StorageBackend: Send + Sync {
    /// Insert or overwrite.
    fn put(&self, path: &str, data: &[u8]) -> StorageResult<()>;
    fn get(&self, path: &str) -> StorageResult<Option<Vec<u8>>>;
    /// Returns `false` if nothing was stored at `path`.
    fn delete(&self, path: &str) -> StorageResult<bool>;
    /// Remove everything; returns the number of removed entries.
    fn clear(&self) -> StorageResult<usize>;
    /// Entries at `prefix` or nested below it, ordered by path. `"/"` matches everything.
    fn list(&self, prefix: &str) -> StorageResult<Vec<StorageEntry>>;
}

/// Front door of the storage utility.
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn StorageBackend>,
    max_size: usize,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

impl Storage {
    /// Wrap a backend with the default size limit.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            max_size: MAX_STORAGE_FILE_SIZE_IN_BYTES,
        }
    }

    /// In-memory storage with the default size limit.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// SQLite-backed storage at `path`.
    pub fn open_sqlite(path: &Path) -> StorageResult<Self> {
        Ok(Self::new(Arc::new(SqliteBackend::open(path)?)))
    }

    /// Build from the `[storage]` section.
    pub fn from_config(section: &StorageSection) -> StorageResult<Self> {
        let storage = match (section.backend, section.path.as_deref()) {
            (StorageBackendKind::Memory, _) => Self::in_memory(),
            (StorageBackendKind::Sqlite, Some(path)) => Self::open_sqlite(path)?,
            (StorageBackendKind::Sqlite, None) => {
                return Err(StorageError::Backend(
                    "sqlite backend requires storage.path".to_string(),
                ));
            }
        };
        Ok(storage.with_max_size(section.max_file_size))
    }

    /// Lower the size limit. Values above [`MAX_STORAGE_FILE_SIZE_IN_BYTES`] are capped.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        if max_size > MAX_STORAGE_FILE_SIZE_IN_BYTES {
            warn!(
                requested = max_size,
                max = MAX_STORAGE_FILE_SIZE_IN_BYTES,
                "Storage size limit capped"
            );
        }
        self.max_size = max_size.min(MAX_STORAGE_FILE_SIZE_IN_BYTES);
        self
    }

    /// Current size limit in bytes.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Store `data` at `path`, overwriting any previous content.
    pub fn put(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        let path = key(path)?;
        if data.len() > self.max_size {
            return Err(StorageError::OversizeStorageWrite {
                path,
                size: data.len(),
                max: self.max_size,
            });
        }
        self.backend.put(&path, data)?;
        debug!(path = %path, bytes = data.len(), "Stored blob");
        Ok(())
    }

    /// Store a UTF-8 string.
    pub fn put_text(&self, path: &str, text: &str) -> StorageResult<()> {
        self.put(path, text.as_bytes())
    }

    pub fn get(&self, path: &str) -> StorageResult<Option<Vec<u8>>> {
        self.backend.get(&key(path)?)
    }

    /// Fetch as text (lossy for invalid UTF-8).
    pub fn get_text(&self, path: &str) -> StorageResult<Option<String>> {
        Ok(self
            .get(path)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    pub fn exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.get(path)?.is_some())
    }

    pub fn delete(&self, path: &str) -> StorageResult<bool> {
        self.backend.delete(&key(path)?)
    }

    pub fn clear(&self) -> StorageResult<usize> {
        let removed = self.backend.clear()?;
        debug!(removed, "Cleared storage");
        Ok(removed)
    }

    /// Entries under `prefix` (`"/"` lists everything).
    pub fn list(&self, prefix: &str) -> StorageResult<Vec<StorageEntry>> {
        let prefix = if prefix.trim_matches('/').is_empty() {
            "/".to_string()
        } else {
            key(prefix)?
        };
        self.backend.list(&prefix)
    }
}

fn key(path: &str) -> StorageResult<String> {
    normalize_path(path).map_err(|_| StorageError::InvalidPath(path.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory backend
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<String, (Vec<u8>, DateTime<Utc>)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn put(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        self.entries
            .write()
            .insert(path.to_string(), (data.to_vec(), Utc::now()));
        Ok(())
    }

    fn get(&self, path: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(path).map(|(data, _)| data.clone()))
    }

    fn delete(&self, path: &str) -> StorageResult<bool> {
        Ok(self.entries.write().remove(path).is_some())
    }

    fn clear(&self) -> StorageResult<usize> {
        let mut entries = self.entries.write();
        let n = entries.len();
        entries.clear();
        Ok(n)
    }

    fn list(&self, prefix: &str) -> StorageResult<Vec<StorageEntry>> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|(path, _)| is_under(path, prefix))
            .map(|(path, (data, updated_at))| StorageEntry {
                path: path.clone(),
                size: data.len(),
                updated_at: *updated_at,
            })
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite backend
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite backend over a single guarded connection.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Backend(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS storage (
                path       TEXT PRIMARY KEY,
                data       BLOB NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl StorageBackend for SqliteBackend {
    fn put(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        self.conn.lock().execute(
            "INSERT INTO storage (path, data, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(path) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            params![path, data, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn get(&self, path: &str) -> StorageResult<Option<Vec<u8>>> {
        let data = self
            .conn
            .lock()
            .query_row(
                "SELECT data FROM storage WHERE path = ?1",
                params![path],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(data)
    }

    fn delete(&self, path: &str) -> StorageResult<bool> {
        let n = self
            .conn
            .lock()
            .execute("DELETE FROM storage WHERE path = ?1", params![path])?;
        Ok(n > 0)
    }

    fn clear(&self) -> StorageResult<usize> {
        Ok(self.conn.lock().execute("DELETE FROM storage", [])?)
    }

    fn list(&self, prefix: &str) -> StorageResult<Vec<StorageEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT path, length(data), updated_at FROM storage
             WHERE ?1 = '/' OR path = ?1 OR substr(path, 1, length(?1) + 1) = ?1 || '/'
             ORDER BY path",
        )?;
        let rows = stmt.query_map(params![prefix], |row| {
            let path: String = row.get(0)?;
            let size: i64 = row.get(1)?;
            let updated_at: String = row.get(2)?;
            Ok((path, size, updated_at))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (path, size, updated_at) = row?;
            let updated_at = DateTime::parse_from_rfc3339(&updated_at)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| StorageError::Backend(format!("bad timestamp for {path}: {e}")))?;
            entries.push(StorageEntry {
                path,
                size: usize::try_from(size).unwrap_or(0),
                updated_at,
            });
        }
        Ok(entries)
    }
}

/// `path` equals `prefix` or sits in the subtree it names.
fn is_under(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backends() -> Vec<(&'static str, Storage)> {
        vec![
            ("memory", Storage::in_memory()),
            (
                "sqlite",
                Storage::new(Arc::new(SqliteBackend::open_in_memory().unwrap())),
            ),
        ]
    }

    #[test]
    fn test_put_get_overwrite_delete() {
        for (name, storage) in backends() {
            assert_eq!(storage.get("/a/b").unwrap(), None, "{name}");
            storage.put("/a/b", b"one").unwrap();
            assert_eq!(storage.get("/a/b").unwrap().as_deref(), Some(&b"one"[..]), "{name}");
            storage.put("a/b", b"two").unwrap();
            assert_eq!(storage.get_text("/a/b").unwrap().as_deref(), Some("two"), "{name}");
            assert!(storage.exists("/a/b").unwrap(), "{name}");
            assert!(storage.delete("/a/b").unwrap(), "{name}");
            assert!(!storage.delete("/a/b").unwrap(), "{name}");
            assert!(!storage.exists("/a/b").unwrap(), "{name}");
        }
    }

    #[test]
    fn test_clear() {
        for (name, storage) in backends() {
            storage.put("/x", b"1").unwrap();
            storage.put("/y/z", b"2").unwrap();
            assert_eq!(storage.clear().unwrap(), 2, "{name}");
            assert!(storage.list("/").unwrap().is_empty(), "{name}");
        }
    }

    #[test]
    fn test_list_prefix() {
        for (name, storage) in backends() {
            storage.put("/metrics/2", b"22").unwrap();
            storage.put("/metrics/1", b"1").unwrap();
            storage.put("/other", b"o").unwrap();
            let entries = storage.list("/metrics").unwrap();
            let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
            assert_eq!(paths, ["/metrics/1", "/metrics/2"], "{name}");
            assert_eq!(entries[1].size, 2, "{name}");
            assert_eq!(storage.list("").unwrap().len(), 3, "{name}");
        }
    }

    #[test]
    fn test_list_prefix_stops_at_segment_boundary() {
        for (name, storage) in backends() {
            storage.put("/metrics", b"root").unwrap();
            storage.put("/metrics/a", b"a").unwrap();
            storage.put("/metrics-old/x", b"x").unwrap();
            storage.put("/metricsx", b"y").unwrap();
            let entries = storage.list("/metrics").unwrap();
            let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
            assert_eq!(paths, ["/metrics", "/metrics/a"], "{name}");
            assert_eq!(storage.list("/").unwrap().len(), 4, "{name}");
        }
    }

    #[test]
    fn test_oversize_rejected_before_mutation() {
        for (name, storage) in backends() {
            let storage = storage.with_max_size(8);
            storage.put("/blob", b"original").unwrap();
            let err = storage.put("/blob", b"too large!").unwrap_err();
            assert!(
                matches!(err, StorageError::OversizeStorageWrite { size: 10, max: 8, .. }),
                "{name}"
            );
            assert_eq!(storage.get_text("/blob").unwrap().as_deref(), Some("original"), "{name}");
        }
    }

    #[test]
    fn test_default_limit_boundary() {
        let storage = Storage::in_memory();
        assert_eq!(storage.max_size(), 10 * 1024 * 1024);
        storage
            .put("/big", &vec![0u8; MAX_STORAGE_FILE_SIZE_IN_BYTES])
            .unwrap();
        let err = storage
            .put("/big", &vec![1u8; MAX_STORAGE_FILE_SIZE_IN_BYTES + 1])
            .unwrap_err();
        assert!(matches!(err, StorageError::OversizeStorageWrite { .. }));
        assert_eq!(storage.get("/big").unwrap().unwrap()[0], 0);
    }

    #[test]
    fn test_invalid_path() {
        let storage = Storage::in_memory();
        assert!(matches!(
            storage.put("/../escape", b"x"),
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_sqlite_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("nested").join("storage.db");
        {
            let storage = Storage::open_sqlite(&db).unwrap();
            storage.put_text("/keep", "me").unwrap();
        }
        let storage = Storage::open_sqlite(&db).unwrap();
        assert_eq!(storage.get_text("/keep").unwrap().as_deref(), Some("me"));
    }

    #[test]
    fn test_from_config() {
        let section = StorageSection {
            max_file_size: 4,
            ..Default::default()
        };
        let storage = Storage::from_config(&section).unwrap();
        assert_eq!(storage.max_size(), 4);

        let section = StorageSection {
            max_file_size: 2 * MAX_STORAGE_FILE_SIZE_IN_BYTES,
            ..Default::default()
        };
        let storage = Storage::from_config(&section).unwrap();
        assert_eq!(storage.max_size(), MAX_STORAGE_FILE_SIZE_IN_BYTES);
        let err = storage
            .put("/big", &vec![0u8; MAX_STORAGE_FILE_SIZE_IN_BYTES + 1])
            .unwrap_err();
        assert!(matches!(err, StorageError::OversizeStorageWrite { .. }));
        assert_eq!(storage.get("/big").unwrap(), None);

        let section = StorageSection {
            backend: StorageBackendKind::Sqlite,
            path: None,
            max_file_size: 4,
        };
        assert!(Storage::from_config(&section).is_err());
    }
}

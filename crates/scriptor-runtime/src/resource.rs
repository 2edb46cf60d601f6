//! Script resources and the stores that hold them.
//!
//! A resource is addressed by an absolute, `/`-separated path and carries a
//! content fingerprint (SHA-256 of the bytes). The artifact cache compares
//! fingerprints to decide whether a compiled form is still valid.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

/// Errors raised by a [`ResourceStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Nothing is stored at the path.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The path is empty or tries to leave the store root.
    #[error("Invalid resource path: '{0}'")]
    InvalidPath(String),

    /// Underlying I/O failure.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Content fingerprint: lowercase SHA-256 hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of the given bytes.
    pub fn of(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self(hex::encode(hasher.finalize()))
    }

    /// Hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines and directory names.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A script resource read from a store.
#[derive(Debug, Clone)]
pub struct ScriptResource {
    /// Normalised resource path.
    pub path: String,
    /// Raw content.
    pub content: Vec<u8>,
    /// Fingerprint of `content`.
    pub fingerprint: Fingerprint,
}

impl ScriptResource {
    /// Build a resource, computing its fingerprint.
    pub fn new(path: impl Into<String>, content: Vec<u8>) -> Self {
        let fingerprint = Fingerprint::of(&content);
        Self {
            path: path.into(),
            content,
            fingerprint,
        }
    }

    /// Content as text (lossy for invalid UTF-8).
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    /// File name component of the path.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Normalise a resource path to `/a/b/c` form.
///
/// Collapses repeated and trailing separators and drops `.` segments.
/// Rejects empty paths and any `..` segment.
pub fn normalize_path(path: &str) -> Result<String, StoreError> {
    let mut segments = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return Err(StoreError::InvalidPath(path.to_string())),
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(format!("/{}", segments.join("/")))
}

/// Read/write byte-content store keyed by resource path.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Read content and fingerprint.
    async fn read(&self, path: &str) -> Result<ScriptResource, StoreError>;

    /// Whether anything is stored at the path.
    async fn exists(&self, path: &str) -> bool;

    /// Create or overwrite the resource.
    async fn write(&self, path: &str, content: &[u8]) -> Result<(), StoreError>;

    /// Remove the resource. Returns `false` if nothing was there.
    async fn delete(&self, path: &str) -> Result<bool, StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Filesystem store
// ─────────────────────────────────────────────────────────────────────────────

/// Store backed by a directory tree.
#[derive(Debug, Clone)]
pub struct FsResourceStore {
    root: PathBuf,
}

impl FsResourceStore {
    /// Create a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<(String, PathBuf), StoreError> {
        let normalized = normalize_path(path)?;
        let file = self.root.join(normalized.trim_start_matches('/'));
        Ok((normalized, file))
    }
}

#[async_trait]
impl ResourceStore for FsResourceStore {
    async fn read(&self, path: &str) -> Result<ScriptResource, StoreError> {
        let (normalized, file) = self.resolve(path)?;
        match tokio::fs::read(&file).await {
            Ok(content) => Ok(ScriptResource::new(normalized, content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(normalized))
            }
            Err(e) => Err(StoreError::Io {
                path: normalized,
                source: e,
            }),
        }
    }

    async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok((_, file)) => tokio::fs::metadata(&file)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<(), StoreError> {
        let (normalized, file) = self.resolve(path)?;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Io {
                    path: normalized.clone(),
                    source: e,
                })?;
        }
        tokio::fs::write(&file, content)
            .await
            .map_err(|e| StoreError::Io {
                path: normalized.clone(),
                source: e,
            })?;
        debug!(path = %normalized, bytes = content.len(), "Resource written");
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        let (normalized, file) = self.resolve(path)?;
        match tokio::fs::remove_file(&file).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io {
                path: normalized,
                source: e,
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local store, used for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryResourceStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryResourceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored resources.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn read(&self, path: &str) -> Result<ScriptResource, StoreError> {
        let normalized = normalize_path(path)?;
        let entries = self.entries.read();
        entries
            .get(&normalized)
            .map(|content| ScriptResource::new(normalized.clone(), content.clone()))
            .ok_or(StoreError::NotFound(normalized))
    }

    async fn exists(&self, path: &str) -> bool {
        match normalize_path(path) {
            Ok(normalized) => self.entries.read().contains_key(&normalized),
            Err(_) => false,
        }
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<(), StoreError> {
        let normalized = normalize_path(path)?;
        self.entries.write().insert(normalized, content.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        let normalized = normalize_path(path)?;
        Ok(self.entries.write().remove(&normalized).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_deterministic() {
        let a = Fingerprint::of(b"hello world");
        let b = Fingerprint::of(b"hello world");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn test_fingerprint_differs_with_content() {
        assert_ne!(Fingerprint::of(b"hello"), Fingerprint::of(b"world"));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("a/b/c").unwrap(), "/a/b/c");
        assert_eq!(normalize_path("//a//b/./c/").unwrap(), "/a/b/c");
        assert_eq!(normalize_path("\\win\\style").unwrap(), "/win/style");
    }

    #[test]
    fn test_normalize_rejects_escape_and_empty() {
        assert!(matches!(
            normalize_path("/a/../../etc/passwd"),
            Err(StoreError::InvalidPath(_))
        ));
        assert!(matches!(normalize_path("/"), Err(StoreError::InvalidPath(_))));
        assert!(matches!(normalize_path(""), Err(StoreError::InvalidPath(_))));
    }

    #[test]
    fn test_resource_file_name() {
        let r = ScriptResource::new("/apps/svc/Service.java", b"x".to_vec());
        assert_eq!(r.file_name(), "Service.java");
        assert_eq!(r.text(), "x");
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryResourceStore::new();
        assert!(!store.exists("/a.js").await);
        store.write("a.js", b"one").await.unwrap();
        assert!(store.exists("/a.js").await);

        let first = store.read("/a.js").await.unwrap();
        assert_eq!(first.path, "/a.js");
        assert_eq!(first.content, b"one");

        store.write("/a.js", b"two").await.unwrap();
        let second = store.read("/a.js").await.unwrap();
        assert_ne!(first.fingerprint, second.fingerprint);

        assert!(store.delete("/a.js").await.unwrap());
        assert!(!store.delete("/a.js").await.unwrap());
        assert!(matches!(
            store.read("/a.js").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fs_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FsResourceStore::new(dir.path());

        store.write("/nested/dir/job.toml", b"name = 'x'").await.unwrap();
        assert!(dir.path().join("nested/dir/job.toml").is_file());
        assert!(store.exists("/nested/dir/job.toml").await);
        assert!(!store.exists("/nested/dir").await);

        let res = store.read("nested/dir/job.toml").await.unwrap();
        assert_eq!(res.path, "/nested/dir/job.toml");
        assert_eq!(res.fingerprint, Fingerprint::of(b"name = 'x'"));

        assert!(store.delete("/nested/dir/job.toml").await.unwrap());
        assert!(matches!(
            store.read("/nested/dir/job.toml").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fs_store_rejects_escape() {
        let dir = TempDir::new().unwrap();
        let store = FsResourceStore::new(dir.path().join("root"));
        assert!(matches!(
            store.write("/../outside.txt", b"x").await,
            Err(StoreError::InvalidPath(_))
        ));
        assert!(!store.exists("/../outside.txt").await);
    }
}

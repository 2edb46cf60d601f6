//! Artifact cache with single-flight compilation.
//!
//! Each (compiler, path) pair owns a slot guarded by an async mutex. The
//! global map lock is only held long enough to fetch or create a slot, so
//! different paths compile in parallel while concurrent requests for the
//! same path wait for one compile and share its result.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::compiler::{CompiledArtifact, Compiler, SourceUnit};
use crate::error::{Result, RuntimeError};
use crate::resource::ResourceStore;

type Slot = Arc<tokio::sync::Mutex<Option<Arc<CompiledArtifact>>>>;

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Requests served by an up-to-date artifact.
    pub hits: u64,
    /// Requests that needed a compile.
    pub misses: u64,
    /// Successful compiles.
    pub compilations: u64,
    /// Failed compiles.
    pub failures: u64,
    /// Artifacts currently held.
    pub entries: usize,
}

/// Holds at most one artifact per (compiler, path).
#[derive(Default)]
pub struct ArtifactCache {
    slots: Mutex<HashMap<(String, String), Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
    compilations: AtomicU64,
    failures: AtomicU64,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, compiler: &str, path: &str) -> Slot {
        let mut slots = self.slots.lock();
        Arc::clone(
            slots
                .entry((compiler.to_string(), path.to_string()))
                .or_default(),
        )
    }

    /// Return the artifact for `path`, compiling it if the stored source
    /// changed since the cached artifact was built.
    ///
    /// The resource is read inside the per-path critical section so that a
    /// waiter never observes an artifact older than the content it would
    /// have read itself. On failure the stale artifact is dropped and the
    /// diagnostics propagate as [`RuntimeError::Compilation`].
    pub async fn get_or_compile(
        &self,
        path: &str,
        store: &dyn ResourceStore,
        compiler: &dyn Compiler,
    ) -> Result<Arc<CompiledArtifact>> {
        let slot = self.slot(compiler.name(), path);
        let result = self.fill(&slot, path, store, compiler).await;
        if result.is_err() {
            self.release_if_unused(compiler.name(), path, &slot);
        }
        result
    }

    async fn fill(
        &self,
        slot: &Slot,
        path: &str,
        store: &dyn ResourceStore,
        compiler: &dyn Compiler,
    ) -> Result<Arc<CompiledArtifact>> {
        let mut entry = slot.lock().await;

        let resource = store.read(path).await?;
        if let Some(ref artifact) = *entry {
            if artifact.fingerprint == resource.fingerprint {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(
                    engine = compiler.name(),
                    path = %path,
                    fingerprint = %resource.fingerprint.short(),
                    "Artifact cache hit"
                );
                return Ok(Arc::clone(artifact));
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(
            engine = compiler.name(),
            path = %path,
            fingerprint = %resource.fingerprint.short(),
            stale = entry.is_some(),
            "Artifact cache miss, compiling"
        );

        match compiler.compile(&SourceUnit::from(&resource)).await {
            Ok(artifact) => {
                self.compilations.fetch_add(1, Ordering::Relaxed);
                let artifact = Arc::new(artifact);
                *entry = Some(Arc::clone(&artifact));
                Ok(artifact)
            }
            Err(diagnostics) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                *entry = None;
                Err(RuntimeError::Compilation {
                    path: path.to_string(),
                    diagnostics,
                })
            }
        }
    }

    /// Remove an empty slot nobody else is waiting on.
    ///
    /// New clones are only handed out under the map lock, so a strong count of
    /// two (the map plus `slot`) means no other request holds it.
    fn release_if_unused(&self, compiler: &str, path: &str, slot: &Slot) {
        let mut slots = self.slots.lock();
        let key = (compiler.to_string(), path.to_string());
        let unused = slots.get(&key).is_some_and(|held| {
            Arc::ptr_eq(held, slot)
                && Arc::strong_count(slot) == 2
                && matches!(slot.try_lock(), Ok(guard) if guard.is_none())
        });
        if unused {
            slots.remove(&key);
        }
    }

    /// Drop every artifact for `path`. Returns `true` if one was held.
    pub fn invalidate(&self, path: &str) -> bool {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|(_, p), _| p != path);
        before != slots.len()
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    /// Number of artifacts currently held.
    ///
    /// Slots whose compile is in flight are not counted.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| matches!(slot.try_lock(), Ok(guard) if guard.is_some()))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            compilations: self.compilations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

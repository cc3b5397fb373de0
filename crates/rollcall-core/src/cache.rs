//! In-memory snapshot of the feature store.
//!
//! Readers take an `Arc<Snapshot>` and match against it without holding any
//! lock. Writers (`load`, `upsert`) build a complete replacement snapshot
//! and swap the pointer, so a reader sees either the old gallery or the new
//! one, never a half-built one. Writers are serialized among themselves by a
//! separate mutex so an `upsert` cannot be lost under a concurrent `load`.

use arc_swap::ArcSwapOption;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::Error;
use crate::store::FeatureStore;
use crate::types::{Enrollment, IdentityId};

/// Immutable view of the enrolled gallery used by one matching operation.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: Vec<Enrollment>,
    generation: u64,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot directly, last entry winning on duplicate ids.
    pub fn from_enrollments(enrollments: impl IntoIterator<Item = Enrollment>) -> Self {
        let mut snapshot = Self::default();
        snapshot.extend(enrollments);
        snapshot
    }

    pub fn entries(&self) -> &[Enrollment] {
        &self.entries
    }

    pub fn get(&self, id: IdentityId) -> Option<&Enrollment> {
        self.entries.iter().find(|e| e.id() == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Incremented on every swap; lets callers tell snapshots apart.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Add or replace entries in place, keeping first-seen order.
    fn extend(&mut self, enrollments: impl IntoIterator<Item = Enrollment>) {
        let mut index: HashMap<IdentityId, usize> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id(), i))
            .collect();
        for e in enrollments {
            match index.get(&e.id()) {
                Some(&i) => self.entries[i] = e,
                None => {
                    index.insert(e.id(), self.entries.len());
                    self.entries.push(e);
                }
            }
        }
    }
}

/// Cache of enrolled feature vectors, kept consistent with a [`FeatureStore`].
#[derive(Debug)]
pub struct EncodingCache {
    dimension: usize,
    /// `None` until the first successful load.
    current: ArcSwapOption<Snapshot>,
    /// Serializes writers. Holds upserts made before the first load, which
    /// are applied on top of the loaded rows.
    writer: Mutex<Vec<Enrollment>>,
    stale: AtomicBool,
}

impl EncodingCache {
    /// An empty cache that loads on first use.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            current: ArcSwapOption::empty(),
            writer: Mutex::new(Vec::new()),
            stale: AtomicBool::new(true),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Replace the cache contents with everything currently in `source`.
    ///
    /// On failure the previous snapshot is left untouched.
    pub fn load(&self, source: &dyn FeatureStore) -> Result<Arc<Snapshot>, Error> {
        let mut pending = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.load_locked(source, &mut pending)
    }

    /// Current snapshot, loading first if the cache was never loaded or has
    /// been invalidated.
    ///
    /// If a reload fails while an older snapshot exists, the older snapshot
    /// is served and the cache stays stale so the next call retries.
    pub fn get_snapshot(&self, source: &dyn FeatureStore) -> Result<Arc<Snapshot>, Error> {
        if let Some(snapshot) = self.fresh() {
            return Ok(snapshot);
        }

        let mut pending = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have finished a load while we waited.
        if let Some(snapshot) = self.fresh() {
            return Ok(snapshot);
        }

        match self.load_locked(source, &mut pending) {
            Ok(snapshot) => Ok(snapshot),
            Err(err) => match self.current.load_full() {
                Some(previous) if err.is_retryable() => {
                    tracing::warn!(
                        error = %err,
                        generation = previous.generation(),
                        "encoding cache reload failed; serving previous snapshot"
                    );
                    Ok(previous)
                }
                _ => Err(err),
            },
        }
    }

    /// Mark the cache stale; the next `get_snapshot` reloads.
    pub fn invalidate(&self) {
        self.stale.store(true, Ordering::Release);
        tracing::debug!("encoding cache invalidated");
    }

    /// Add or replace one entry without a full reload.
    ///
    /// On a loaded cache the entry is swapped in at once and satisfies any
    /// pending invalidation. Before the first load it is held back and
    /// applied on top of the loaded rows.
    pub fn upsert(&self, enrollment: Enrollment) -> Result<(), Error> {
        enrollment.vector.check_dimension(self.dimension)?;

        let mut pending = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let id = enrollment.id();
        let Some(previous) = self.current.load_full() else {
            pending.retain(|e| e.id() != id);
            pending.push(enrollment);
            tracing::debug!(identity = %id, "encoding cache upsert deferred to first load");
            return Ok(());
        };

        let mut snapshot = Snapshot::clone(&previous);
        snapshot.extend([enrollment]);
        snapshot.generation = previous.generation + 1;
        let generation = snapshot.generation;
        self.current.store(Some(Arc::new(snapshot)));
        self.stale.store(false, Ordering::Release);
        tracing::debug!(identity = %id, generation, "encoding cache upsert");
        Ok(())
    }

    /// The current snapshot unless a load is due.
    fn fresh(&self) -> Option<Arc<Snapshot>> {
        if self.stale.load(Ordering::Acquire) {
            return None;
        }
        self.current.load_full()
    }

    /// Caller holds `self.writer`; `pending` is its contents.
    fn load_locked(
        &self,
        source: &dyn FeatureStore,
        pending: &mut Vec<Enrollment>,
    ) -> Result<Arc<Snapshot>, Error> {
        // Cleared before reading so an invalidation racing with this load
        // survives it.
        let was_stale = self.stale.swap(false, Ordering::AcqRel);
        let rows = match source.list_all() {
            Ok(rows) => rows,
            Err(err) => {
                if was_stale {
                    self.stale.store(true, Ordering::Release);
                }
                return Err(err);
            }
        };
        let total = rows.len();

        let valid = rows.into_iter().filter(|e| match e.vector.check_dimension(self.dimension) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(identity = %e.id(), error = %err, "skipping enrolled vector");
                false
            }
        });
        let mut snapshot = Snapshot::from_enrollments(valid);
        let skipped = total - snapshot.len();
        snapshot.extend(pending.drain(..));
        snapshot.generation = self.current.load_full().map_or(1, |s| s.generation + 1);

        let snapshot = Arc::new(snapshot);
        self.current.store(Some(Arc::clone(&snapshot)));
        tracing::info!(
            loaded = snapshot.len(),
            skipped,
            generation = snapshot.generation(),
            "encoding cache loaded"
        );
        Ok(snapshot)
    }
}

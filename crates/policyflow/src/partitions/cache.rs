//! Pinned hypertable metadata cache.
//!
//! A `CachedHypertable` keeps its entry pinned until dropped, so every exit
//! path of the holder releases it exactly once. Unpinned entries are evicted.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::{Hypertable, PartitionCatalog};
use crate::error::Result;

struct Entry {
    hypertable: Arc<Hypertable>,
    pins: usize,
}

#[derive(Clone, Default)]
pub struct HypertableCache {
    entries: Arc<Mutex<HashMap<i32, Entry>>>,
}

impl HypertableCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the hypertable. Every acquire re-reads the catalog, so a renamed
    /// or removed hypertable is seen by the next run; holders of an older pin
    /// keep the metadata they validated against.
    /// Returns `None` when the catalog has no such hypertable.
    pub async fn acquire(
        &self,
        catalog: &dyn PartitionCatalog,
        id: i32,
    ) -> Result<Option<CachedHypertable>> {
        let Some(ht) = catalog.get_hypertable(id).await? else {
            return Ok(None);
        };
        let hypertable = Arc::new(ht);

        let mut entries = self.entries.lock();
        let entry = entries.entry(id).or_insert_with(|| Entry {
            hypertable: hypertable.clone(),
            pins: 0,
        });
        entry.hypertable = hypertable.clone();
        entry.pins += 1;

        Ok(Some(CachedHypertable {
            hypertable,
            cache: self.entries.clone(),
        }))
    }

    /// The metadata last loaded for `id`, while anything still pins it.
    pub fn get(&self, id: i32) -> Option<Arc<Hypertable>> {
        self.entries.lock().get(&id).map(|e| e.hypertable.clone())
    }

    pub fn pinned(&self, id: i32) -> usize {
        self.entries.lock().get(&id).map(|e| e.pins).unwrap_or(0)
    }

    pub fn total_pins(&self) -> usize {
        self.entries.lock().values().map(|e| e.pins).sum()
    }
}

/// A pinned cache entry; the pin is released on drop.
pub struct CachedHypertable {
    hypertable: Arc<Hypertable>,
    cache: Arc<Mutex<HashMap<i32, Entry>>>,
}

impl CachedHypertable {
    pub fn hypertable(&self) -> &Hypertable {
        &self.hypertable
    }
}

impl std::fmt::Debug for CachedHypertable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CachedHypertable")
            .field(&self.hypertable)
            .finish()
    }
}

impl PartialEq for CachedHypertable {
    fn eq(&self, other: &Self) -> bool {
        self.hypertable == other.hypertable
    }
}

impl Drop for CachedHypertable {
    fn drop(&mut self) {
        let mut entries = self.cache.lock();
        if let Some(entry) = entries.get_mut(&self.hypertable.id) {
            entry.pins = entry.pins.saturating_sub(1);
            if entry.pins == 0 {
                entries.remove(&self.hypertable.id);
            }
        }
    }
}

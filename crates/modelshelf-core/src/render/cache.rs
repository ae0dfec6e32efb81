use super::thumbnail::Thumbnail;
use ahash::AHashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

pub type SharedThumbnailCache = Arc<Mutex<ThumbnailCache>>;

/// In-memory map from normalized file path to its last rendered thumbnail.
///
/// Not an LRU: once the cap is exceeded the oldest half of the entries (by
/// first insertion) is dropped in one go.
#[derive(Debug)]
pub struct ThumbnailCache {
    capacity: usize,
    entries: AHashMap<String, Thumbnail>,
    order: VecDeque<String>,
}

impl ThumbnailCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: AHashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn shared(capacity: usize) -> SharedThumbnailCache {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    /// Insert or replace. Replacing keeps the entry's original age.
    pub fn insert(&mut self, path: impl Into<String>, thumbnail: Thumbnail) {
        let path = path.into();
        if self.entries.insert(path.clone(), thumbnail).is_none() {
            self.order.push_back(path);
        }
        self.trim();
    }

    pub fn get(&self, path: &str) -> Option<Thumbnail> {
        self.entries.get(path).cloned()
    }

    pub fn remove(&mut self, path: &str) -> Option<Thumbnail> {
        let removed = self.entries.remove(path);
        if removed.is_some() {
            self.order.retain(|p| p != path);
        }
        removed
    }

    /// Evict the oldest half if over capacity. Returns how many were dropped.
    pub fn trim(&mut self) -> usize {
        if self.entries.len() <= self.capacity {
            return 0;
        }
        let to_evict = (self.capacity / 2).max(1);
        let mut evicted = 0;
        while evicted < to_evict {
            match self.order.pop_front() {
                Some(path) => {
                    self.entries.remove(&path);
                    evicted += 1;
                }
                None => break,
            }
        }
        debug!("Thumbnail cache evicted {} entries", evicted);
        evicted
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ThumbnailCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

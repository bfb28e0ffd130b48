use crate::edge::{EdgeCache, EdgeEntry};
use async_trait::async_trait;
use lru::LruCache;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_ENTRIES: usize = 1000;
pub const DEFAULT_MAX_BYTES: usize = 512 * 1024 * 1024;

/// Keys are namespaced so a co-tenant sharing the process (or a future
/// shared backend) cannot collide with ours.
const NAMESPACE: &str = "pictor:edge:";

/// In-process LRU edge cache with a TTL per entry and a hard byte budget.
///
/// `get` promotes to most-recently-used; `set` evicts from the LRU end
/// until both the entry-count and the byte caps hold. Entries larger than
/// the byte cap are silently not cached.
pub struct MemoryEdgeCache {
    state: Mutex<LruState>,
    max_entries: usize,
    max_bytes: usize,
}

struct LruState {
    entries: LruCache<String, Slot>,
    total_bytes: usize,
}

struct Slot {
    entry: EdgeEntry,
    size: usize,
    expires_at: Instant,
}

impl MemoryEdgeCache {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            state: Mutex::new(LruState {
                entries: LruCache::unbounded(),
                total_bytes: 0,
            }),
            max_entries: max_entries.max(1),
            max_bytes,
        }
    }

    fn namespaced(key: &str) -> String {
        format!("{NAMESPACE}{key}")
    }

    /// Entry count, for probes and tests.
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryEdgeCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_MAX_BYTES)
    }
}

impl LruState {
    fn remove(&mut self, key: &str) {
        if let Some(slot) = self.entries.pop(key) {
            self.total_bytes -= slot.size;
        }
    }

    fn evict_until_fits(&mut self, incoming: usize, max_entries: usize, max_bytes: usize) {
        while !self.entries.is_empty()
            && (self.entries.len() >= max_entries || self.total_bytes + incoming > max_bytes)
        {
            if let Some((_, slot)) = self.entries.pop_lru() {
                self.total_bytes -= slot.size;
            }
        }
    }
}

#[async_trait]
impl EdgeCache for MemoryEdgeCache {
    async fn get(&self, key: &str) -> Option<EdgeEntry> {
        let k = Self::namespaced(key);
        let Ok(mut state) = self.state.lock() else {
            return None;
        };
        match state.entries.get(&k) {
            Some(slot) if Instant::now() >= slot.expires_at => {}
            Some(slot) => return Some(slot.entry.clone()),
            None => return None,
        }
        state.remove(&k);
        None
    }

    async fn set(&self, key: &str, entry: EdgeEntry, ttl: Duration) {
        let size = entry.bytes.len();
        if size > self.max_bytes {
            return;
        }
        let k = Self::namespaced(key);
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.remove(&k);
        state.evict_until_fits(size, self.max_entries, self.max_bytes);
        state.total_bytes += size;
        state.entries.put(
            k,
            Slot {
                entry,
                size,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn delete(&self, key: &str) {
        let k = Self::namespaced(key);
        if let Ok(mut state) = self.state.lock() {
            state.remove(&k);
        }
    }

    async fn delete_by_prefix(&self, prefix: &str) {
        let p = Self::namespaced(prefix);
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let doomed: Vec<String> = state
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(&p))
            .map(|(k, _)| k.clone())
            .collect();
        for k in doomed {
            state.remove(&k);
        }
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

//! Write-through caches for triggers and group configs.
//!
//! Read-heavy: readers clone an `Arc` snapshot; writers swap the pointer
//! under the cache-wide lock. Entries expire after a TTL and are reloaded
//! on the next read; any mutation through the gateway invalidates.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

struct Entry<V> {
    value: Arc<V>,
    loaded_at: Instant,
}

/// Keyed TTL cache with snapshot reads.
pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, Entry<V>>>,
    ttl: Duration,
}

impl<V> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Fresh snapshot for `key`, or `None` when absent/expired.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.loaded_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Load `key` through `loader` on miss; the loader runs outside any
    /// cache lock so concurrent readers of other keys never block on it.
    pub fn get_or_load<E>(
        &self,
        key: &str,
        loader: impl FnOnce() -> Result<V, E>,
    ) -> Result<Arc<V>, E> {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let value = Arc::new(loader()?);
        let mut entries = self.entries.write();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                loaded_at: Instant::now(),
            },
        );
        Ok(value)
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.write().remove(key);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_once_within_ttl() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        let mut loads = 0;
        let v = cache
            .get_or_load("k", || -> Result<u32, ()> {
                loads += 1;
                Ok(7)
            })
            .unwrap();
        assert_eq!(*v, 7);

        let v = cache
            .get_or_load("k", || -> Result<u32, ()> {
                loads += 1;
                Ok(8)
            })
            .unwrap();
        assert_eq!(*v, 7);
        assert_eq!(loads, 1);
    }

    #[test]
    fn invalidate_forces_reload() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        cache
            .get_or_load("k", || -> Result<u32, ()> { Ok(1) })
            .unwrap();
        cache.invalidate("k");
        let v = cache
            .get_or_load("k", || -> Result<u32, ()> { Ok(2) })
            .unwrap();
        assert_eq!(*v, 2);
    }

    #[test]
    fn expired_entries_miss() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_millis(0));
        cache
            .get_or_load("k", || -> Result<u32, ()> { Ok(1) })
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k").is_none());
    }
}

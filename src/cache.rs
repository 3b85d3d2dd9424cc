use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Optional store of raw backend responses keyed by the slice query JSON.
#[async_trait]
pub trait ReadThroughCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn put(&self, key: &str, response: &str);
}

/// Caches nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl ReadThroughCache for NoopCache {
    async fn get(&self, _key: &str) -> Option<String> {
        None
    }

    async fn put(&self, _key: &str, _response: &str) {}
}

#[derive(Default)]
struct Entries {
    values: HashMap<String, String>,
    order: VecDeque<String>,
}

/// In-process cache holding at most `capacity` responses, oldest evicted first.
pub struct MemoryCache {
    capacity: usize,
    entries: Mutex<Entries>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(Entries::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReadThroughCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().values.get(key).cloned()
    }

    async fn put(&self, key: &str, response: &str) {
        let mut entries = self.entries.lock();
        if entries.values.insert(key.to_string(), response.to_string()).is_none() {
            entries.order.push_back(key.to_string());
        }
        while entries.values.len() > self.capacity {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            entries.values.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_cache_misses() {
        let cache = NoopCache;
        cache.put("k", "v").await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_memory_cache_evicts_oldest() {
        let cache = MemoryCache::new(2);
        cache.put("a", "1").await;
        cache.put("b", "2").await;
        cache.put("a", "3").await;
        cache.put("c", "4").await;

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("b").await.as_deref(), Some("2"));
        assert_eq!(cache.get("c").await.as_deref(), Some("4"));
    }
}

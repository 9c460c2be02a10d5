//! Path-keyed attribute cache (TTL + bounded LRU).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::Duration;

use crate::cache::lru::TtlLru;
use crate::vfs::FileAttr;

const SHARDS: usize = 16;

/// Sharded attribute cache. Keys are canonical paths; squashed and
/// unsquashed identities share entries, credential checks stay with the
/// backend.
pub struct AttrCache {
    shards: Vec<Mutex<TtlLru<FileAttr>>>,
}

impl AttrCache {
    pub fn new(capacity: usize, ttl: Duration) -> AttrCache {
        let per_shard = (capacity / SHARDS).max(1);
        AttrCache {
            shards: (0..SHARDS).map(|_| Mutex::new(TtlLru::new(per_shard, ttl))).collect(),
        }
    }

    fn shard(&self, path: &str) -> &Mutex<TtlLru<FileAttr>> {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARDS]
    }

    pub fn get(&self, path: &str) -> Option<FileAttr> {
        self.shard(path).lock().unwrap().get(path).cloned()
    }

    pub fn put(&self, path: &str, attr: FileAttr) {
        self.shard(path).lock().unwrap().insert(path, attr);
    }

    pub fn invalidate(&self, path: &str) {
        self.shard(path).lock().unwrap().remove(path);
    }

    /// Drops `path` and everything beneath it, across all shards.
    pub fn invalidate_prefix(&self, path: &str) {
        for shard in &self.shards {
            shard.lock().unwrap().remove_prefix(path);
        }
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().unwrap().clear();
        }
    }

    pub fn resize(&self, capacity: usize, ttl: Duration) {
        let per_shard = (capacity / SHARDS).max(1);
        for shard in &self.shards {
            shard.lock().unwrap().set_limits(per_shard, ttl);
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().unwrap().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(size: u64) -> FileAttr {
        FileAttr { size, ..FileAttr::default() }
    }

    #[test]
    fn put_get_invalidate() {
        let cache = AttrCache::new(64, Duration::from_secs(5));
        cache.put("/f", attr(5));
        assert_eq!(cache.get("/f").unwrap().size, 5);
        cache.invalidate("/f");
        assert!(cache.get("/f").is_none());
    }

    #[test]
    fn prefix_invalidation_covers_subtree() {
        let cache = AttrCache::new(64, Duration::from_secs(5));
        cache.put("/dir", attr(0));
        cache.put("/dir/a", attr(1));
        cache.put("/dir/sub/b", attr(2));
        cache.put("/dirt", attr(3));
        cache.invalidate_prefix("/dir");
        assert!(cache.get("/dir").is_none());
        assert!(cache.get("/dir/a").is_none());
        assert!(cache.get("/dir/sub/b").is_none());
        assert_eq!(cache.get("/dirt").unwrap().size, 3);
    }
}

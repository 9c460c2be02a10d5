//! Path-keyed directory-listing cache and the per-directory cookie
//! verifiers that guard READDIR pagination.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;

use crate::cache::lru::TtlLru;
use crate::vfs::{FileAttr, FileKind};

const SHARDS: usize = 8;

/// One entry of a captured directory listing.
#[derive(Clone, Debug)]
pub struct DirSnapshotEntry {
    pub name: String,
    pub fileid: u64,
    pub kind: FileKind,
    /// Present when READDIRPLUS already fetched the attributes.
    pub attr: Option<FileAttr>,
}

/// A directory listing captured by one authoritative READDIR on the
/// backend, tagged with the verifier current at capture time.
#[derive(Clone, Debug)]
pub struct CachedDir {
    pub entries: Arc<Vec<DirSnapshotEntry>>,
    pub verifier: u64,
}

/// Sharded directory cache, same structure as the attribute cache.
pub struct DirCache {
    shards: Vec<Mutex<TtlLru<CachedDir>>>,
    enabled: AtomicBool,
}

impl DirCache {
    pub fn new(capacity: usize, ttl: Duration, enabled: bool) -> DirCache {
        let per_shard = (capacity / SHARDS).max(1);
        DirCache {
            shards: (0..SHARDS).map(|_| Mutex::new(TtlLru::new(per_shard, ttl))).collect(),
            enabled: AtomicBool::new(enabled),
        }
    }

    fn shard(&self, path: &str) -> &Mutex<TtlLru<CachedDir>> {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARDS]
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            self.clear();
        }
    }

    pub fn get(&self, path: &str) -> Option<CachedDir> {
        if !self.enabled.load(Ordering::Relaxed) {
            return None;
        }
        self.shard(path).lock().unwrap().get(path).cloned()
    }

    pub fn put(&self, path: &str, dir: CachedDir) {
        if self.enabled.load(Ordering::Relaxed) {
            self.shard(path).lock().unwrap().insert(path, dir);
        }
    }

    pub fn invalidate(&self, path: &str) {
        self.shard(path).lock().unwrap().remove(path);
    }

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
}

/// Issues the cookie verifier of each directory and bumps it on mutation,
/// which forces clients holding old cookies to restart their listing.
pub struct DirVerifiers {
    current: DashMap<String, u64>,
    counter: AtomicU64,
}

impl DirVerifiers {
    /// `seed` keeps verifiers distinct across server restarts.
    pub fn new(seed: u64) -> DirVerifiers {
        DirVerifiers { current: DashMap::new(), counter: AtomicU64::new(seed) }
    }

    /// The verifier currently valid for `path`.
    pub fn current(&self, path: &str) -> u64 {
        if let Some(v) = self.current.get(path) {
            return *v;
        }
        let next = self.counter.fetch_add(1, Ordering::Relaxed);
        *self.current.entry(path.to_string()).or_insert(next)
    }

    /// Invalidates outstanding cookies for `path`.
    pub fn bump(&self, path: &str) {
        let next = self.counter.fetch_add(1, Ordering::Relaxed);
        self.current.insert(path.to_string(), next);
    }

    /// Forgets a directory entirely (rename or removal).
    pub fn forget(&self, path: &str) {
        self.current.remove(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(verifier: u64) -> CachedDir {
        CachedDir {
            entries: Arc::new(vec![DirSnapshotEntry {
                name: "a".into(),
                fileid: 2,
                kind: FileKind::Regular,
                attr: None,
            }]),
            verifier,
        }
    }

    #[test]
    fn disabled_cache_never_hits() {
        let cache = DirCache::new(16, Duration::from_secs(5), false);
        cache.put("/d", snapshot(1));
        assert!(cache.get("/d").is_none());
    }

    #[test]
    fn invalidate_drops_listing() {
        let cache = DirCache::new(16, Duration::from_secs(5), true);
        cache.put("/d", snapshot(1));
        assert!(cache.get("/d").is_some());
        cache.invalidate("/d");
        assert!(cache.get("/d").is_none());
    }

    #[test]
    fn verifier_changes_on_bump_only() {
        let verifiers = DirVerifiers::new(100);
        let v1 = verifiers.current("/d");
        assert_eq!(verifiers.current("/d"), v1);
        verifiers.bump("/d");
        let v2 = verifiers.current("/d");
        assert_ne!(v1, v2);
        assert_ne!(verifiers.current("/other"), v2);
    }
}

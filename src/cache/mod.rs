//! Attribute and directory caches.
//!
//! Both caches share the same shape: a sharded, bounded LRU with per-entry
//! TTL, keyed by canonical path. Sharding keeps a hit on one entry from
//! blocking unrelated entries; the per-shard lock is only held for the O(1)
//! list operations.
//!
//! Entries are advisory. Mutating handlers invalidate affected paths before
//! replying, so a GETATTR after a WRITE always reflects the write.

mod attr;
mod dir;
mod lru;

pub use attr::AttrCache;
pub use dir::{CachedDir, DirCache, DirSnapshotEntry, DirVerifiers};
pub use lru::TtlLru;

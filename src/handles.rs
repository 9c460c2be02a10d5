//! File-handle table: the bi-directional map between opaque NFS handles and
//! canonical backend paths.
//!
//! Handles are 64-bit integers internally. Released ids go into a min-heap
//! and the smallest one is reused first, keeping the id space small and
//! dense under long-running churn while allocation stays O(log n).
//!
//! On the wire a handle is a fixed 32-byte opaque carrying a version tag,
//! the server generation, the id and a check word. Handles have no
//! structural relationship to paths; only this table can resolve them.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::net::IpAddr;
use std::sync::RwLock;

use crate::protocol::xdr::nfs3;

/// Wire format version tag.
const FH_VERSION: u32 = 1;
/// Encoded handle length; NFS3_FHSIZE permits up to 64.
const FH_LEN: usize = 32;
/// Multiplier mixing the check word.
const FH_CHECK_MIX: u64 = 0x9e37_79b9_7f4a_7c15;

/// Why a handle could not be resolved or allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HandleError {
    /// The opaque failed structural or check-word validation.
    #[error("malformed file handle")]
    BadHandle,
    /// The handle was minted by an earlier server instance.
    #[error("stale file handle")]
    Stale,
    /// The id is not (or no longer) in the table.
    #[error("unknown file handle")]
    NotFound,
    /// The table reached its configured capacity.
    #[error("file handle table is full")]
    Exhausted,
}

impl From<HandleError> for nfs3::nfsstat3 {
    fn from(err: HandleError) -> nfs3::nfsstat3 {
        match err {
            HandleError::BadHandle => nfs3::nfsstat3::NFS3ERR_BADHANDLE,
            HandleError::Stale | HandleError::NotFound => nfs3::nfsstat3::NFS3ERR_STALE,
            HandleError::Exhausted => nfs3::nfsstat3::NFS3ERR_SERVERFAULT,
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    path: String,
    /// Client IP charged for this handle in the per-IP budget.
    owner: Option<IpAddr>,
}

#[derive(Debug, Default)]
struct TableInner {
    nodes: HashMap<u64, Node>,
    ids: HashMap<String, u64>,
    /// Released ids, smallest first.
    free: BinaryHeap<Reverse<u64>>,
    next_id: u64,
}

/// The table itself. `resolve` takes the read lock; allocation and release
/// take the write lock.
#[derive(Debug)]
pub struct HandleTable {
    generation: u64,
    capacity: u64,
    inner: RwLock<TableInner>,
}

impl HandleTable {
    /// `generation` distinguishes server instances so pre-restart handles
    /// decode as stale. Ids start at 1; 0 is never issued.
    pub fn new(generation: u64, capacity: u64) -> HandleTable {
        HandleTable {
            generation,
            capacity,
            inner: RwLock::new(TableInner { next_id: 1, ..TableInner::default() }),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the id already mapped to `path`, if any.
    pub fn lookup_path(&self, path: &str) -> Option<u64> {
        self.inner.read().unwrap().ids.get(path).copied()
    }

    /// Maps `path` to an id, reusing the existing mapping when present.
    /// The boolean is true when a fresh id was allocated.
    pub fn allocate(
        &self,
        path: &str,
        owner: Option<IpAddr>,
    ) -> Result<(u64, bool), HandleError> {
        let mut inner = self.inner.write().unwrap();
        if let Some(&id) = inner.ids.get(path) {
            return Ok((id, false));
        }
        if inner.nodes.len() as u64 >= self.capacity {
            return Err(HandleError::Exhausted);
        }
        let id = match inner.free.pop() {
            Some(Reverse(id)) => id,
            None => {
                let id = inner.next_id;
                inner.next_id += 1;
                id
            }
        };
        inner.nodes.insert(id, Node { path: path.to_string(), owner });
        inner.ids.insert(path.to_string(), id);
        Ok((id, true))
    }

    /// Resolves an id to its canonical path.
    pub fn resolve(&self, id: u64) -> Result<String, HandleError> {
        self.inner
            .read()
            .unwrap()
            .nodes
            .get(&id)
            .map(|node| node.path.clone())
            .ok_or(HandleError::NotFound)
    }

    /// Releases an id, returning its charged owner so the caller can refund
    /// the handle budget.
    pub fn release(&self, id: u64) -> Option<Option<IpAddr>> {
        let mut inner = self.inner.write().unwrap();
        let node = inner.nodes.remove(&id)?;
        inner.ids.remove(&node.path);
        inner.free.push(Reverse(id));
        Some(node.owner)
    }

    /// Releases the handle of `path` and of everything beneath it.
    /// Returns the released ids with their charged owners.
    pub fn release_subtree(&self, path: &str) -> Vec<(u64, Option<IpAddr>)> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut inner = self.inner.write().unwrap();
        let ids: Vec<u64> = inner
            .ids
            .iter()
            .filter(|(p, _)| p.as_str() == path || p.starts_with(&prefix))
            .map(|(_, &id)| id)
            .collect();
        let mut released = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(node) = inner.nodes.remove(&id) {
                inner.ids.remove(&node.path);
                inner.free.push(Reverse(id));
                released.push((id, node.owner));
            }
        }
        released
    }

    /// Re-keys `from` (and its descendants) to `to` after a RENAME, so live
    /// handles keep resolving to the object under its new name.
    pub fn rename_path(&self, from: &str, to: &str) {
        let prefix = format!("{}/", from.trim_end_matches('/'));
        let mut inner = self.inner.write().unwrap();
        let moved: Vec<u64> = inner
            .ids
            .iter()
            .filter(|(p, _)| p.as_str() == from || p.starts_with(&prefix))
            .map(|(_, &id)| id)
            .collect();
        for id in moved {
            if let Some(node) = inner.nodes.get_mut(&id) {
                let new_path = if node.path == from {
                    to.to_string()
                } else {
                    format!("{}{}", to, &node.path[from.len()..])
                };
                let old_path = std::mem::replace(&mut node.path, new_path.clone());
                inner.ids.remove(&old_path);
                inner.ids.insert(new_path, id);
            }
        }
    }

    /// Drops every mapping; used on export teardown.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.nodes.clear();
        inner.ids.clear();
        inner.free.clear();
        inner.next_id = 1;
    }

    /// Encodes an id as the opaque wire handle.
    pub fn encode(&self, id: u64) -> nfs3::nfs_fh3 {
        let mut data = Vec::with_capacity(FH_LEN);
        data.extend_from_slice(&FH_VERSION.to_be_bytes());
        data.extend_from_slice(&self.generation.to_be_bytes());
        data.extend_from_slice(&id.to_be_bytes());
        data.extend_from_slice(&self.check_word(id).to_be_bytes());
        data.extend_from_slice(&[0u8; 4]);
        nfs3::nfs_fh3 { data }
    }

    /// Decodes and validates an opaque wire handle, returning the id. The
    /// id is not guaranteed to still be in the table.
    pub fn decode(&self, fh: &nfs3::nfs_fh3) -> Result<u64, HandleError> {
        if fh.data.len() != FH_LEN {
            return Err(HandleError::BadHandle);
        }
        let version = u32::from_be_bytes(fh.data[0..4].try_into().unwrap());
        if version != FH_VERSION {
            return Err(HandleError::BadHandle);
        }
        let generation = u64::from_be_bytes(fh.data[4..12].try_into().unwrap());
        let id = u64::from_be_bytes(fh.data[12..20].try_into().unwrap());
        let check = u64::from_be_bytes(fh.data[20..28].try_into().unwrap());
        if check != self.check_word(id) {
            return Err(HandleError::BadHandle);
        }
        if generation != self.generation {
            return Err(HandleError::Stale);
        }
        Ok(id)
    }

    /// Decode plus table lookup in one step.
    pub fn resolve_fh(&self, fh: &nfs3::nfs_fh3) -> Result<(u64, String), HandleError> {
        let id = self.decode(fh)?;
        let path = self.resolve(id)?;
        Ok((id, path))
    }

    fn check_word(&self, id: u64) -> u64 {
        (id ^ self.generation).wrapping_mul(FH_CHECK_MIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> HandleTable {
        HandleTable::new(42, 1000)
    }

    #[test]
    fn allocate_resolve_release_roundtrip() {
        let t = table();
        let (id, fresh) = t.allocate("/a.txt", None).unwrap();
        assert!(fresh);
        assert_eq!(t.resolve(id).unwrap(), "/a.txt");
        t.release(id).unwrap();
        assert_eq!(t.resolve(id), Err(HandleError::NotFound));
    }

    #[test]
    fn same_path_returns_same_id() {
        let t = table();
        let (a, _) = t.allocate("/x", None).unwrap();
        let (b, fresh) = t.allocate("/x", None).unwrap();
        assert_eq!(a, b);
        assert!(!fresh);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn smallest_released_id_is_reused_first() {
        let t = table();
        let ids: Vec<u64> =
            (0..5).map(|i| t.allocate(&format!("/f{i}"), None).unwrap().0).collect();
        t.release(ids[3]).unwrap();
        t.release(ids[1]).unwrap();
        let (reused, _) = t.allocate("/g", None).unwrap();
        assert_eq!(reused, ids[1]);
        let (reused2, _) = t.allocate("/h", None).unwrap();
        assert_eq!(reused2, ids[3]);
    }

    #[test]
    fn capacity_is_enforced() {
        let t = HandleTable::new(1, 2);
        t.allocate("/a", None).unwrap();
        t.allocate("/b", None).unwrap();
        assert_eq!(t.allocate("/c", None), Err(HandleError::Exhausted));
        t.release(t.lookup_path("/a").unwrap()).unwrap();
        assert!(t.allocate("/c", None).is_ok());
    }

    #[test]
    fn wire_roundtrip_and_tamper_detection() {
        let t = table();
        let (id, _) = t.allocate("/file", None).unwrap();
        let fh = t.encode(id);
        assert_eq!(fh.data.len(), 32);
        assert_eq!(t.decode(&fh).unwrap(), id);

        let mut bent = fh.clone();
        bent.data[15] ^= 0xff;
        assert_eq!(t.decode(&bent), Err(HandleError::BadHandle));

        let mut short = fh.clone();
        short.data.truncate(16);
        assert_eq!(t.decode(&short), Err(HandleError::BadHandle));
    }

    #[test]
    fn stale_generation_is_reported() {
        let old = HandleTable::new(1, 10);
        let (id, _) = old.allocate("/f", None).unwrap();
        let fh = old.encode(id);
        let new = HandleTable::new(2, 10);
        assert_eq!(new.decode(&fh), Err(HandleError::Stale));
    }

    #[test]
    fn rename_rekeys_descendants() {
        let t = table();
        let (dir, _) = t.allocate("/dir", None).unwrap();
        let (child, _) = t.allocate("/dir/a", None).unwrap();
        t.rename_path("/dir", "/moved");
        assert_eq!(t.resolve(dir).unwrap(), "/moved");
        assert_eq!(t.resolve(child).unwrap(), "/moved/a");
        assert_eq!(t.lookup_path("/moved/a"), Some(child));
        assert_eq!(t.lookup_path("/dir/a"), None);
    }

    #[test]
    fn release_subtree_returns_owners() {
        let t = table();
        let ip: IpAddr = "198.51.100.9".parse().unwrap();
        t.allocate("/d", Some(ip)).unwrap();
        t.allocate("/d/1", Some(ip)).unwrap();
        t.allocate("/other", Some(ip)).unwrap();
        let released = t.release_subtree("/d");
        assert_eq!(released.len(), 2);
        assert!(released.iter().all(|(_, owner)| *owner == Some(ip)));
        assert_eq!(t.len(), 1);
    }
}

//! Shared server state: the backend, the handle table, caches, limiter,
//! read-ahead and batch coalescer, plus the helpers the protocol handlers
//! build their semantics from.
//!
//! Nothing in here is global — every field lives on [`ServerState`] and
//! handlers receive it through the per-connection RPC context.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::batch::Batcher;
use crate::cache::{AttrCache, CachedDir, DirCache, DirSnapshotEntry, DirVerifiers};
use crate::config::ExportOptions;
use crate::error::Error;
use crate::handles::HandleTable;
use crate::protocol::rpc::TransactionTracker;
use crate::protocol::xdr::nfs3;
use crate::protocol::xdr::rpc::auth_unix;
use crate::ratelimit::{BudgetExceeded, RateLimiter};
use crate::readahead::ReadAhead;
use crate::vfs::{FileAttr, FileKind, FileSystem, FsError, FsResult, Timestamp};

/// Counters exposed to the embedder.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub requests: AtomicU64,
    pub tls_handshake_failures: AtomicU64,
    pub client_certs_validated: AtomicU64,
    pub rejected_connections: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub tls_handshake_failures: u64,
    pub client_certs_validated: u64,
    pub rejected_connections: u64,
}

impl ServerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            tls_handshake_failures: self.tls_handshake_failures.load(Ordering::Relaxed),
            client_certs_validated: self.client_certs_validated.load(Ordering::Relaxed),
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
        }
    }
}

/// One active mount as reported by MOUNT DUMP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub hostname: String,
    pub path: String,
}

/// Coalescing key: requests are grouped per (operation, handle) and, for
/// SETATTR, the exact attribute change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum BatchKey {
    GetAttr {
        handle: u64,
    },
    SetAttr {
        handle: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
    },
    ReadDir {
        handle: u64,
    },
}

#[derive(Debug, Clone)]
pub(crate) enum BatchReply {
    Attr(FsResult<FileAttr>),
    Unit(FsResult<()>),
    Dir(FsResult<CachedDir>),
}

/// Everything a request handler needs, shared across connections.
pub struct ServerState {
    pub backend: Arc<dyn FileSystem>,
    pub options: RwLock<ExportOptions>,
    pub handles: Arc<HandleTable>,
    pub attr_cache: Arc<AttrCache>,
    pub dir_cache: Arc<DirCache>,
    pub verifiers: Arc<DirVerifiers>,
    pub readahead: Arc<ReadAhead>,
    pub limiter: Arc<RateLimiter>,
    pub stats: ServerStats,
    pub transactions: TransactionTracker,
    /// Export path announced over MOUNT, normalized with a leading slash.
    pub export_name: Arc<String>,
    /// Handle id of the export root; allocated once at startup and stable
    /// for the lifetime of the export.
    pub root_id: u64,
    /// Verifier returned by WRITE/COMMIT; changes on restart.
    pub write_verf: nfs3::writeverf3,
    batcher: Mutex<Option<Batcher<BatchKey, BatchReply>>>,
    mounts: Mutex<Vec<MountEntry>>,
    mount_signal: Mutex<Option<mpsc::Sender<bool>>>,
    /// Verifiers of EXCLUSIVE creates, for idempotent retries.
    exclusive_creates: DashMap<String, nfs3::createverf3>,
    conn_ids: AtomicU64,
    pub active_connections: AtomicUsize,
}

impl ServerState {
    pub fn new(
        backend: Arc<dyn FileSystem>,
        export_name: &str,
        options: ExportOptions,
    ) -> Result<Arc<ServerState>, Error> {
        if export_name.is_empty() {
            return Err(Error::ExportPath("export name must not be empty".into()));
        }
        let export_name =
            format!("/{}", export_name.trim_start_matches('/').trim_end_matches('/'));
        let generation =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64;

        let handles =
            Arc::new(HandleTable::new(generation, options.rate_limit.file_handles_global));
        let (root_id, _) = handles
            .allocate("/", None)
            .map_err(|e| Error::Backend(format!("root handle allocation failed: {e}")))?;

        let attr_cache =
            Arc::new(AttrCache::new(options.attr_cache_size, options.attr_cache_timeout));
        let dir_cache = Arc::new(DirCache::new(
            options.dir_cache_size,
            options.dir_cache_ttl,
            options.enable_dir_cache,
        ));
        let verifiers = Arc::new(DirVerifiers::new(generation));
        let readahead =
            Arc::new(ReadAhead::new(options.read_ahead_size, options.enable_read_ahead));
        let limiter = Arc::new(RateLimiter::new(options.rate_limit.clone()));
        limiter.clone().spawn_cleanup(Duration::from_secs(60));

        let batcher = options.batch_operations.then(|| {
            make_batcher(
                options.max_batch_size,
                backend.clone(),
                handles.clone(),
                attr_cache.clone(),
                dir_cache.clone(),
                verifiers.clone(),
            )
        });

        Ok(Arc::new(ServerState {
            backend,
            options: RwLock::new(options),
            handles,
            attr_cache,
            dir_cache,
            verifiers,
            readahead,
            limiter,
            stats: ServerStats::default(),
            transactions: TransactionTracker::new(Duration::from_secs(60)),
            export_name: Arc::new(export_name),
            root_id,
            write_verf: generation.to_be_bytes(),
            batcher: Mutex::new(batcher),
            mounts: Mutex::new(Vec::new()),
            mount_signal: Mutex::new(None),
            exclusive_creates: DashMap::new(),
            conn_ids: AtomicU64::new(1),
            active_connections: AtomicUsize::new(0),
        }))
    }

    pub fn next_conn_id(&self) -> u64 {
        self.conn_ids.fetch_add(1, Ordering::Relaxed)
    }

    // ----- options ----------------------------------------------------

    pub fn read_only(&self) -> bool {
        self.options.read().unwrap().read_only
    }

    pub fn transfer_size(&self) -> u32 {
        self.options.read().unwrap().transfer_size
    }

    /// Applies a runtime options update. TLS changes are rejected; caches,
    /// read-ahead and connection caps pick up the new values immediately.
    pub fn update_options(&self, new: ExportOptions) -> Result<(), Error> {
        {
            let current = self.options.read().unwrap();
            if current.tls != new.tls {
                return Err(Error::TlsReloadRequired);
            }
        }
        self.attr_cache.resize(new.attr_cache_size, new.attr_cache_timeout);
        self.dir_cache.resize(new.dir_cache_size, new.dir_cache_ttl);
        self.dir_cache.set_enabled(new.enable_dir_cache);
        self.readahead.set_enabled(new.enable_read_ahead);
        self.readahead.set_window(new.read_ahead_size);
        *self.options.write().unwrap() = new;
        debug!("export options updated");
        Ok(())
    }

    /// Drops all cached state; called on export teardown.
    pub fn drain(&self) {
        self.attr_cache.clear();
        self.dir_cache.clear();
        self.readahead.clear();
        self.handles.clear();
        self.exclusive_creates.clear();
        self.mounts.lock().unwrap().clear();
    }

    // ----- handles -----------------------------------------------------

    pub fn root_fh(&self) -> nfs3::nfs_fh3 {
        self.handles.encode(self.root_id)
    }

    /// Decodes a wire handle and resolves it to (id, path).
    pub fn resolve_fh(&self, fh: &nfs3::nfs_fh3) -> Result<(u64, String), nfs3::nfsstat3> {
        self.handles.resolve_fh(fh).map_err(Into::into)
    }

    /// Returns a stable handle id for `path`, charging the per-IP handle
    /// budget when a fresh id is allocated.
    pub fn handle_for_path(&self, path: &str, client: IpAddr) -> Result<u64, nfs3::nfsstat3> {
        if let Some(id) = self.handles.lookup_path(path) {
            return Ok(id);
        }
        match self.limiter.allocate_handle(client) {
            Ok(()) => {}
            Err(BudgetExceeded::Global | BudgetExceeded::PerIp) => {
                // Budget pressure is transient from the client's viewpoint.
                return Err(nfs3::nfsstat3::NFS3ERR_JUKEBOX);
            }
        }
        match self.handles.allocate(path, Some(client)) {
            Ok((id, fresh)) => {
                if !fresh {
                    // Lost the race against a concurrent allocation for the
                    // same path; the existing charge stands.
                    self.limiter.release_handle(client);
                }
                Ok(id)
            }
            Err(_) => {
                self.limiter.release_handle(client);
                Err(nfs3::nfsstat3::NFS3ERR_JUKEBOX)
            }
        }
    }

    /// Releases the handles of `path` and its subtree, refunding budgets
    /// and dropping read-ahead slots. Used by REMOVE/RMDIR and teardown.
    pub fn release_path(&self, path: &str) {
        for (id, owner) in self.handles.release_subtree(path) {
            self.readahead.invalidate(id);
            if let Some(ip) = owner {
                self.limiter.release_handle(ip);
            }
        }
    }

    // ----- attributes ---------------------------------------------------

    /// Cached GETATTR. A hit answers from the cache; a miss goes through
    /// the batch coalescer when enabled, otherwise straight to the backend.
    pub async fn getattr(&self, id: u64, path: &str) -> FsResult<FileAttr> {
        if let Some(attr) = self.attr_cache.get(path) {
            return Ok(attr);
        }
        let batcher = self.batcher.lock().unwrap().clone();
        if let Some(batcher) = batcher {
            if let Ok(BatchReply::Attr(result)) =
                batcher.submit(BatchKey::GetAttr { handle: id }).await
            {
                return result;
            }
            // Executor gone mid-shutdown; fall through to a direct call.
        }
        let attr = self.backend.lstat(path).await?;
        self.attr_cache.put(path, attr.clone());
        Ok(attr)
    }

    /// SETATTR-style attribute application, coalesced when batching is on
    /// and the change carries no time update.
    pub(crate) async fn apply_setattr_batched(
        &self,
        id: u64,
        path: &str,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
    ) -> FsResult<()> {
        let batcher = self.batcher.lock().unwrap().clone();
        if let Some(batcher) = batcher {
            if let Ok(BatchReply::Unit(result)) = batcher
                .submit(BatchKey::SetAttr { handle: id, mode, uid, gid, size })
                .await
            {
                return result;
            }
        }
        apply_setattr(self.backend.as_ref(), path, mode, uid, gid, size).await
    }

    /// post_op_attr for replies: best effort, Void on failure.
    pub async fn post_op(&self, id: u64, path: &str) -> nfs3::post_op_attr {
        match self.getattr(id, path).await {
            Ok(attr) => nfs3::post_op_attr::attributes(to_fattr3(&attr)),
            Err(_) => nfs3::post_op_attr::Void,
        }
    }

    /// pre_op_attr from a fresh backend stat, bypassing the cache so wcc
    /// data reflects the true pre-state.
    pub async fn pre_op(&self, path: &str) -> nfs3::pre_op_attr {
        match self.backend.lstat(path).await {
            Ok(attr) => {
                let f = to_fattr3(&attr);
                nfs3::pre_op_attr::attributes(nfs3::wcc_attr::from(&f))
            }
            Err(_) => nfs3::pre_op_attr::Void,
        }
    }

    // ----- invalidation -------------------------------------------------

    /// After a data or size mutation of `path`: drop its cached attributes
    /// and read-ahead buffer before the reply goes out.
    pub fn invalidate_file(&self, id: u64, path: &str) {
        self.attr_cache.invalidate(path);
        self.readahead.invalidate(id);
    }

    /// After a namespace mutation under `parent`: drop the cached listing,
    /// bump the cookie verifier and drop the parent's cached attributes.
    pub fn note_dir_mutation(&self, parent: &str) {
        self.dir_cache.invalidate(parent);
        self.verifiers.bump(parent);
        self.attr_cache.invalidate(parent);
    }

    /// After REMOVE/RMDIR/RENAME of a whole subtree.
    pub fn invalidate_subtree(&self, path: &str) {
        self.attr_cache.invalidate_prefix(path);
        self.dir_cache.invalidate_prefix(path);
    }

    // ----- directory listings ------------------------------------------

    /// Returns the cached listing of `path` when its verifier is current,
    /// otherwise captures a fresh one (through the coalescer if enabled).
    pub async fn load_dir(&self, id: u64, path: &str) -> FsResult<CachedDir> {
        if let Some(hit) = self.dir_cache.get(path) {
            if hit.verifier == self.verifiers.current(path) {
                return Ok(hit);
            }
        }
        let batcher = self.batcher.lock().unwrap().clone();
        if let Some(batcher) = batcher {
            if let Ok(BatchReply::Dir(result)) =
                batcher.submit(BatchKey::ReadDir { handle: id }).await
            {
                return result;
            }
        }
        capture_dir(
            self.backend.as_ref(),
            &self.dir_cache,
            &self.verifiers,
            path,
        )
        .await
    }

    // ----- access evaluation -------------------------------------------

    /// ACCESS evaluation from mode bits and AUTH_UNIX credentials. On a
    /// read-only export the write bits are never granted.
    pub fn access_for(&self, attr: &FileAttr, requested: u32, auth: &auth_unix) -> u32 {
        let mode = attr.mode;
        let (r, w, x) = if auth.uid == 0 {
            (true, true, true)
        } else if auth.uid == attr.uid {
            (mode & 0o400 != 0, mode & 0o200 != 0, mode & 0o100 != 0)
        } else if auth.gid == attr.gid || auth.gids.contains(&attr.gid) {
            (mode & 0o040 != 0, mode & 0o020 != 0, mode & 0o010 != 0)
        } else {
            (mode & 0o004 != 0, mode & 0o002 != 0, mode & 0o001 != 0)
        };
        let is_dir = attr.kind == FileKind::Directory;
        let mut granted = 0;
        if r {
            granted |= nfs3::ACCESS3_READ;
        }
        if x {
            granted |= if is_dir { nfs3::ACCESS3_LOOKUP } else { nfs3::ACCESS3_EXECUTE };
        }
        if w && !self.read_only() {
            granted |= nfs3::ACCESS3_MODIFY | nfs3::ACCESS3_EXTEND;
            if is_dir {
                granted |= nfs3::ACCESS3_DELETE;
            }
        }
        requested & granted
    }

    // ----- mounts ------------------------------------------------------

    pub fn set_mount_signal(&self, signal: mpsc::Sender<bool>) {
        *self.mount_signal.lock().unwrap() = Some(signal);
    }

    pub async fn signal_mount(&self, mounted: bool) {
        let signal = self.mount_signal.lock().unwrap().clone();
        if let Some(chan) = signal {
            let _ = chan.send(mounted).await;
        }
    }

    pub fn register_mount(&self, hostname: &str, path: &str) {
        let mut mounts = self.mounts.lock().unwrap();
        let entry = MountEntry { hostname: hostname.to_string(), path: path.to_string() };
        if !mounts.contains(&entry) {
            mounts.push(entry);
        }
    }

    pub fn unregister_mount(&self, hostname: &str, path: &str) {
        self.mounts
            .lock()
            .unwrap()
            .retain(|m| !(m.hostname == hostname && m.path == path));
    }

    pub fn unregister_all_mounts(&self, hostname: &str) {
        self.mounts.lock().unwrap().retain(|m| m.hostname != hostname);
    }

    pub fn mount_list(&self) -> Vec<MountEntry> {
        self.mounts.lock().unwrap().clone()
    }

    // ----- exclusive create --------------------------------------------

    pub fn exclusive_seen(&self, path: &str) -> Option<nfs3::createverf3> {
        self.exclusive_creates.get(path).map(|v| *v)
    }

    pub fn remember_exclusive(&self, path: &str, verf: nfs3::createverf3) {
        self.exclusive_creates.insert(path.to_string(), verf);
    }

    pub fn forget_exclusive(&self, path: &str) {
        self.exclusive_creates.remove(path);
    }

    // ----- path handling -----------------------------------------------

    /// Joins a LOOKUP-style name onto a directory path. `.` resolves to
    /// the directory itself and `..` to its parent; a `..` that would
    /// escape the export root is refused with ACCES, as is any name
    /// containing a separator.
    pub fn join_child(&self, dir: &str, name: &nfs3::filename3) -> Result<String, nfs3::nfsstat3> {
        let name = std::str::from_utf8(name).map_err(|_| nfs3::nfsstat3::NFS3ERR_INVAL)?;
        if name.is_empty() {
            return Err(nfs3::nfsstat3::NFS3ERR_INVAL);
        }
        if name.len() > 255 {
            return Err(nfs3::nfsstat3::NFS3ERR_NAMETOOLONG);
        }
        match name {
            "." => Ok(dir.to_string()),
            ".." => {
                if dir == "/" {
                    warn!(dir, "lookup of .. would escape the export root");
                    Err(nfs3::nfsstat3::NFS3ERR_ACCES)
                } else {
                    Ok(parent_of(dir))
                }
            }
            _ if name.contains('/') || name.contains('\0') => {
                warn!(name, "path separator in component refused");
                Err(nfs3::nfsstat3::NFS3ERR_ACCES)
            }
            _ => {
                if dir == "/" {
                    Ok(format!("/{name}"))
                } else {
                    Ok(format!("{dir}/{name}"))
                }
            }
        }
    }
}

/// Parent directory of a canonical path; the root is its own parent.
pub fn parent_of(path: &str) -> String {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Maps backend error kinds to NFS status codes. The table is kind-based;
/// unclassified I/O errors fall back to NFS3ERR_IO.
pub fn nfs_status(err: &FsError) -> nfs3::nfsstat3 {
    use nfs3::nfsstat3::*;
    match err {
        FsError::NotFound => NFS3ERR_NOENT,
        FsError::Permission => NFS3ERR_ACCES,
        FsError::Exists => NFS3ERR_EXIST,
        FsError::Invalid => NFS3ERR_INVAL,
        FsError::NotEmpty => NFS3ERR_NOTEMPTY,
        FsError::IsDirectory => NFS3ERR_ISDIR,
        FsError::NotDirectory => NFS3ERR_NOTDIR,
        FsError::NoSpace => NFS3ERR_NOSPC,
        FsError::QuotaExceeded => NFS3ERR_DQUOT,
        FsError::ReadOnly => NFS3ERR_ROFS,
        FsError::TooLarge => NFS3ERR_FBIG,
        FsError::NameTooLong => NFS3ERR_NAMETOOLONG,
        FsError::NotSupported => NFS3ERR_NOTSUPP,
        FsError::Io(_) => NFS3ERR_IO,
    }
}

pub fn to_nfstime(ts: &Timestamp) -> nfs3::nfstime3 {
    nfs3::nfstime3 { seconds: ts.seconds as u32, nseconds: ts.nanos }
}

pub fn to_ftype3(kind: FileKind) -> nfs3::ftype3 {
    match kind {
        FileKind::Regular => nfs3::ftype3::NF3REG,
        FileKind::Directory => nfs3::ftype3::NF3DIR,
        FileKind::Symlink => nfs3::ftype3::NF3LNK,
        FileKind::Socket => nfs3::ftype3::NF3SOCK,
        FileKind::Fifo => nfs3::ftype3::NF3FIFO,
        FileKind::CharDevice => nfs3::ftype3::NF3CHR,
        FileKind::BlockDevice => nfs3::ftype3::NF3BLK,
    }
}

pub fn from_ftype3(ftype: nfs3::ftype3) -> FileKind {
    match ftype {
        nfs3::ftype3::NF3REG => FileKind::Regular,
        nfs3::ftype3::NF3DIR => FileKind::Directory,
        nfs3::ftype3::NF3LNK => FileKind::Symlink,
        nfs3::ftype3::NF3SOCK => FileKind::Socket,
        nfs3::ftype3::NF3FIFO => FileKind::Fifo,
        nfs3::ftype3::NF3CHR => FileKind::CharDevice,
        nfs3::ftype3::NF3BLK => FileKind::BlockDevice,
    }
}

/// Converts backend attributes to the wire representation.
pub fn to_fattr3(attr: &FileAttr) -> nfs3::fattr3 {
    nfs3::fattr3 {
        ftype: to_ftype3(attr.kind),
        mode: attr.mode & 0o7777,
        nlink: attr.nlink.max(1),
        uid: attr.uid,
        gid: attr.gid,
        size: attr.size,
        used: if attr.used > 0 { attr.used } else { attr.size },
        rdev: nfs3::specdata3 { specdata1: attr.rdev.0, specdata2: attr.rdev.1 },
        fsid: attr.fsid,
        fileid: attr.fileid,
        atime: to_nfstime(&attr.atime),
        mtime: to_nfstime(&attr.mtime),
        ctime: to_nfstime(&attr.ctime),
    }
}

/// Applies a decomposed SETATTR change to the backend.
pub(crate) async fn apply_setattr(
    backend: &dyn FileSystem,
    path: &str,
    mode: Option<u32>,
    uid: Option<u32>,
    gid: Option<u32>,
    size: Option<u64>,
) -> FsResult<()> {
    if let Some(mode) = mode {
        backend.chmod(path, mode).await?;
    }
    if uid.is_some() || gid.is_some() {
        backend.chown(path, uid, gid).await?;
    }
    if let Some(size) = size {
        backend.truncate(path, size).await?;
    }
    Ok(())
}

/// One authoritative listing of `path`: reads the backend, stamps the
/// current verifier and installs the snapshot in the directory cache.
pub(crate) async fn capture_dir(
    backend: &dyn FileSystem,
    dir_cache: &DirCache,
    verifiers: &DirVerifiers,
    path: &str,
) -> FsResult<CachedDir> {
    let entries = backend.read_dir(path).await?;
    let snapshot = CachedDir {
        entries: Arc::new(
            entries
                .into_iter()
                .map(|e| DirSnapshotEntry {
                    name: e.name,
                    fileid: e.fileid,
                    kind: e.kind,
                    attr: None,
                })
                .collect(),
        ),
        verifier: verifiers.current(path),
    };
    dir_cache.put(path, snapshot.clone());
    Ok(snapshot)
}

fn make_batcher(
    max_batch: usize,
    backend: Arc<dyn FileSystem>,
    handles: Arc<HandleTable>,
    attr_cache: Arc<AttrCache>,
    dir_cache: Arc<DirCache>,
    verifiers: Arc<DirVerifiers>,
) -> Batcher<BatchKey, BatchReply> {
    Batcher::new(
        max_batch,
        Duration::from_millis(1),
        Box::new(move |key: BatchKey| -> BoxFuture<'static, BatchReply> {
            let backend = backend.clone();
            let handles = handles.clone();
            let attr_cache = attr_cache.clone();
            let dir_cache = dir_cache.clone();
            let verifiers = verifiers.clone();
            Box::pin(async move {
                match key {
                    BatchKey::GetAttr { handle } => {
                        let path = match handles.resolve(handle) {
                            Ok(path) => path,
                            Err(_) => return BatchReply::Attr(Err(FsError::NotFound)),
                        };
                        let result = backend.lstat(&path).await;
                        if let Ok(attr) = &result {
                            attr_cache.put(&path, attr.clone());
                        }
                        BatchReply::Attr(result)
                    }
                    BatchKey::SetAttr { handle, mode, uid, gid, size } => {
                        let path = match handles.resolve(handle) {
                            Ok(path) => path,
                            Err(_) => return BatchReply::Unit(Err(FsError::NotFound)),
                        };
                        let result =
                            apply_setattr(backend.as_ref(), &path, mode, uid, gid, size).await;
                        attr_cache.invalidate(&path);
                        BatchReply::Unit(result)
                    }
                    BatchKey::ReadDir { handle } => {
                        let path = match handles.resolve(handle) {
                            Ok(path) => path,
                            Err(_) => return BatchReply::Dir(Err(FsError::NotFound)),
                        };
                        BatchReply::Dir(
                            capture_dir(backend.as_ref(), &dir_cache, &verifiers, &path).await,
                        )
                    }
                }
            })
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_of_walks_up() {
        assert_eq!(parent_of("/a/b/c"), "/a/b");
        assert_eq!(parent_of("/a"), "/");
        assert_eq!(parent_of("/"), "/");
    }

    #[test]
    fn error_table_matches_spec() {
        assert_eq!(nfs_status(&FsError::NotFound), nfs3::nfsstat3::NFS3ERR_NOENT);
        assert_eq!(nfs_status(&FsError::Permission), nfs3::nfsstat3::NFS3ERR_ACCES);
        assert_eq!(nfs_status(&FsError::Exists), nfs3::nfsstat3::NFS3ERR_EXIST);
        assert_eq!(nfs_status(&FsError::NotEmpty), nfs3::nfsstat3::NFS3ERR_NOTEMPTY);
        assert_eq!(nfs_status(&FsError::ReadOnly), nfs3::nfsstat3::NFS3ERR_ROFS);
        assert_eq!(nfs_status(&FsError::Io("disk".into())), nfs3::nfsstat3::NFS3ERR_IO);
    }
}

//! Shared test support: an in-memory file system backend and a harness
//! that drives the server through the public RPC dispatcher with raw XDR
//! messages, the way a TCP client would after framing.

// Each integration-test binary compiles this module and uses a subset.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use nfs_bridge::config::ExportOptions;
use nfs_bridge::protocol::rpc::{handle_rpc, Context};
use nfs_bridge::server::ServerState;
use nfs_bridge::vfs::{
    DirEntry, FileAttr, FileKind, FileSystem, FsError, FsResult, Timestamp,
};
use nfs_bridge::xdr::{self, Serialize};

#[derive(Clone, Debug)]
struct MemNode {
    kind: FileKind,
    mode: u32,
    uid: u32,
    gid: u32,
    data: Vec<u8>,
    target: String,
    fileid: u64,
    atime: Timestamp,
    mtime: Timestamp,
    ctime: Timestamp,
}

impl MemNode {
    fn new(kind: FileKind, mode: u32, fileid: u64) -> MemNode {
        let now = Timestamp::now();
        MemNode {
            kind,
            mode,
            uid: 0,
            gid: 0,
            data: Vec::new(),
            target: String::new(),
            fileid,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    fn attr(&self) -> FileAttr {
        FileAttr {
            kind: self.kind,
            mode: self.mode,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            size: if self.kind == FileKind::Symlink {
                self.target.len() as u64
            } else {
                self.data.len() as u64
            },
            used: self.data.len() as u64,
            rdev: (0, 0),
            fsid: 1,
            fileid: self.fileid,
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
        }
    }
}

/// A fully in-memory backend rooted at "/". The root directory has
/// fileid 1 and mode 0o755.
pub struct MemFs {
    nodes: Mutex<HashMap<String, MemNode>>,
    next_fileid: AtomicU64,
    /// Counts backend stat calls, for cache behavior assertions.
    pub stats_served: AtomicU64,
}

impl MemFs {
    pub fn new() -> MemFs {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), MemNode::new(FileKind::Directory, 0o755, 1));
        MemFs {
            nodes: Mutex::new(nodes),
            next_fileid: AtomicU64::new(2),
            stats_served: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_fileid.fetch_add(1, Ordering::SeqCst)
    }

    fn parent_exists(nodes: &HashMap<String, MemNode>, path: &str) -> FsResult<()> {
        let parent = match path.trim_end_matches('/').rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(idx) => path[..idx].to_string(),
        };
        match nodes.get(&parent) {
            Some(node) if node.kind == FileKind::Directory => Ok(()),
            Some(_) => Err(FsError::NotDirectory),
            None => Err(FsError::NotFound),
        }
    }

    fn children<'a>(
        nodes: &'a HashMap<String, MemNode>,
        dir: &str,
    ) -> impl Iterator<Item = (&'a String, &'a MemNode)> {
        let prefix = if dir == "/" { "/".to_string() } else { format!("{dir}/") };
        nodes.iter().filter(move |(path, _)| {
            path.as_str() != "/"
                && path.starts_with(&prefix)
                && !path[prefix.len()..].contains('/')
        })
    }
}

#[async_trait]
impl FileSystem for MemFs {
    async fn stat(&self, path: &str) -> FsResult<FileAttr> {
        self.stats_served.fetch_add(1, Ordering::SeqCst);
        let nodes = self.nodes.lock().unwrap();
        nodes.get(path).map(MemNode::attr).ok_or(FsError::NotFound)
    }

    async fn read_dir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        let nodes = self.nodes.lock().unwrap();
        match nodes.get(path) {
            Some(node) if node.kind == FileKind::Directory => {}
            Some(_) => return Err(FsError::NotDirectory),
            None => return Err(FsError::NotFound),
        }
        let mut entries: Vec<DirEntry> = Self::children(&nodes, path)
            .map(|(child_path, node)| DirEntry {
                name: child_path.rsplit('/').next().unwrap_or_default().to_string(),
                fileid: node.fileid,
                kind: node.kind,
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read_file(&self, path: &str, offset: u64, count: u32) -> FsResult<(Vec<u8>, bool)> {
        let nodes = self.nodes.lock().unwrap();
        let node = nodes.get(path).ok_or(FsError::NotFound)?;
        if node.kind == FileKind::Directory {
            return Err(FsError::IsDirectory);
        }
        let start = (offset as usize).min(node.data.len());
        let end = (start + count as usize).min(node.data.len());
        Ok((node.data[start..end].to_vec(), end == node.data.len()))
    }

    async fn write_file(&self, path: &str, offset: u64, data: &[u8]) -> FsResult<u32> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.get_mut(path).ok_or(FsError::NotFound)?;
        if node.kind == FileKind::Directory {
            return Err(FsError::IsDirectory);
        }
        let end = offset as usize + data.len();
        if node.data.len() < end {
            node.data.resize(end, 0);
        }
        node.data[offset as usize..end].copy_from_slice(data);
        node.mtime = Timestamp::now();
        node.ctime = node.mtime;
        Ok(data.len() as u32)
    }

    async fn create(&self, path: &str, mode: u32) -> FsResult<FileAttr> {
        let mut nodes = self.nodes.lock().unwrap();
        Self::parent_exists(&nodes, path)?;
        if let Some(existing) = nodes.get(path) {
            return Ok(existing.attr());
        }
        let node = MemNode::new(FileKind::Regular, mode, self.next_id());
        let attr = node.attr();
        nodes.insert(path.to_string(), node);
        Ok(attr)
    }

    async fn mkdir(&self, path: &str, mode: u32) -> FsResult<FileAttr> {
        let mut nodes = self.nodes.lock().unwrap();
        Self::parent_exists(&nodes, path)?;
        if nodes.contains_key(path) {
            return Err(FsError::Exists);
        }
        let node = MemNode::new(FileKind::Directory, mode, self.next_id());
        let attr = node.attr();
        nodes.insert(path.to_string(), node);
        Ok(attr)
    }

    async fn remove(&self, path: &str) -> FsResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.get(path).ok_or(FsError::NotFound)?;
        if node.kind == FileKind::Directory && Self::children(&nodes, path).next().is_some() {
            return Err(FsError::NotEmpty);
        }
        nodes.remove(path);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        if !nodes.contains_key(from) {
            return Err(FsError::NotFound);
        }
        Self::parent_exists(&nodes, to)?;
        let prefix = format!("{from}/");
        let moved: Vec<String> = nodes
            .keys()
            .filter(|p| p.as_str() == from || p.starts_with(&prefix))
            .cloned()
            .collect();
        for old_path in moved {
            let node = nodes.remove(&old_path).unwrap();
            let new_path = if old_path == from {
                to.to_string()
            } else {
                format!("{to}{}", &old_path[from.len()..])
            };
            nodes.insert(new_path, node);
        }
        Ok(())
    }

    async fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.get_mut(path).ok_or(FsError::NotFound)?;
        node.mode = mode & 0o7777;
        node.ctime = Timestamp::now();
        Ok(())
    }

    async fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.get_mut(path).ok_or(FsError::NotFound)?;
        if let Some(uid) = uid {
            node.uid = uid;
        }
        if let Some(gid) = gid {
            node.gid = gid;
        }
        node.ctime = Timestamp::now();
        Ok(())
    }

    async fn chtimes(
        &self,
        path: &str,
        atime: Option<Timestamp>,
        mtime: Option<Timestamp>,
    ) -> FsResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.get_mut(path).ok_or(FsError::NotFound)?;
        if let Some(atime) = atime {
            node.atime = atime;
        }
        if let Some(mtime) = mtime {
            node.mtime = mtime;
        }
        node.ctime = Timestamp::now();
        Ok(())
    }

    async fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.get_mut(path).ok_or(FsError::NotFound)?;
        if node.kind == FileKind::Directory {
            return Err(FsError::IsDirectory);
        }
        node.data.resize(size as usize, 0);
        node.mtime = Timestamp::now();
        node.ctime = node.mtime;
        Ok(())
    }

    async fn symlink(&self, target: &str, link: &str) -> FsResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        Self::parent_exists(&nodes, link)?;
        if nodes.contains_key(link) {
            return Err(FsError::Exists);
        }
        let mut node = MemNode::new(FileKind::Symlink, 0o777, self.next_id());
        node.target = target.to_string();
        nodes.insert(link.to_string(), node);
        Ok(())
    }

    async fn readlink(&self, path: &str) -> FsResult<String> {
        let nodes = self.nodes.lock().unwrap();
        let node = nodes.get(path).ok_or(FsError::NotFound)?;
        if node.kind != FileKind::Symlink {
            return Err(FsError::Invalid);
        }
        Ok(node.target.clone())
    }
}

/// Export name used by every test server.
pub const EXPORT: &str = "/export/test";

/// Server plus a ready-made connection context.
pub struct TestServer {
    pub state: Arc<ServerState>,
}

impl TestServer {
    pub fn new(options: ExportOptions) -> TestServer {
        let backend = Arc::new(MemFs::new());
        TestServer { state: ServerState::new(backend, EXPORT, options).unwrap() }
    }

    pub fn with_backend(backend: Arc<MemFs>, options: ExportOptions) -> TestServer {
        TestServer { state: ServerState::new(backend, EXPORT, options).unwrap() }
    }

    pub fn context(&self) -> Context {
        self.context_from("192.0.2.50:1001")
    }

    pub fn context_from(&self, addr: &str) -> Context {
        let client_addr: SocketAddr = addr.parse().unwrap();
        Context {
            local_port: 2049,
            client_addr,
            conn_id: self.state.next_conn_id(),
            auth: xdr::rpc::auth_unix::default(),
            server: self.state.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sends one RPC call through the dispatcher and returns the raw reply
    /// bytes. Panics if the dispatcher dropped the call (retransmission).
    pub async fn call(
        &self,
        context: &Context,
        prog: u32,
        vers: u32,
        proc: u32,
        args: &[u8],
    ) -> Vec<u8> {
        self.try_call(context, prog, vers, proc, args)
            .await
            .expect("dispatcher dropped the call")
    }

    /// Like `call`, but surfaces dropped calls as `None`.
    pub async fn try_call(
        &self,
        context: &Context,
        prog: u32,
        vers: u32,
        proc: u32,
        args: &[u8],
    ) -> Option<Vec<u8>> {
        let request = build_call(next_xid(), prog, vers, proc, args);
        let mut input = Cursor::new(request);
        let mut reply = Vec::new();
        let replied = handle_rpc(&mut input, &mut Cursor::new(&mut reply), context.clone())
            .await
            .expect("dispatcher failed");
        replied.then_some(reply)
    }
}

static XID: AtomicU64 = AtomicU64::new(1);

pub fn next_xid() -> u32 {
    XID.fetch_add(1, Ordering::SeqCst) as u32
}

/// Serializes a complete RPC call message with AUTH_NULL credentials.
pub fn build_call(xid: u32, prog: u32, vers: u32, proc: u32, args: &[u8]) -> Vec<u8> {
    let msg = xdr::rpc::rpc_msg {
        xid,
        body: xdr::rpc::rpc_body::CALL(xdr::rpc::call_body {
            rpcvers: 2,
            prog,
            vers,
            proc,
            cred: xdr::rpc::opaque_auth::default(),
            verf: xdr::rpc::opaque_auth::default(),
        }),
    };
    let mut bytes = Vec::new();
    msg.serialize(&mut bytes).unwrap();
    bytes.extend_from_slice(args);
    bytes
}

/// Splits an accepted SUCCESS reply into (xid, procedure result bytes).
/// Panics when the reply was not accepted with SUCCESS.
pub fn accepted_body(reply: &[u8]) -> (u32, &[u8]) {
    let xid = u32::from_be_bytes(reply[0..4].try_into().unwrap());
    let msg_type = u32::from_be_bytes(reply[4..8].try_into().unwrap());
    assert_eq!(msg_type, 1, "expected a REPLY");
    let reply_stat = u32::from_be_bytes(reply[8..12].try_into().unwrap());
    assert_eq!(reply_stat, 0, "expected MSG_ACCEPTED");
    // verifier: flavor + opaque length (always empty from this server)
    let verf_len = u32::from_be_bytes(reply[16..20].try_into().unwrap());
    assert_eq!(verf_len, 0);
    let accept_stat = u32::from_be_bytes(reply[20..24].try_into().unwrap());
    assert_eq!(accept_stat, 0, "expected SUCCESS accept_stat");
    (xid, &reply[24..])
}

/// The accept_stat of a reply (e.g. 4 for GARBAGE_ARGS).
pub fn accept_stat(reply: &[u8]) -> u32 {
    u32::from_be_bytes(reply[20..24].try_into().unwrap())
}

/// Reads the leading NFS status code of a procedure result body.
pub fn nfs_status_of(body: &[u8]) -> u32 {
    u32::from_be_bytes(body[0..4].try_into().unwrap())
}

/// Serializes any XDR value to bytes.
pub fn to_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    let mut bytes = Vec::new();
    value.serialize(&mut bytes).unwrap();
    bytes
}

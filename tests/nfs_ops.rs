//! End-to-end NFSv3 procedure tests driven through the RPC dispatcher
//! against the in-memory backend.

mod support;

use std::io::Cursor;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use nfs_bridge::vfs::FileSystem;

use nfs_bridge::config::ExportOptions;
use nfs_bridge::xdr::{deserialize, nfs3};
use support::*;

const NFS: u32 = 100003;

const GETATTR: u32 = 1;
const SETATTR: u32 = 2;
const LOOKUP: u32 = 3;
const ACCESS: u32 = 4;
const READLINK: u32 = 5;
const READ: u32 = 6;
const WRITE: u32 = 7;
const CREATE: u32 = 8;
const MKDIR: u32 = 9;
const SYMLINK: u32 = 10;
const REMOVE: u32 = 12;
const RMDIR: u32 = 13;
const RENAME: u32 = 14;
const READDIR: u32 = 16;
const FSINFO: u32 = 19;
const COMMIT: u32 = 21;

const OK: u32 = 0;
const ERR_NOENT: u32 = 2;
const ERR_ACCES: u32 = 13;
const ERR_INVAL: u32 = 22;
const ERR_ROFS: u32 = 30;
const ERR_NOTEMPTY: u32 = 66;
const ERR_BAD_COOKIE: u32 = 10003;
const ERR_JUKEBOX: u32 = 10008;

fn diropargs(dir: &nfs3::nfs_fh3, name: &str) -> Vec<u8> {
    to_bytes(&nfs3::diropargs3 { dir: dir.clone(), name: nfs3::filename3::from(name) })
}

fn create_unchecked(dir: &nfs3::nfs_fh3, name: &str, mode: u32) -> Vec<u8> {
    to_bytes(&nfs3::file::CREATE3args {
        dirops: nfs3::diropargs3 { dir: dir.clone(), name: nfs3::filename3::from(name) },
        how: nfs3::file::createhow3::UNCHECKED(nfs3::sattr3 {
            mode: nfs3::set_mode3::mode(mode),
            ..nfs3::sattr3::default()
        }),
    })
}

/// Parses a LOOKUP/CREATE-style success body far enough to pull out the
/// returned file handle.
fn handle_from_create_body(body: &[u8]) -> nfs3::nfs_fh3 {
    let mut cursor = Cursor::new(body);
    let status = deserialize::<u32>(&mut cursor).unwrap();
    assert_eq!(status, OK);
    let present = deserialize::<bool>(&mut cursor).unwrap();
    assert!(present, "create must return a handle");
    deserialize::<nfs3::nfs_fh3>(&mut cursor).unwrap()
}

fn handle_from_lookup_body(body: &[u8]) -> nfs3::nfs_fh3 {
    let mut cursor = Cursor::new(body);
    let status = deserialize::<u32>(&mut cursor).unwrap();
    assert_eq!(status, OK);
    deserialize::<nfs3::nfs_fh3>(&mut cursor).unwrap()
}

fn attr_from_getattr_body(body: &[u8]) -> nfs3::fattr3 {
    let mut cursor = Cursor::new(body);
    let status = deserialize::<u32>(&mut cursor).unwrap();
    assert_eq!(status, OK);
    deserialize::<nfs3::fattr3>(&mut cursor).unwrap()
}

#[tokio::test]
async fn stat_root_reports_directory() {
    let server = TestServer::new(ExportOptions::default());
    let context = server.context();
    let root = server.state.root_fh();
    assert_eq!(root.data.len(), 32);

    let reply = server.call(&context, NFS, 3, GETATTR, &to_bytes(&root)).await;
    let (_, body) = accepted_body(&reply);
    let attr = attr_from_getattr_body(body);
    assert_eq!(attr.ftype, nfs3::ftype3::NF3DIR);
    assert_eq!(attr.mode & 0o777, 0o755);
    assert_eq!(attr.fileid, 1);
}

#[tokio::test]
async fn create_write_read_roundtrip() {
    let server = TestServer::new(ExportOptions::default());
    let context = server.context();
    let root = server.state.root_fh();

    // The file does not exist yet.
    let reply = server.call(&context, NFS, 3, LOOKUP, &diropargs(&root, "hello.txt")).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(nfs_status_of(body), ERR_NOENT);

    let reply = server
        .call(&context, NFS, 3, CREATE, &create_unchecked(&root, "hello.txt", 0o644))
        .await;
    let (_, body) = accepted_body(&reply);
    let fh = handle_from_create_body(body);

    let reply = server.call(&context, NFS, 3, GETATTR, &to_bytes(&fh)).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(attr_from_getattr_body(body).size, 0);

    let write_args = to_bytes(&nfs3::file::WRITE3args {
        file: fh.clone(),
        offset: 0,
        count: 5,
        stable: nfs3::file::stable_how::FILE_SYNC,
        data: b"HELLO".to_vec(),
    });
    let reply = server.call(&context, NFS, 3, WRITE, &write_args).await;
    let (_, body) = accepted_body(&reply);
    let mut cursor = Cursor::new(body);
    assert_eq!(deserialize::<u32>(&mut cursor).unwrap(), OK);
    let resok = deserialize::<nfs3::file::WRITE3resok>(&mut cursor).unwrap();
    assert_eq!(resok.count, 5);
    assert_eq!(resok.committed, nfs3::file::stable_how::FILE_SYNC);

    let read_args =
        to_bytes(&nfs3::file::READ3args { file: fh.clone(), offset: 0, count: 8 });
    let reply = server.call(&context, NFS, 3, READ, &read_args).await;
    let (_, body) = accepted_body(&reply);
    let mut cursor = Cursor::new(body);
    assert_eq!(deserialize::<u32>(&mut cursor).unwrap(), OK);
    let resok = deserialize::<nfs3::file::READ3resok>(&mut cursor).unwrap();
    assert_eq!(resok.data, b"HELLO");
    assert!(resok.eof);

    // A second LOOKUP returns the same stable handle.
    let reply = server.call(&context, NFS, 3, LOOKUP, &diropargs(&root, "hello.txt")).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(handle_from_lookup_body(body), fh);
}

#[tokio::test]
async fn write_invalidates_cached_attributes() {
    let backend = Arc::new(MemFs::new());
    let server = TestServer::with_backend(backend.clone(), ExportOptions::default());
    let context = server.context();
    let root = server.state.root_fh();

    let reply =
        server.call(&context, NFS, 3, CREATE, &create_unchecked(&root, "c.txt", 0o644)).await;
    let (_, body) = accepted_body(&reply);
    let fh = handle_from_create_body(body);

    let write5 = to_bytes(&nfs3::file::WRITE3args {
        file: fh.clone(),
        offset: 0,
        count: 5,
        stable: nfs3::file::stable_how::FILE_SYNC,
        data: b"HELLO".to_vec(),
    });
    server.call(&context, NFS, 3, WRITE, &write5).await;

    let reply = server.call(&context, NFS, 3, GETATTR, &to_bytes(&fh)).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(attr_from_getattr_body(body).size, 5);

    // The second GETATTR is served from the attribute cache.
    let stats_before = backend.stats_served.load(Ordering::SeqCst);
    let reply = server.call(&context, NFS, 3, GETATTR, &to_bytes(&fh)).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(attr_from_getattr_body(body).size, 5);
    assert_eq!(backend.stats_served.load(Ordering::SeqCst), stats_before);

    // A write must invalidate the entry before the reply.
    let write1 = to_bytes(&nfs3::file::WRITE3args {
        file: fh.clone(),
        offset: 5,
        count: 1,
        stable: nfs3::file::stable_how::FILE_SYNC,
        data: b"!".to_vec(),
    });
    server.call(&context, NFS, 3, WRITE, &write1).await;

    let reply = server.call(&context, NFS, 3, GETATTR, &to_bytes(&fh)).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(attr_from_getattr_body(body).size, 6);
}

#[tokio::test]
async fn read_only_export_rejects_mutation_but_serves_reads() {
    let backend = Arc::new(MemFs::new());
    backend.create("/data.txt", 0o644).await.unwrap();
    backend.write_file("/data.txt", 0, b"payload").await.unwrap();

    let options = ExportOptions { read_only: true, ..ExportOptions::default() };
    let server = TestServer::with_backend(backend, options);
    let context = server.context();
    let root = server.state.root_fh();

    let reply = server.call(&context, NFS, 3, LOOKUP, &diropargs(&root, "data.txt")).await;
    let (_, body) = accepted_body(&reply);
    let fh = handle_from_lookup_body(body);

    let write_args = to_bytes(&nfs3::file::WRITE3args {
        file: fh.clone(),
        offset: 0,
        count: 1,
        stable: nfs3::file::stable_how::UNSTABLE,
        data: b"x".to_vec(),
    });
    let reply = server.call(&context, NFS, 3, WRITE, &write_args).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(nfs_status_of(body), ERR_ROFS);

    let reply = server
        .call(&context, NFS, 3, CREATE, &create_unchecked(&root, "new.txt", 0o644))
        .await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(nfs_status_of(body), ERR_ROFS);

    let read_args = to_bytes(&nfs3::file::READ3args { file: fh, offset: 0, count: 16 });
    let reply = server.call(&context, NFS, 3, READ, &read_args).await;
    let (_, body) = accepted_body(&reply);
    let mut cursor = Cursor::new(body);
    assert_eq!(deserialize::<u32>(&mut cursor).unwrap(), OK);
    let resok = deserialize::<nfs3::file::READ3resok>(&mut cursor).unwrap();
    assert_eq!(resok.data, b"payload");
}

#[tokio::test]
async fn read_offset_overflow_is_invalid() {
    let backend = Arc::new(MemFs::new());
    backend.create("/f", 0o644).await.unwrap();
    let server = TestServer::with_backend(backend, ExportOptions::default());
    let context = server.context();
    let root = server.state.root_fh();

    let reply = server.call(&context, NFS, 3, LOOKUP, &diropargs(&root, "f")).await;
    let (_, body) = accepted_body(&reply);
    let fh = handle_from_lookup_body(body);

    let read_args =
        to_bytes(&nfs3::file::READ3args { file: fh, offset: u64::MAX, count: 8 });
    let reply = server.call(&context, NFS, 3, READ, &read_args).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(nfs_status_of(body), ERR_INVAL);
}

#[tokio::test]
async fn dotdot_escape_is_refused() {
    let server = TestServer::new(ExportOptions::default());
    let context = server.context();
    let root = server.state.root_fh();

    let reply = server.call(&context, NFS, 3, LOOKUP, &diropargs(&root, "..")).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(nfs_status_of(body), ERR_ACCES);

    // Separators inside a name component are traversal attempts.
    let reply = server.call(&context, NFS, 3, LOOKUP, &diropargs(&root, "a/b")).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(nfs_status_of(body), ERR_ACCES);
}

#[tokio::test]
async fn per_ip_rate_limit_trips_then_recovers() {
    let mut options = ExportOptions::default();
    options.rate_limit.enabled = true;
    options.rate_limit.global_requests_per_second = 100_000;
    options.rate_limit.per_ip_requests_per_second = 10;
    options.rate_limit.per_ip_burst_size = 10;
    options.rate_limit.per_connection_requests_per_second = 100_000;
    options.rate_limit.per_connection_burst_size = 100_000;
    let server = TestServer::new(options);
    let context = server.context();
    let root = server.state.root_fh();

    let mut ok = 0;
    let mut jukebox = 0;
    for _ in 0..30 {
        let reply = server.call(&context, NFS, 3, GETATTR, &to_bytes(&root)).await;
        let (_, body) = accepted_body(&reply);
        match nfs_status_of(body) {
            OK => ok += 1,
            ERR_JUKEBOX => jukebox += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(ok, 10);
    assert_eq!(jukebox, 20);

    // After a second the bucket has refilled.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let reply = server.call(&context, NFS, 3, GETATTR, &to_bytes(&root)).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(nfs_status_of(body), OK);

    // A different client IP was never throttled.
    let other = server.context_from("192.0.2.99:999");
    let reply = server.call(&other, NFS, 3, GETATTR, &to_bytes(&root)).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(nfs_status_of(body), OK);
}

#[tokio::test]
async fn handle_budget_limits_per_client_allocations() {
    let backend = Arc::new(MemFs::new());
    for name in ["a", "b", "c"] {
        backend.create(&format!("/{name}"), 0o644).await.unwrap();
    }
    let mut options = ExportOptions::default();
    options.rate_limit.enabled = true;
    options.rate_limit.per_ip_requests_per_second = 100_000;
    options.rate_limit.per_ip_burst_size = 100_000;
    options.rate_limit.per_connection_requests_per_second = 100_000;
    options.rate_limit.per_connection_burst_size = 100_000;
    options.rate_limit.global_requests_per_second = 100_000;
    options.rate_limit.file_handles_per_ip = 2;
    let server = TestServer::with_backend(backend, options);
    let context = server.context();
    let root = server.state.root_fh();

    let mut statuses = Vec::new();
    for name in ["a", "b", "c"] {
        let reply = server.call(&context, NFS, 3, LOOKUP, &diropargs(&root, name)).await;
        let (_, body) = accepted_body(&reply);
        statuses.push(nfs_status_of(body));
    }
    assert_eq!(statuses, vec![OK, OK, ERR_JUKEBOX]);

    // Removing one file frees budget for the next allocation.
    let reply = server.call(&context, NFS, 3, REMOVE, &diropargs(&root, "a")).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(nfs_status_of(body), OK);
    let reply = server.call(&context, NFS, 3, LOOKUP, &diropargs(&root, "c")).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(nfs_status_of(body), OK);
}

#[tokio::test]
async fn stale_readdir_cookie_is_refused_after_mutation() {
    let backend = Arc::new(MemFs::new());
    backend.create("/one", 0o644).await.unwrap();
    backend.create("/two", 0o644).await.unwrap();
    let server = TestServer::with_backend(backend, ExportOptions::default());
    let context = server.context();
    let root = server.state.root_fh();

    let readdir_args = to_bytes(&nfs3::dir::READDIR3args {
        dir: root.clone(),
        cookie: 0,
        cookieverf: [0u8; 8],
        dircount: 4096,
    });
    let reply = server.call(&context, NFS, 3, READDIR, &readdir_args).await;
    let (_, body) = accepted_body(&reply);
    let mut cursor = Cursor::new(body);
    assert_eq!(deserialize::<u32>(&mut cursor).unwrap(), OK);
    let _dir_attr = deserialize::<nfs3::post_op_attr>(&mut cursor).unwrap();
    let verifier = deserialize::<[u8; 8]>(&mut cursor).unwrap();

    // Mutate the directory: the verifier must change.
    server.call(&context, NFS, 3, CREATE, &create_unchecked(&root, "three", 0o644)).await;

    let resume_args = to_bytes(&nfs3::dir::READDIR3args {
        dir: root.clone(),
        cookie: 1,
        cookieverf: verifier,
        dircount: 4096,
    });
    let reply = server.call(&context, NFS, 3, READDIR, &resume_args).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(nfs_status_of(body), ERR_BAD_COOKIE);
}

#[tokio::test]
async fn readdir_reflects_directory_mutations() {
    let server = TestServer::new(ExportOptions::default());
    let context = server.context();
    let root = server.state.root_fh();

    server.call(&context, NFS, 3, CREATE, &create_unchecked(&root, "x", 0o644)).await;
    let names = list_names(&server, &context, &root).await;
    assert_eq!(names, vec!["x"]);

    server.call(&context, NFS, 3, CREATE, &create_unchecked(&root, "y", 0o644)).await;
    let names = list_names(&server, &context, &root).await;
    assert_eq!(names, vec!["x", "y"]);

    server.call(&context, NFS, 3, REMOVE, &diropargs(&root, "x")).await;
    let names = list_names(&server, &context, &root).await;
    assert_eq!(names, vec!["y"]);
}

async fn list_names(
    server: &TestServer,
    context: &nfs_bridge::protocol::rpc::Context,
    root: &nfs3::nfs_fh3,
) -> Vec<String> {
    let args = to_bytes(&nfs3::dir::READDIR3args {
        dir: root.clone(),
        cookie: 0,
        cookieverf: [0u8; 8],
        dircount: 65536,
    });
    let reply = server.call(context, NFS, 3, READDIR, &args).await;
    let (_, body) = accepted_body(&reply);
    let mut cursor = Cursor::new(body);
    assert_eq!(deserialize::<u32>(&mut cursor).unwrap(), OK);
    let _dir_attr = deserialize::<nfs3::post_op_attr>(&mut cursor).unwrap();
    let _verifier = deserialize::<[u8; 8]>(&mut cursor).unwrap();
    let mut names = Vec::new();
    while deserialize::<bool>(&mut cursor).unwrap() {
        let entry = deserialize::<nfs3::dir::entry3>(&mut cursor).unwrap();
        names.push(entry.name.as_utf8().into_owned());
    }
    names
}

#[tokio::test]
async fn symlink_target_is_stored_verbatim() {
    let server = TestServer::new(ExportOptions::default());
    let context = server.context();
    let root = server.state.root_fh();

    let args = to_bytes(&nfs3::dir::SYMLINK3args {
        dirops: nfs3::diropargs3 { dir: root.clone(), name: nfs3::filename3::from("ln") },
        symlink: nfs3::symlinkdata3 {
            symlink_attributes: nfs3::sattr3::default(),
            symlink_data: nfs3::nfspath3::from("../outside/target"),
        },
    });
    let reply = server.call(&context, NFS, 3, SYMLINK, &args).await;
    let (_, body) = accepted_body(&reply);
    let fh = handle_from_create_body(body);

    let reply = server.call(&context, NFS, 3, READLINK, &to_bytes(&fh)).await;
    let (_, body) = accepted_body(&reply);
    let mut cursor = Cursor::new(body);
    assert_eq!(deserialize::<u32>(&mut cursor).unwrap(), OK);
    let _attr = deserialize::<nfs3::post_op_attr>(&mut cursor).unwrap();
    let target = deserialize::<nfs3::nfspath3>(&mut cursor).unwrap();
    assert_eq!(target.as_utf8(), "../outside/target");
}

#[tokio::test]
async fn mkdir_rename_and_rmdir() {
    let server = TestServer::new(ExportOptions::default());
    let context = server.context();
    let root = server.state.root_fh();

    let mkdir_args = to_bytes(&nfs3::dir::MKDIR3args {
        dirops: nfs3::diropargs3 { dir: root.clone(), name: nfs3::filename3::from("dir") },
        attributes: nfs3::sattr3::default(),
    });
    let reply = server.call(&context, NFS, 3, MKDIR, &mkdir_args).await;
    let (_, body) = accepted_body(&reply);
    let dir_fh = handle_from_create_body(body);

    // Populate the directory, then make sure RMDIR refuses to drop it.
    server.call(&context, NFS, 3, CREATE, &create_unchecked(&dir_fh, "inner", 0o600)).await;
    let reply = server.call(&context, NFS, 3, RMDIR, &diropargs(&root, "dir")).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(nfs_status_of(body), ERR_NOTEMPTY);

    // Rename the directory; the old handle must keep resolving.
    let rename_args = to_bytes(&nfs3::RENAME3args {
        from: nfs3::diropargs3 { dir: root.clone(), name: nfs3::filename3::from("dir") },
        to: nfs3::diropargs3 { dir: root.clone(), name: nfs3::filename3::from("moved") },
    });
    let reply = server.call(&context, NFS, 3, RENAME, &rename_args).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(nfs_status_of(body), OK);

    let reply = server.call(&context, NFS, 3, GETATTR, &to_bytes(&dir_fh)).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(attr_from_getattr_body(body).ftype, nfs3::ftype3::NF3DIR);

    let reply = server.call(&context, NFS, 3, REMOVE, &diropargs(&dir_fh, "inner")).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(nfs_status_of(body), OK);
    let reply = server.call(&context, NFS, 3, RMDIR, &diropargs(&root, "moved")).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(nfs_status_of(body), OK);
}

#[tokio::test]
async fn setattr_truncates_and_reports_wcc() {
    let backend = Arc::new(MemFs::new());
    backend.create("/t", 0o644).await.unwrap();
    backend.write_file("/t", 0, b"0123456789").await.unwrap();
    let server = TestServer::with_backend(backend, ExportOptions::default());
    let context = server.context();
    let root = server.state.root_fh();

    let reply = server.call(&context, NFS, 3, LOOKUP, &diropargs(&root, "t")).await;
    let (_, body) = accepted_body(&reply);
    let fh = handle_from_lookup_body(body);

    let setattr_args = to_bytes(&nfs3::SETATTR3args {
        object: fh.clone(),
        new_attributes: nfs3::sattr3 {
            size: nfs3::set_size3::size(4),
            ..nfs3::sattr3::default()
        },
        guard: nfs3::sattrguard3::Void,
    });
    let reply = server.call(&context, NFS, 3, SETATTR, &setattr_args).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(nfs_status_of(body), OK);

    let reply = server.call(&context, NFS, 3, GETATTR, &to_bytes(&fh)).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(attr_from_getattr_body(body).size, 4);
}

#[tokio::test]
async fn access_respects_read_only_export() {
    let options = ExportOptions { read_only: true, ..ExportOptions::default() };
    let server = TestServer::new(options);
    let context = server.context();
    let root = server.state.root_fh();

    let access_args = to_bytes(&nfs3::ACCESS3args { object: root.clone(), access: 0x3f });
    let reply = server.call(&context, NFS, 3, ACCESS, &access_args).await;
    let (_, body) = accepted_body(&reply);
    let mut cursor = Cursor::new(body);
    assert_eq!(deserialize::<u32>(&mut cursor).unwrap(), OK);
    let _attr = deserialize::<nfs3::post_op_attr>(&mut cursor).unwrap();
    let granted = deserialize::<u32>(&mut cursor).unwrap();
    assert_eq!(granted & nfs3::ACCESS3_MODIFY, 0);
    assert_eq!(granted & nfs3::ACCESS3_EXTEND, 0);
    assert_ne!(granted & nfs3::ACCESS3_READ, 0);
}

#[tokio::test]
async fn fsinfo_advertises_transfer_size() {
    let options = ExportOptions { transfer_size: 512 * 1024, ..ExportOptions::default() };
    let server = TestServer::new(options);
    let context = server.context();
    let root = server.state.root_fh();

    let reply = server.call(&context, NFS, 3, FSINFO, &to_bytes(&root)).await;
    let (_, body) = accepted_body(&reply);
    let mut cursor = Cursor::new(body);
    assert_eq!(deserialize::<u32>(&mut cursor).unwrap(), OK);
    let resok = deserialize::<nfs3::fs::fsinfo3>(&mut cursor).unwrap();
    assert_eq!(resok.rtmax, 512 * 1024);
    assert_eq!(resok.wtmax, 512 * 1024);
}

#[tokio::test]
async fn commit_returns_the_write_verifier() {
    let backend = Arc::new(MemFs::new());
    backend.create("/f", 0o644).await.unwrap();
    let server = TestServer::with_backend(backend, ExportOptions::default());
    let context = server.context();
    let root = server.state.root_fh();

    let reply = server.call(&context, NFS, 3, LOOKUP, &diropargs(&root, "f")).await;
    let (_, body) = accepted_body(&reply);
    let fh = handle_from_lookup_body(body);

    let write_args = to_bytes(&nfs3::file::WRITE3args {
        file: fh.clone(),
        offset: 0,
        count: 3,
        stable: nfs3::file::stable_how::UNSTABLE,
        data: b"abc".to_vec(),
    });
    let reply = server.call(&context, NFS, 3, WRITE, &write_args).await;
    let (_, body) = accepted_body(&reply);
    let mut cursor = Cursor::new(body);
    assert_eq!(deserialize::<u32>(&mut cursor).unwrap(), OK);
    let write_res = deserialize::<nfs3::file::WRITE3resok>(&mut cursor).unwrap();
    assert_eq!(write_res.committed, nfs3::file::stable_how::UNSTABLE);

    let commit_args =
        to_bytes(&nfs3::file::COMMIT3args { file: fh.clone(), offset: 0, count: 3 });
    let reply = server.call(&context, NFS, 3, COMMIT, &commit_args).await;
    let (_, body) = accepted_body(&reply);
    let mut cursor = Cursor::new(body);
    assert_eq!(deserialize::<u32>(&mut cursor).unwrap(), OK);
    let commit_res = deserialize::<nfs3::file::COMMIT3resok>(&mut cursor).unwrap();
    assert_eq!(commit_res.verf, write_res.verf);
}

#[tokio::test]
async fn coalesced_getattrs_share_one_backend_stat() {
    let backend = Arc::new(MemFs::new());
    backend.create("/b.txt", 0o644).await.unwrap();
    let mut options = ExportOptions::default();
    options.batch_operations = true;
    options.max_batch_size = 8;
    let server = TestServer::with_backend(backend.clone(), options);
    let context = server.context();
    let root = server.state.root_fh();

    let reply = server.call(&context, NFS, 3, LOOKUP, &diropargs(&root, "b.txt")).await;
    let (_, body) = accepted_body(&reply);
    let fh = handle_from_lookup_body(body);
    let (id, path) = server.state.resolve_fh(&fh).unwrap();

    // Drop the entry LOOKUP put in the cache so both calls miss together.
    server.state.attr_cache.invalidate(&path);
    let before = backend.stats_served.load(Ordering::SeqCst);
    let (a, b) = tokio::join!(
        server.state.getattr(id, &path),
        server.state.getattr(id, &path)
    );
    assert_eq!(a.unwrap().fileid, b.unwrap().fileid);
    assert_eq!(
        backend.stats_served.load(Ordering::SeqCst) - before,
        1,
        "identical concurrent GETATTRs must coalesce into one backend stat"
    );
}

#[tokio::test]
async fn runtime_options_update_flips_read_only() {
    let backend = Arc::new(MemFs::new());
    backend.create("/w", 0o644).await.unwrap();
    let server = TestServer::with_backend(backend, ExportOptions::default());
    let context = server.context();
    let root = server.state.root_fh();

    let reply = server.call(&context, NFS, 3, LOOKUP, &diropargs(&root, "w")).await;
    let (_, body) = accepted_body(&reply);
    let fh = handle_from_lookup_body(body);

    let mut updated = ExportOptions::default();
    updated.read_only = true;
    server.state.update_options(updated).unwrap();

    let write_args = to_bytes(&nfs3::file::WRITE3args {
        file: fh,
        offset: 0,
        count: 2,
        stable: nfs3::file::stable_how::FILE_SYNC,
        data: b"no".to_vec(),
    });
    let reply = server.call(&context, NFS, 3, WRITE, &write_args).await;
    let (_, body) = accepted_body(&reply);
    assert_eq!(nfs_status_of(body), ERR_ROFS);

    // TLS cannot change through a runtime update.
    let mut with_tls = ExportOptions::default();
    with_tls.tls.enabled = true;
    assert!(matches!(
        server.state.update_options(with_tls),
        Err(nfs_bridge::Error::TlsReloadRequired)
    ));
}

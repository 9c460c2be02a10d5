//! CREATE procedure (procedure 8, RFC 1813 section 3.3.8).
//!
//! UNCHECKED creates succeed over an existing file; GUARDED refuses one;
//! EXCLUSIVE is made idempotent by remembering the client verifier per
//! path, so a retransmitted create of the same file succeeds instead of
//! answering EXIST.

use std::io::{Read, Write};

use tracing::{debug, error, warn};

use crate::protocol::nfs::decode_args;
use crate::protocol::rpc;
use crate::protocol::xdr::{self, nfs3, Serialize};
use crate::server::{nfs_status, to_fattr3};
use crate::vfs::FsError;

/// Mode used when the client supplies no mode bits.
const DEFAULT_FILE_MODE: u32 = 0o644;

pub async fn nfsproc3_create(
    xid: u32,
    input: &mut impl Read,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    let server = &context.server;
    if server.read_only() {
        warn!("nfsproc3_create({xid}) rejected: read-only export");
        xdr::rpc::make_success_reply(xid).serialize(output)?;
        nfs3::nfsstat3::NFS3ERR_ROFS.serialize(output)?;
        nfs3::wcc_data::default().serialize(output)?;
        return Ok(());
    }

    let Some(args) = decode_args::<nfs3::file::CREATE3args>(xid, "CREATE", input, output)? else {
        return Ok(());
    };
    debug!("nfsproc3_create({xid}, {args:?})");

    let (dir_id, dir_path) = match server.resolve_fh(&args.dirops.dir) {
        Ok(resolved) => resolved,
        Err(stat) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            stat.serialize(output)?;
            nfs3::wcc_data::default().serialize(output)?;
            return Ok(());
        }
    };
    let before = server.pre_op(&dir_path).await;

    let child_path = match server.join_child(&dir_path, &args.dirops.name) {
        Ok(path) => path,
        Err(stat) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            stat.serialize(output)?;
            nfs3::wcc_data { before, after: nfs3::post_op_attr::Void }.serialize(output)?;
            return Ok(());
        }
    };

    let created = match &args.how {
        nfs3::file::createhow3::UNCHECKED(attr) => {
            create_with_attrs(server, &child_path, attr, false).await
        }
        nfs3::file::createhow3::GUARDED(attr) => {
            create_with_attrs(server, &child_path, attr, true).await
        }
        nfs3::file::createhow3::EXCLUSIVE(verf) => {
            match server.backend.lstat(&child_path).await {
                Ok(_) if server.exclusive_seen(&child_path) == Some(*verf) => {
                    // Retransmitted exclusive create of the same file.
                    debug!("nfsproc3_create({xid}) idempotent exclusive retry");
                    Ok(())
                }
                Ok(_) => Err(FsError::Exists),
                Err(FsError::NotFound) => {
                    // EXCLUSIVE carries no attributes; the client SETATTRs
                    // the file afterwards.
                    let result = server.backend.create(&child_path, 0o600).await;
                    if result.is_ok() {
                        server.remember_exclusive(&child_path, *verf);
                    }
                    result.map(|_| ())
                }
                Err(err) => Err(err),
            }
        }
    };

    match created {
        Ok(()) => {
            server.note_dir_mutation(&dir_path);
            let child_id = server
                .handle_for_path(&child_path, context.client_ip())
                .unwrap_or(0);
            let obj = if child_id != 0 {
                nfs3::post_op_fh3::handle(server.handles.encode(child_id))
            } else {
                nfs3::post_op_fh3::Void
            };
            let obj_attr = match server.backend.lstat(&child_path).await {
                Ok(attr) => {
                    server.attr_cache.put(&child_path, attr.clone());
                    nfs3::post_op_attr::attributes(to_fattr3(&attr))
                }
                Err(_) => nfs3::post_op_attr::Void,
            };
            let after = server.post_op(dir_id, &dir_path).await;
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs3::nfsstat3::NFS3_OK.serialize(output)?;
            obj.serialize(output)?;
            obj_attr.serialize(output)?;
            nfs3::wcc_data { before, after }.serialize(output)?;
        }
        Err(err) => {
            error!("nfsproc3_create({xid}) {child_path}: {err}");
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs_status(&err).serialize(output)?;
            nfs3::wcc_data { before, after: nfs3::post_op_attr::Void }.serialize(output)?;
        }
    }
    Ok(())
}

/// Creates the file and applies the requested initial attributes.
async fn create_with_attrs(
    server: &crate::server::ServerState,
    path: &str,
    attr: &nfs3::sattr3,
    guarded: bool,
) -> Result<(), FsError> {
    if guarded && server.backend.lstat(path).await.is_ok() {
        return Err(FsError::Exists);
    }
    let mode = match attr.mode {
        nfs3::set_mode3::mode(m) => m,
        nfs3::set_mode3::Void => DEFAULT_FILE_MODE,
    };
    server.backend.create(path, mode).await?;
    let uid = match attr.uid {
        nfs3::set_uid3::uid(u) => Some(u),
        nfs3::set_uid3::Void => None,
    };
    let gid = match attr.gid {
        nfs3::set_gid3::gid(g) => Some(g),
        nfs3::set_gid3::Void => None,
    };
    if uid.is_some() || gid.is_some() {
        server.backend.chown(path, uid, gid).await?;
    }
    if let nfs3::set_size3::size(size) = attr.size {
        server.backend.truncate(path, size).await?;
    }
    Ok(())
}

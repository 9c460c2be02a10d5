//! REMOVE procedure (procedure 12, RFC 1813 section 3.3.12).
//!
//! Removes a non-directory. The parent's cached listing and verifier, the
//! object's caches and its live handles are all torn down before the reply.

use std::io::{Read, Write};

use tracing::{debug, error, warn};

use crate::protocol::nfs::decode_args;
use crate::protocol::rpc;
use crate::protocol::xdr::{self, nfs3, Serialize};
use crate::server::nfs_status;
use crate::vfs::FileKind;

pub async fn nfsproc3_remove(
    xid: u32,
    input: &mut impl Read,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    let server = &context.server;
    if server.read_only() {
        warn!("nfsproc3_remove({xid}) rejected: read-only export");
        xdr::rpc::make_success_reply(xid).serialize(output)?;
        nfs3::nfsstat3::NFS3ERR_ROFS.serialize(output)?;
        nfs3::wcc_data::default().serialize(output)?;
        return Ok(());
    }

    let Some(args) = decode_args::<nfs3::diropargs3>(xid, "REMOVE", input, output)? else {
        return Ok(());
    };
    debug!("nfsproc3_remove({xid}, {args:?})");

    let (dir_id, dir_path) = match server.resolve_fh(&args.dir) {
        Ok(resolved) => resolved,
        Err(stat) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            stat.serialize(output)?;
            nfs3::wcc_data::default().serialize(output)?;
            return Ok(());
        }
    };
    let before = server.pre_op(&dir_path).await;

    let child_path = match server.join_child(&dir_path, &args.name) {
        Ok(path) => path,
        Err(stat) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            stat.serialize(output)?;
            nfs3::wcc_data { before, after: nfs3::post_op_attr::Void }.serialize(output)?;
            return Ok(());
        }
    };

    let result = match server.backend.lstat(&child_path).await {
        Ok(attr) if attr.kind == FileKind::Directory => {
            Err(crate::vfs::FsError::IsDirectory)
        }
        Ok(_) => server.backend.remove(&child_path).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(()) => {
            server.note_dir_mutation(&dir_path);
            server.invalidate_subtree(&child_path);
            server.release_path(&child_path);
            server.forget_exclusive(&child_path);
            let after = server.post_op(dir_id, &dir_path).await;
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs3::nfsstat3::NFS3_OK.serialize(output)?;
            nfs3::wcc_data { before, after }.serialize(output)?;
        }
        Err(err) => {
            error!("nfsproc3_remove({xid}) {child_path}: {err}");
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs_status(&err).serialize(output)?;
            nfs3::wcc_data { before, after: nfs3::post_op_attr::Void }.serialize(output)?;
        }
    }
    Ok(())
}

//! SYMLINK procedure (procedure 10, RFC 1813 section 3.3.10). The target
//! string is handed to the backend verbatim.

use std::io::{Read, Write};

use tracing::{debug, error, warn};

use crate::protocol::nfs::decode_args;
use crate::protocol::rpc;
use crate::protocol::xdr::{self, nfs3, Serialize};
use crate::server::{nfs_status, to_fattr3};

pub async fn nfsproc3_symlink(
    xid: u32,
    input: &mut impl Read,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    let server = &context.server;
    if server.read_only() {
        warn!("nfsproc3_symlink({xid}) rejected: read-only export");
        xdr::rpc::make_success_reply(xid).serialize(output)?;
        nfs3::nfsstat3::NFS3ERR_ROFS.serialize(output)?;
        nfs3::wcc_data::default().serialize(output)?;
        return Ok(());
    }

    let Some(args) = decode_args::<nfs3::dir::SYMLINK3args>(xid, "SYMLINK", input, output)? else {
        return Ok(());
    };
    debug!("nfsproc3_symlink({xid}, {args:?})");

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

    let target = String::from_utf8_lossy(&args.symlink.symlink_data).into_owned();
    match server.backend.symlink(&target, &child_path).await {
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
            error!("nfsproc3_symlink({xid}) {child_path}: {err}");
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs_status(&err).serialize(output)?;
            nfs3::wcc_data { before, after: nfs3::post_op_attr::Void }.serialize(output)?;
        }
    }
    Ok(())
}

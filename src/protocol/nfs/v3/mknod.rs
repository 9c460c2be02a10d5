//! MKNOD procedure (procedure 11, RFC 1813 section 3.3.11). Backends that
//! do not support special nodes answer NOTSUPP through the default trait
//! implementation.

use std::io::{Read, Write};

use tracing::{debug, error, warn};

use crate::protocol::nfs::decode_args;
use crate::protocol::rpc;
use crate::protocol::xdr::{self, nfs3, Serialize};
use crate::server::{from_ftype3, nfs_status, to_fattr3};

pub async fn nfsproc3_mknod(
    xid: u32,
    input: &mut impl Read,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    let server = &context.server;
    if server.read_only() {
        warn!("nfsproc3_mknod({xid}) rejected: read-only export");
        xdr::rpc::make_success_reply(xid).serialize(output)?;
        nfs3::nfsstat3::NFS3ERR_ROFS.serialize(output)?;
        nfs3::wcc_data::default().serialize(output)?;
        return Ok(());
    }

    let Some(args) = decode_args::<nfs3::dir::MKNOD3args>(xid, "MKNOD", input, output)? else {
        return Ok(());
    };
    debug!("nfsproc3_mknod({xid}, {args:?})");

    let (dir_id, dir_path) = match server.resolve_fh(&args.where_dir.dir) {
        Ok(resolved) => resolved,
        Err(stat) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            stat.serialize(output)?;
            nfs3::wcc_data::default().serialize(output)?;
            return Ok(());
        }
    };
    let before = server.pre_op(&dir_path).await;

    let child_path = match server.join_child(&dir_path, &args.where_dir.name) {
        Ok(path) => path,
        Err(stat) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            stat.serialize(output)?;
            nfs3::wcc_data { before, after: nfs3::post_op_attr::Void }.serialize(output)?;
            return Ok(());
        }
    };

    let (kind, mode, rdev) = match &args.what {
        nfs3::dir::mknoddata3::Device(ftype, data) => {
            let mode = match data.dev_attributes.mode {
                nfs3::set_mode3::mode(m) => m,
                nfs3::set_mode3::Void => 0o600,
            };
            (from_ftype3(*ftype), mode, (data.spec.specdata1, data.spec.specdata2))
        }
        nfs3::dir::mknoddata3::Pipe(ftype, attr) => {
            let mode = match attr.mode {
                nfs3::set_mode3::mode(m) => m,
                nfs3::set_mode3::Void => 0o600,
            };
            (from_ftype3(*ftype), mode, (0, 0))
        }
    };

    match server.backend.mknod(&child_path, kind, mode, rdev).await {
        Ok(attr) => {
            server.note_dir_mutation(&dir_path);
            server.attr_cache.put(&child_path, attr.clone());
            let child_id = server
                .handle_for_path(&child_path, context.client_ip())
                .unwrap_or(0);
            let obj = if child_id != 0 {
                nfs3::post_op_fh3::handle(server.handles.encode(child_id))
            } else {
                nfs3::post_op_fh3::Void
            };
            let after = server.post_op(dir_id, &dir_path).await;
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs3::nfsstat3::NFS3_OK.serialize(output)?;
            obj.serialize(output)?;
            nfs3::post_op_attr::attributes(to_fattr3(&attr)).serialize(output)?;
            nfs3::wcc_data { before, after }.serialize(output)?;
        }
        Err(err) => {
            error!("nfsproc3_mknod({xid}) {child_path}: {err}");
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs_status(&err).serialize(output)?;
            nfs3::wcc_data { before, after: nfs3::post_op_attr::Void }.serialize(output)?;
        }
    }
    Ok(())
}

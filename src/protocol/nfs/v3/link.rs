//! LINK procedure (procedure 15, RFC 1813 section 3.3.15). Backends
//! without hard-link support answer NOTSUPP through the default trait
//! implementation.

use std::io::{Read, Write};

use tracing::{debug, error, warn};

use crate::protocol::nfs::decode_args;
use crate::protocol::rpc;
use crate::protocol::xdr::{self, nfs3, Serialize};
use crate::server::nfs_status;

pub async fn nfsproc3_link(
    xid: u32,
    input: &mut impl Read,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    let server = &context.server;
    if server.read_only() {
        warn!("nfsproc3_link({xid}) rejected: read-only export");
        xdr::rpc::make_success_reply(xid).serialize(output)?;
        nfs3::nfsstat3::NFS3ERR_ROFS.serialize(output)?;
        nfs3::post_op_attr::Void.serialize(output)?;
        nfs3::wcc_data::default().serialize(output)?;
        return Ok(());
    }

    let Some(args) = decode_args::<nfs3::file::LINK3args>(xid, "LINK", input, output)? else {
        return Ok(());
    };
    debug!("nfsproc3_link({xid}, {args:?})");

    let file = server.resolve_fh(&args.file);
    let dir = server.resolve_fh(&args.link.dir);
    let ((file_id, file_path), (dir_id, dir_path)) = match (file, dir) {
        (Ok(f), Ok(d)) => (f, d),
        (Err(stat), _) | (_, Err(stat)) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            stat.serialize(output)?;
            nfs3::post_op_attr::Void.serialize(output)?;
            nfs3::wcc_data::default().serialize(output)?;
            return Ok(());
        }
    };
    let before = server.pre_op(&dir_path).await;

    let link_path = match server.join_child(&dir_path, &args.link.name) {
        Ok(path) => path,
        Err(stat) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            stat.serialize(output)?;
            nfs3::post_op_attr::Void.serialize(output)?;
            nfs3::wcc_data { before, after: nfs3::post_op_attr::Void }.serialize(output)?;
            return Ok(());
        }
    };

    match server.backend.link(&file_path, &link_path).await {
        Ok(()) => {
            server.note_dir_mutation(&dir_path);
            // The link count of the source changed.
            server.attr_cache.invalidate(&file_path);
            let file_attr = server.post_op(file_id, &file_path).await;
            let after = server.post_op(dir_id, &dir_path).await;
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs3::nfsstat3::NFS3_OK.serialize(output)?;
            file_attr.serialize(output)?;
            nfs3::wcc_data { before, after }.serialize(output)?;
        }
        Err(err) => {
            error!("nfsproc3_link({xid}) {file_path} -> {link_path}: {err}");
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs_status(&err).serialize(output)?;
            nfs3::post_op_attr::Void.serialize(output)?;
            nfs3::wcc_data { before, after: nfs3::post_op_attr::Void }.serialize(output)?;
        }
    }
    Ok(())
}

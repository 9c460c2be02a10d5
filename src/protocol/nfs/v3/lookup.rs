//! LOOKUP procedure (procedure 3, RFC 1813 section 3.3.3).
//!
//! Resolves a name inside a directory to a stable file handle. The handle
//! id is charged against the client's handle budget the first time the
//! object is seen.

use std::io::{Read, Write};

use tracing::debug;

use crate::protocol::nfs::decode_args;
use crate::protocol::rpc;
use crate::protocol::xdr::{self, nfs3, Serialize};
use crate::server::{nfs_status, to_fattr3};

pub async fn nfsproc3_lookup(
    xid: u32,
    input: &mut impl Read,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    let Some(args) = decode_args::<nfs3::diropargs3>(xid, "LOOKUP", input, output)? else {
        return Ok(());
    };
    debug!("nfsproc3_lookup({xid}, {args:?})");
    let server = &context.server;

    let (dir_id, dir_path) = match server.resolve_fh(&args.dir) {
        Ok(resolved) => resolved,
        Err(stat) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            stat.serialize(output)?;
            nfs3::post_op_attr::Void.serialize(output)?;
            return Ok(());
        }
    };
    let dir_attr = server.post_op(dir_id, &dir_path).await;

    let child_path = match server.join_child(&dir_path, &args.name) {
        Ok(path) => path,
        Err(stat) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            stat.serialize(output)?;
            dir_attr.serialize(output)?;
            return Ok(());
        }
    };

    match server.backend.lstat(&child_path).await {
        Ok(attr) => {
            let child_id = match server.handle_for_path(&child_path, context.client_ip()) {
                Ok(id) => id,
                Err(stat) => {
                    xdr::rpc::make_success_reply(xid).serialize(output)?;
                    stat.serialize(output)?;
                    dir_attr.serialize(output)?;
                    return Ok(());
                }
            };
            server.attr_cache.put(&child_path, attr.clone());
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs3::nfsstat3::NFS3_OK.serialize(output)?;
            server.handles.encode(child_id).serialize(output)?;
            nfs3::post_op_attr::attributes(to_fattr3(&attr)).serialize(output)?;
            dir_attr.serialize(output)?;
        }
        Err(err) => {
            debug!("nfsproc3_lookup({xid}) {child_path}: {err}");
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs_status(&err).serialize(output)?;
            dir_attr.serialize(output)?;
        }
    }
    Ok(())
}

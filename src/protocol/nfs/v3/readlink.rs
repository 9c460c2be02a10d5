//! READLINK procedure (procedure 5, RFC 1813 section 3.3.5). The stored
//! target string is returned verbatim; the server never resolves it.

use std::io::{Read, Write};

use tracing::debug;

use crate::protocol::nfs::decode_args;
use crate::protocol::rpc;
use crate::protocol::xdr::{self, nfs3, Serialize};
use crate::server::nfs_status;

pub async fn nfsproc3_readlink(
    xid: u32,
    input: &mut impl Read,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    let Some(fh) = decode_args::<nfs3::nfs_fh3>(xid, "READLINK", input, output)? else {
        return Ok(());
    };
    debug!("nfsproc3_readlink({xid}, {fh:?})");
    let server = &context.server;

    let (id, path) = match server.resolve_fh(&fh) {
        Ok(resolved) => resolved,
        Err(stat) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            stat.serialize(output)?;
            nfs3::post_op_attr::Void.serialize(output)?;
            return Ok(());
        }
    };
    let obj_attr = server.post_op(id, &path).await;

    match server.backend.readlink(&path).await {
        Ok(target) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs3::nfsstat3::NFS3_OK.serialize(output)?;
            obj_attr.serialize(output)?;
            nfs3::nfspath3::from(target.as_str()).serialize(output)?;
        }
        Err(err) => {
            debug!("nfsproc3_readlink({xid}) {path}: {err}");
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs_status(&err).serialize(output)?;
            obj_attr.serialize(output)?;
        }
    }
    Ok(())
}

//! GETATTR procedure (procedure 1, RFC 1813 section 3.3.1).
//!
//! Served from the attribute cache when a live entry exists; misses go
//! through the batch coalescer so identical concurrent GETATTRs cost one
//! backend stat.

use std::io::{Read, Write};

use tracing::debug;

use crate::protocol::nfs::decode_args;
use crate::protocol::rpc;
use crate::protocol::xdr::{self, nfs3, Serialize};
use crate::server::{nfs_status, to_fattr3};

pub async fn nfsproc3_getattr(
    xid: u32,
    input: &mut impl Read,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    let Some(fh) = decode_args::<nfs3::nfs_fh3>(xid, "GETATTR", input, output)? else {
        return Ok(());
    };
    debug!("nfsproc3_getattr({xid}, {fh:?})");

    let (id, path) = match context.server.resolve_fh(&fh) {
        Ok(resolved) => resolved,
        Err(stat) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            stat.serialize(output)?;
            return Ok(());
        }
    };

    match context.server.getattr(id, &path).await {
        Ok(attr) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs3::nfsstat3::NFS3_OK.serialize(output)?;
            to_fattr3(&attr).serialize(output)?;
        }
        Err(err) => {
            debug!("nfsproc3_getattr({xid}) error on {path}: {err}");
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs_status(&err).serialize(output)?;
        }
    }
    Ok(())
}

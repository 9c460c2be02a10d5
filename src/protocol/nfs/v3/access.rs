//! ACCESS procedure (procedure 4, RFC 1813 section 3.3.4).
//!
//! Evaluates the requested access bits against the object's mode and the
//! caller's (already squashed) credentials. On a read-only export the
//! write-class bits are never granted.

use std::io::{Read, Write};

use tracing::debug;

use crate::protocol::nfs::decode_args;
use crate::protocol::rpc;
use crate::protocol::xdr::{self, nfs3, Serialize};
use crate::server::{nfs_status, to_fattr3};

pub async fn nfsproc3_access(
    xid: u32,
    input: &mut impl Read,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    let Some(args) = decode_args::<nfs3::ACCESS3args>(xid, "ACCESS", input, output)? else {
        return Ok(());
    };
    debug!("nfsproc3_access({xid}, {args:?})");
    let server = &context.server;

    let (id, path) = match server.resolve_fh(&args.object) {
        Ok(resolved) => resolved,
        Err(stat) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            stat.serialize(output)?;
            nfs3::post_op_attr::Void.serialize(output)?;
            return Ok(());
        }
    };

    match server.getattr(id, &path).await {
        Ok(attr) => {
            let granted = server.access_for(&attr, args.access, &context.auth);
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs3::nfsstat3::NFS3_OK.serialize(output)?;
            nfs3::post_op_attr::attributes(to_fattr3(&attr)).serialize(output)?;
            granted.serialize(output)?;
        }
        Err(err) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs_status(&err).serialize(output)?;
            nfs3::post_op_attr::Void.serialize(output)?;
        }
    }
    Ok(())
}

//! FSSTAT procedure (procedure 18, RFC 1813 section 3.3.18). Capacity
//! figures come from the backend; virtual backends report the synthetic
//! defaults.

use std::io::{Read, Write};

use tracing::{debug, error};

use crate::protocol::nfs::decode_args;
use crate::protocol::rpc;
use crate::protocol::xdr::{self, nfs3, Serialize};
use crate::server::nfs_status;

pub async fn nfsproc3_fsstat(
    xid: u32,
    input: &mut impl Read,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    let Some(fh) = decode_args::<nfs3::nfs_fh3>(xid, "FSSTAT", input, output)? else {
        return Ok(());
    };
    debug!("nfsproc3_fsstat({xid}, {fh:?})");
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

    match server.backend.fs_stat().await {
        Ok(stats) => {
            let res = nfs3::fs::FSSTAT3resok {
                obj_attributes: obj_attr,
                tbytes: stats.total_bytes,
                fbytes: stats.free_bytes,
                abytes: stats.available_bytes,
                tfiles: stats.total_files,
                ffiles: stats.free_files,
                afiles: stats.available_files,
                invarsec: 0,
            };
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs3::nfsstat3::NFS3_OK.serialize(output)?;
            res.serialize(output)?;
        }
        Err(err) => {
            error!("nfsproc3_fsstat({xid}): {err}");
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs_status(&err).serialize(output)?;
            obj_attr.serialize(output)?;
        }
    }
    Ok(())
}

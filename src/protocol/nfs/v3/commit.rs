//! COMMIT procedure (procedure 21, RFC 1813 section 3.3.21).
//!
//! Flushes all prior UNSTABLE writes of the file to stable storage before
//! replying, and returns the same verifier as WRITE so clients can detect
//! a restart in between.

use std::io::{Read, Write};

use tracing::{debug, error};

use crate::protocol::nfs::decode_args;
use crate::protocol::rpc;
use crate::protocol::xdr::{self, nfs3, Serialize};
use crate::server::nfs_status;

pub async fn nfsproc3_commit(
    xid: u32,
    input: &mut impl Read,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    let Some(args) = decode_args::<nfs3::file::COMMIT3args>(xid, "COMMIT", input, output)? else {
        return Ok(());
    };
    debug!("nfsproc3_commit({xid}, {args:?})");
    let server = &context.server;

    let (id, path) = match server.resolve_fh(&args.file) {
        Ok(resolved) => resolved,
        Err(stat) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            stat.serialize(output)?;
            nfs3::wcc_data::default().serialize(output)?;
            return Ok(());
        }
    };
    let before = server.pre_op(&path).await;

    match server.backend.flush(&path).await {
        Ok(()) => {
            let after = server.post_op(id, &path).await;
            let res = nfs3::file::COMMIT3resok {
                file_wcc: nfs3::wcc_data { before, after },
                verf: server.write_verf,
            };
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs3::nfsstat3::NFS3_OK.serialize(output)?;
            res.serialize(output)?;
        }
        Err(err) => {
            error!("nfsproc3_commit({xid}) {path}: {err}");
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs_status(&err).serialize(output)?;
            nfs3::wcc_data { before, after: nfs3::post_op_attr::Void }.serialize(output)?;
        }
    }
    Ok(())
}

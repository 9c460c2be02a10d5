//! FSINFO procedure (procedure 19, RFC 1813 section 3.3.19). Advertises
//! the negotiated transfer sizes and capability flags.

use std::io::{Read, Write};

use tracing::debug;

use crate::protocol::nfs::decode_args;
use crate::protocol::rpc;
use crate::protocol::xdr::{self, nfs3, Serialize};

pub async fn nfsproc3_fsinfo(
    xid: u32,
    input: &mut impl Read,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    let Some(fh) = decode_args::<nfs3::nfs_fh3>(xid, "FSINFO", input, output)? else {
        return Ok(());
    };
    debug!("nfsproc3_fsinfo({xid}, {fh:?})");
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

    let transfer = server.transfer_size();
    let res = nfs3::fs::fsinfo3 {
        obj_attributes: obj_attr,
        rtmax: transfer,
        rtpref: transfer,
        rtmult: 4096,
        wtmax: transfer,
        wtpref: transfer,
        wtmult: 4096,
        dtpref: 64 * 1024,
        maxfilesize: u64::MAX / 2,
        time_delta: nfs3::nfstime3 { seconds: 0, nseconds: 1_000_000 },
        properties: nfs3::fs::FSF_SYMLINK | nfs3::fs::FSF_HOMOGENEOUS | nfs3::fs::FSF_CANSETTIME,
    };
    xdr::rpc::make_success_reply(xid).serialize(output)?;
    nfs3::nfsstat3::NFS3_OK.serialize(output)?;
    res.serialize(output)?;
    Ok(())
}

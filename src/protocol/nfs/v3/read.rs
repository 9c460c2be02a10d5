//! READ procedure (procedure 6, RFC 1813 section 3.3.6).
//!
//! Offset arithmetic is validated before the backend sees the request;
//! counts are capped at the negotiated rtmax. Sequential reads are served
//! from the read-ahead buffer when it covers the window, and each
//! backend-served read feeds the prefetcher.

use std::io::{Read, Write};

use tracing::{debug, error};

use crate::protocol::nfs::decode_args;
use crate::protocol::rpc;
use crate::protocol::xdr::{self, nfs3, Serialize};
use crate::ratelimit::{OpClass, LARGE_IO_BYTES};
use crate::server::nfs_status;

pub async fn nfsproc3_read(
    xid: u32,
    input: &mut impl Read,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    let Some(args) = decode_args::<nfs3::file::READ3args>(xid, "READ", input, output)? else {
        return Ok(());
    };
    debug!("nfsproc3_read({xid}, fh={:?}, offset={}, count={})", args.file, args.offset, args.count);
    let server = &context.server;

    let (id, path) = match server.resolve_fh(&args.file) {
        Ok(resolved) => resolved,
        Err(stat) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            stat.serialize(output)?;
            nfs3::post_op_attr::Void.serialize(output)?;
            return Ok(());
        }
    };

    // Reject before any backend call: the offset/count pair must not wrap.
    if args.offset.checked_add(u64::from(args.count)).is_none() {
        xdr::rpc::make_success_reply(xid).serialize(output)?;
        nfs3::nfsstat3::NFS3ERR_INVAL.serialize(output)?;
        nfs3::post_op_attr::Void.serialize(output)?;
        return Ok(());
    }
    let count = args.count.min(server.transfer_size());

    if count > LARGE_IO_BYTES && !server.limiter.allow_op(context.client_ip(), OpClass::LargeRead)
    {
        xdr::rpc::make_success_reply(xid).serialize(output)?;
        nfs3::nfsstat3::NFS3ERR_JUKEBOX.serialize(output)?;
        nfs3::post_op_attr::Void.serialize(output)?;
        return Ok(());
    }

    let buffered = server.readahead.try_read(id, args.offset, count).await;
    let result = match buffered {
        Some(hit) => Ok(hit),
        None => match server.backend.read_file(&path, args.offset, count).await {
            Ok((data, eof)) => {
                server
                    .readahead
                    .observe_read(id, &path, args.offset, data.len(), eof, server.backend.clone())
                    .await;
                Ok((data, eof))
            }
            Err(err) => Err(err),
        },
    };

    let obj_attr = server.post_op(id, &path).await;
    match result {
        Ok((data, eof)) => {
            let res = nfs3::file::READ3resok {
                file_attributes: obj_attr,
                count: data.len() as u32,
                eof,
                data,
            };
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs3::nfsstat3::NFS3_OK.serialize(output)?;
            res.serialize(output)?;
        }
        Err(err) => {
            error!("nfsproc3_read({xid}) {path}: {err}");
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs_status(&err).serialize(output)?;
            obj_attr.serialize(output)?;
        }
    }
    Ok(())
}

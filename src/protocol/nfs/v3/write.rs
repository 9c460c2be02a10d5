//! WRITE procedure (procedure 7, RFC 1813 section 3.3.7).
//!
//! DATA_SYNC and FILE_SYNC flush the backend before the reply; UNSTABLE
//! replies immediately and leaves durability to a later COMMIT. Cached
//! attributes and the read-ahead buffer of the file are invalidated before
//! the reply is emitted, so a following GETATTR or READ observes the write.

use std::io::{Read, Write};

use tracing::{debug, error, warn};

use crate::protocol::nfs::decode_args;
use crate::protocol::rpc;
use crate::protocol::xdr::{self, nfs3, Serialize};
use crate::ratelimit::{OpClass, LARGE_IO_BYTES};
use crate::server::nfs_status;

pub async fn nfsproc3_write(
    xid: u32,
    input: &mut impl Read,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    let server = &context.server;
    if server.read_only() {
        warn!("nfsproc3_write({xid}) rejected: read-only export");
        xdr::rpc::make_success_reply(xid).serialize(output)?;
        nfs3::nfsstat3::NFS3ERR_ROFS.serialize(output)?;
        nfs3::wcc_data::default().serialize(output)?;
        return Ok(());
    }

    let Some(args) = decode_args::<nfs3::file::WRITE3args>(xid, "WRITE", input, output)? else {
        return Ok(());
    };
    debug!("nfsproc3_write({xid}, offset={}, count={}, {:?})", args.offset, args.count, args.stable);
    if args.data.len() != args.count as usize {
        xdr::rpc::garbage_args_reply_message(xid).serialize(output)?;
        return Ok(());
    }

    let (id, path) = match server.resolve_fh(&args.file) {
        Ok(resolved) => resolved,
        Err(stat) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            stat.serialize(output)?;
            nfs3::wcc_data::default().serialize(output)?;
            return Ok(());
        }
    };

    if args.offset.checked_add(args.data.len() as u64).is_none() {
        xdr::rpc::make_success_reply(xid).serialize(output)?;
        nfs3::nfsstat3::NFS3ERR_INVAL.serialize(output)?;
        nfs3::wcc_data::default().serialize(output)?;
        return Ok(());
    }

    if args.count > LARGE_IO_BYTES
        && !server.limiter.allow_op(context.client_ip(), OpClass::LargeWrite)
    {
        xdr::rpc::make_success_reply(xid).serialize(output)?;
        nfs3::nfsstat3::NFS3ERR_JUKEBOX.serialize(output)?;
        nfs3::wcc_data::default().serialize(output)?;
        return Ok(());
    }

    let before = server.pre_op(&path).await;

    let written = match server.backend.write_file(&path, args.offset, &args.data).await {
        Ok(written) => written,
        Err(err) => {
            error!("nfsproc3_write({xid}) {path}: {err}");
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs_status(&err).serialize(output)?;
            nfs3::wcc_data { before, after: nfs3::post_op_attr::Void }.serialize(output)?;
            return Ok(());
        }
    };

    if matches!(
        args.stable,
        nfs3::file::stable_how::DATA_SYNC | nfs3::file::stable_how::FILE_SYNC
    ) {
        if let Err(err) = server.backend.flush(&path).await {
            error!("nfsproc3_write({xid}) flush of {path} failed: {err}");
            server.invalidate_file(id, &path);
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs_status(&err).serialize(output)?;
            nfs3::wcc_data { before, after: nfs3::post_op_attr::Void }.serialize(output)?;
            return Ok(());
        }
    }

    // Invalidate before replying so the next GETATTR sees the new size.
    server.invalidate_file(id, &path);
    let after = server.post_op(id, &path).await;

    let res = nfs3::file::WRITE3resok {
        file_wcc: nfs3::wcc_data { before, after },
        count: written,
        committed: args.stable,
        verf: server.write_verf,
    };
    xdr::rpc::make_success_reply(xid).serialize(output)?;
    nfs3::nfsstat3::NFS3_OK.serialize(output)?;
    res.serialize(output)?;
    Ok(())
}

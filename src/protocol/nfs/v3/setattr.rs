//! SETATTR procedure (procedure 2, RFC 1813 section 3.3.2).
//!
//! The optional ctime guard makes the change conditional; a mismatch
//! answers NOT_SYNC. Changes without a time component may be coalesced
//! with identical concurrent SETATTRs.

use std::io::{Read, Write};

use tracing::{debug, error, warn};

use crate::protocol::nfs::decode_args;
use crate::protocol::rpc;
use crate::protocol::xdr::{self, nfs3, Serialize};
use crate::server::{nfs_status, to_nfstime};
use crate::vfs::Timestamp;

pub async fn nfsproc3_setattr(
    xid: u32,
    input: &mut impl Read,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    let server = &context.server;
    if server.read_only() {
        warn!("nfsproc3_setattr({xid}) rejected: read-only export");
        xdr::rpc::make_success_reply(xid).serialize(output)?;
        nfs3::nfsstat3::NFS3ERR_ROFS.serialize(output)?;
        nfs3::wcc_data::default().serialize(output)?;
        return Ok(());
    }

    let Some(args) = decode_args::<nfs3::SETATTR3args>(xid, "SETATTR", input, output)? else {
        return Ok(());
    };
    debug!("nfsproc3_setattr({xid}, {args:?})");

    let (id, path) = match server.resolve_fh(&args.object) {
        Ok(resolved) => resolved,
        Err(stat) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            stat.serialize(output)?;
            nfs3::wcc_data::default().serialize(output)?;
            return Ok(());
        }
    };
    let before = server.pre_op(&path).await;

    if let nfs3::sattrguard3::obj_ctime(expected) = args.guard {
        match server.backend.lstat(&path).await {
            Ok(attr) if to_nfstime(&attr.ctime) != expected => {
                debug!("nfsproc3_setattr({xid}) guard mismatch on {path}");
                xdr::rpc::make_success_reply(xid).serialize(output)?;
                nfs3::nfsstat3::NFS3ERR_NOT_SYNC.serialize(output)?;
                nfs3::wcc_data { before, after: nfs3::post_op_attr::Void }.serialize(output)?;
                return Ok(());
            }
            Ok(_) => {}
            Err(err) => {
                xdr::rpc::make_success_reply(xid).serialize(output)?;
                nfs_status(&err).serialize(output)?;
                nfs3::wcc_data { before, after: nfs3::post_op_attr::Void }.serialize(output)?;
                return Ok(());
            }
        }
    }

    let sattr = &args.new_attributes;
    let mode = match sattr.mode {
        nfs3::set_mode3::mode(m) => Some(m),
        nfs3::set_mode3::Void => None,
    };
    let uid = match sattr.uid {
        nfs3::set_uid3::uid(u) => Some(u),
        nfs3::set_uid3::Void => None,
    };
    let gid = match sattr.gid {
        nfs3::set_gid3::gid(g) => Some(g),
        nfs3::set_gid3::Void => None,
    };
    let size = match sattr.size {
        nfs3::set_size3::size(s) => Some(s),
        nfs3::set_size3::Void => None,
    };
    let atime = match sattr.atime {
        nfs3::set_atime::DONT_CHANGE => None,
        nfs3::set_atime::SET_TO_SERVER_TIME => Some(Timestamp::now()),
        nfs3::set_atime::SET_TO_CLIENT_TIME(t) => {
            Some(Timestamp { seconds: u64::from(t.seconds), nanos: t.nseconds })
        }
    };
    let mtime = match sattr.mtime {
        nfs3::set_mtime::DONT_CHANGE => None,
        nfs3::set_mtime::SET_TO_SERVER_TIME => Some(Timestamp::now()),
        nfs3::set_mtime::SET_TO_CLIENT_TIME(t) => {
            Some(Timestamp { seconds: u64::from(t.seconds), nanos: t.nseconds })
        }
    };

    let result = if atime.is_none() && mtime.is_none() {
        server.apply_setattr_batched(id, &path, mode, uid, gid, size).await
    } else {
        match crate::server::apply_setattr(server.backend.as_ref(), &path, mode, uid, gid, size)
            .await
        {
            Ok(()) => server.backend.chtimes(&path, atime, mtime).await,
            Err(err) => Err(err),
        }
    };

    match result {
        Ok(()) => {
            server.attr_cache.invalidate(&path);
            if size.is_some() {
                // A size change invalidates any prefetched window.
                server.readahead.invalidate(id);
            }
            let after = server.post_op(id, &path).await;
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs3::nfsstat3::NFS3_OK.serialize(output)?;
            nfs3::wcc_data { before, after }.serialize(output)?;
        }
        Err(err) => {
            error!("nfsproc3_setattr({xid}) {path}: {err}");
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs_status(&err).serialize(output)?;
            nfs3::wcc_data { before, after: nfs3::post_op_attr::Void }.serialize(output)?;
        }
    }
    Ok(())
}

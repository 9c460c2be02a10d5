//! RENAME procedure (procedure 14, RFC 1813 section 3.3.14).
//!
//! Both parents' cached listings and verifiers are invalidated, cached
//! attributes of source and destination are dropped, and live handles are
//! re-keyed so they keep resolving to the moved object.

use std::io::{Read, Write};

use tracing::{debug, error, warn};

use crate::protocol::nfs::decode_args;
use crate::protocol::rpc;
use crate::protocol::xdr::{self, nfs3, Serialize};
use crate::server::nfs_status;

pub async fn nfsproc3_rename(
    xid: u32,
    input: &mut impl Read,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    let server = &context.server;
    if server.read_only() {
        warn!("nfsproc3_rename({xid}) rejected: read-only export");
        xdr::rpc::make_success_reply(xid).serialize(output)?;
        nfs3::nfsstat3::NFS3ERR_ROFS.serialize(output)?;
        nfs3::wcc_data::default().serialize(output)?;
        nfs3::wcc_data::default().serialize(output)?;
        return Ok(());
    }

    let Some(args) = decode_args::<nfs3::RENAME3args>(xid, "RENAME", input, output)? else {
        return Ok(());
    };
    debug!("nfsproc3_rename({xid}, {args:?})");

    let from = server.resolve_fh(&args.from.dir);
    let to = server.resolve_fh(&args.to.dir);
    let ((from_id, from_dir), (to_id, to_dir)) = match (from, to) {
        (Ok(f), Ok(t)) => (f, t),
        (Err(stat), _) | (_, Err(stat)) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            stat.serialize(output)?;
            nfs3::wcc_data::default().serialize(output)?;
            nfs3::wcc_data::default().serialize(output)?;
            return Ok(());
        }
    };
    let from_before = server.pre_op(&from_dir).await;
    let to_before = server.pre_op(&to_dir).await;

    let joined = server
        .join_child(&from_dir, &args.from.name)
        .and_then(|f| server.join_child(&to_dir, &args.to.name).map(|t| (f, t)));
    let (from_path, to_path) = match joined {
        Ok(paths) => paths,
        Err(stat) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            stat.serialize(output)?;
            nfs3::wcc_data { before: from_before, after: nfs3::post_op_attr::Void }
                .serialize(output)?;
            nfs3::wcc_data { before: to_before, after: nfs3::post_op_attr::Void }
                .serialize(output)?;
            return Ok(());
        }
    };

    match server.backend.rename(&from_path, &to_path).await {
        Ok(()) => {
            // Drop the read-ahead buffer before the handle is re-keyed; an
            // in-flight fill may still reference the old path.
            if let Some(id) = server.handles.lookup_path(&from_path) {
                server.readahead.invalidate(id);
            }
            server.handles.rename_path(&from_path, &to_path);
            server.note_dir_mutation(&from_dir);
            server.note_dir_mutation(&to_dir);
            server.invalidate_subtree(&from_path);
            server.invalidate_subtree(&to_path);
            server.verifiers.forget(&from_path);
            server.forget_exclusive(&from_path);
            let from_after = server.post_op(from_id, &from_dir).await;
            let to_after = server.post_op(to_id, &to_dir).await;
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs3::nfsstat3::NFS3_OK.serialize(output)?;
            nfs3::wcc_data { before: from_before, after: from_after }.serialize(output)?;
            nfs3::wcc_data { before: to_before, after: to_after }.serialize(output)?;
        }
        Err(err) => {
            error!("nfsproc3_rename({xid}) {from_path} -> {to_path}: {err}");
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs_status(&err).serialize(output)?;
            nfs3::wcc_data { before: from_before, after: nfs3::post_op_attr::Void }
                .serialize(output)?;
            nfs3::wcc_data { before: to_before, after: nfs3::post_op_attr::Void }
                .serialize(output)?;
        }
    }
    Ok(())
}

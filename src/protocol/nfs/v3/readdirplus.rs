//! READDIRPLUS procedure (procedure 17, RFC 1813 section 3.3.17).
//!
//! Like READDIR, but each entry also carries attributes and a file handle.
//! Attributes come from the attribute cache, with misses filled from the
//! backend; handles are charged to the caller's budget and omitted once
//! the budget runs out, which clients handle by falling back to LOOKUP.

use std::io::{Read, Write};

use tracing::{debug, error, trace};

use crate::protocol::nfs::decode_args;
use crate::protocol::rpc;
use crate::protocol::xdr::{self, nfs3, Serialize};
use crate::ratelimit::OpClass;
use crate::server::{nfs_status, to_fattr3};
use crate::write_counter::WriteCounter;

const REPLY_TAIL_RESERVE: usize = 128;

pub async fn nfsproc3_readdirplus(
    xid: u32,
    input: &mut impl Read,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    let Some(args) =
        decode_args::<nfs3::dir::READDIRPLUS3args>(xid, "READDIRPLUS", input, output)?
    else {
        return Ok(());
    };
    debug!("nfsproc3_readdirplus({xid}, {args:?})");
    let server = &context.server;

    if !server.limiter.allow_op(context.client_ip(), OpClass::ReadDir) {
        xdr::rpc::make_success_reply(xid).serialize(output)?;
        nfs3::nfsstat3::NFS3ERR_JUKEBOX.serialize(output)?;
        nfs3::post_op_attr::Void.serialize(output)?;
        return Ok(());
    }

    let (dir_id, dir_path) = match server.resolve_fh(&args.dir) {
        Ok(resolved) => resolved,
        Err(stat) => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            stat.serialize(output)?;
            nfs3::post_op_attr::Void.serialize(output)?;
            return Ok(());
        }
    };
    let dir_attr = server.post_op(dir_id, &dir_path).await;

    let snapshot = match server.load_dir(dir_id, &dir_path).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            error!("nfsproc3_readdirplus({xid}) {dir_path}: {err}");
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs_status(&err).serialize(output)?;
            dir_attr.serialize(output)?;
            return Ok(());
        }
    };
    let verifier = snapshot.verifier.to_be_bytes();

    if args.cookie != 0 && args.cookieverf != verifier {
        debug!("nfsproc3_readdirplus({xid}) stale cookie verifier for {dir_path}");
        xdr::rpc::make_success_reply(xid).serialize(output)?;
        nfs3::nfsstat3::NFS3ERR_BAD_COOKIE.serialize(output)?;
        dir_attr.serialize(output)?;
        return Ok(());
    }

    let start = args.cookie as usize;
    let max_bytes = (args.maxcount as usize).saturating_sub(REPLY_TAIL_RESERVE).max(512);
    // dircount budgets only fileid/name/cookie, approximated per entry.
    let max_dircount = args.dircount as usize;

    let mut counting_output = WriteCounter::new(output);
    xdr::rpc::make_success_reply(xid).serialize(&mut counting_output)?;
    nfs3::nfsstat3::NFS3_OK.serialize(&mut counting_output)?;
    dir_attr.serialize(&mut counting_output)?;
    verifier.serialize(&mut counting_output)?;

    let mut all_written = true;
    let mut emitted = 0usize;
    let mut accumulated_dircount = 0usize;
    for (index, entry) in snapshot.entries.iter().enumerate().skip(start) {
        let child_path = match server.join_child(&dir_path, &entry.name.as_str().into()) {
            Ok(path) => path,
            Err(_) => continue,
        };
        let attr = match server.attr_cache.get(&child_path) {
            Some(attr) => Some(attr),
            None => match server.backend.lstat(&child_path).await {
                Ok(attr) => {
                    server.attr_cache.put(&child_path, attr.clone());
                    Some(attr)
                }
                Err(_) => None,
            },
        };
        let name_attributes = match &attr {
            Some(attr) => nfs3::post_op_attr::attributes(to_fattr3(attr)),
            None => nfs3::post_op_attr::Void,
        };
        // Handle budget exhaustion degrades the entry, not the call.
        let name_handle = match server.handle_for_path(&child_path, context.client_ip()) {
            Ok(child_id) => nfs3::post_op_fh3::handle(server.handles.encode(child_id)),
            Err(_) => nfs3::post_op_fh3::Void,
        };
        let wire_entry = nfs3::dir::entryplus3 {
            fileid: entry.fileid,
            name: entry.name.as_str().as_bytes().into(),
            cookie: (index + 1) as nfs3::cookie3,
            name_attributes,
            name_handle,
        };
        let mut buf: Vec<u8> = Vec::new();
        true.serialize(&mut buf)?;
        wire_entry.serialize(&mut buf)?;
        let entry_dircount = 8 + 4 + entry.name.len() + 8;
        if counting_output.bytes_written() + buf.len() >= max_bytes
            || accumulated_dircount + entry_dircount >= max_dircount
        {
            trace!("nfsproc3_readdirplus({xid}) reply budget reached, truncating");
            all_written = false;
            break;
        }
        counting_output.write_all(&buf)?;
        accumulated_dircount += entry_dircount;
        emitted += 1;
    }
    false.serialize(&mut counting_output)?;
    let eof = all_written && start + emitted >= snapshot.entries.len();
    eof.serialize(&mut counting_output)?;
    debug!(
        "nfsproc3_readdirplus({xid}) {dir_path}: {emitted} entries from cookie {}, eof {eof}",
        args.cookie
    );
    Ok(())
}

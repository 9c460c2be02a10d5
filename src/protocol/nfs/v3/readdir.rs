//! READDIR procedure (procedure 16, RFC 1813 section 3.3.16).
//!
//! Listings come from the directory cache when live, otherwise from one
//! authoritative backend read. Cookies are the 1-based positions of
//! entries in the captured listing; the cookie verifier is bumped on every
//! mutation of the directory, so a stale cookie answers BAD_COOKIE and the
//! client restarts its walk.

use std::io::{Read, Write};

use tracing::{debug, error, trace};

use crate::protocol::nfs::decode_args;
use crate::protocol::rpc;
use crate::protocol::xdr::{self, nfs3, Serialize};
use crate::ratelimit::OpClass;
use crate::server::nfs_status;
use crate::write_counter::WriteCounter;

/// Bytes reserved for the list terminator and EOF flag.
const REPLY_TAIL_RESERVE: usize = 128;

pub async fn nfsproc3_readdir(
    xid: u32,
    input: &mut impl Read,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    let Some(args) = decode_args::<nfs3::dir::READDIR3args>(xid, "READDIR", input, output)? else {
        return Ok(());
    };
    debug!("nfsproc3_readdir({xid}, {args:?})");
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
            error!("nfsproc3_readdir({xid}) {dir_path}: {err}");
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nfs_status(&err).serialize(output)?;
            dir_attr.serialize(output)?;
            return Ok(());
        }
    };
    let verifier = snapshot.verifier.to_be_bytes();

    // A resumed walk must present the verifier of the listing it started.
    if args.cookie != 0 && args.cookieverf != verifier {
        debug!("nfsproc3_readdir({xid}) stale cookie verifier for {dir_path}");
        xdr::rpc::make_success_reply(xid).serialize(output)?;
        nfs3::nfsstat3::NFS3ERR_BAD_COOKIE.serialize(output)?;
        dir_attr.serialize(output)?;
        return Ok(());
    }

    let start = args.cookie as usize;
    let max_bytes = (args.dircount as usize).saturating_sub(REPLY_TAIL_RESERVE).max(256);

    let mut counting_output = WriteCounter::new(output);
    xdr::rpc::make_success_reply(xid).serialize(&mut counting_output)?;
    nfs3::nfsstat3::NFS3_OK.serialize(&mut counting_output)?;
    dir_attr.serialize(&mut counting_output)?;
    verifier.serialize(&mut counting_output)?;

    let mut all_written = true;
    let mut emitted = 0usize;
    for (index, entry) in snapshot.entries.iter().enumerate().skip(start) {
        let wire_entry = nfs3::dir::entry3 {
            fileid: entry.fileid,
            name: entry.name.as_str().as_bytes().into(),
            cookie: (index + 1) as nfs3::cookie3,
        };
        let mut buf: Vec<u8> = Vec::new();
        true.serialize(&mut buf)?;
        wire_entry.serialize(&mut buf)?;
        if counting_output.bytes_written() + buf.len() >= max_bytes {
            trace!("nfsproc3_readdir({xid}) reply budget reached, truncating");
            all_written = false;
            break;
        }
        counting_output.write_all(&buf)?;
        emitted += 1;
    }
    false.serialize(&mut counting_output)?;
    let eof = all_written && start + emitted >= snapshot.entries.len();
    eof.serialize(&mut counting_output)?;
    debug!(
        "nfsproc3_readdir({xid}) {dir_path}: {emitted} entries from cookie {}, eof {eof}",
        args.cookie
    );
    Ok(())
}

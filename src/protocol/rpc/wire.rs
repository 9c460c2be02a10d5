//! Record marking (RFC 5531 section 11) and the RPC call dispatcher.
//!
//! TCP is a byte stream, so each RPC record travels as one or more
//! fragments prefixed by a 4-byte header: the low 31 bits carry the
//! fragment length, the high bit marks the last fragment of the record.
//!
//! [`handle_rpc`] is the per-record entry point: it validates the RPC
//! header, decodes and squashes credentials, filters retransmissions and
//! routes the call to the NFSv3, MOUNT or PORTMAP program handlers.

use std::io::{Cursor, Read, Write};

use anyhow::anyhow;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, trace, warn};

use crate::config::{Squash, ANONYMOUS_ID};
use crate::protocol::nfs;
use crate::protocol::rpc::{self, ResponseBuffer};
use crate::protocol::xdr::{self, deserialize, mount, nfs3, portmap, Serialize};

/// Ceiling on one reassembled RPC record. Large enough for a full-size
/// WRITE plus headers, small enough to bound per-connection memory.
pub const MAX_RPC_RECORD_LENGTH: usize = 8 * 1024 * 1024;

/// Reads one fragment, appending its payload to `append_to`. Returns true
/// when this was the record's last fragment.
pub async fn read_fragment<R: AsyncRead + Unpin>(
    socket: &mut R,
    append_to: &mut Vec<u8>,
) -> Result<bool, anyhow::Error> {
    let mut header_buf = [0_u8; 4];
    socket.read_exact(&mut header_buf).await?;
    let fragment_header = u32::from_be_bytes(header_buf);
    let is_last = (fragment_header & (1 << 31)) > 0;
    let length = (fragment_header & ((1 << 31) - 1)) as usize;
    trace!(length, is_last, "reading fragment");
    if append_to.len().saturating_add(length) > MAX_RPC_RECORD_LENGTH {
        return Err(anyhow!(
            "RPC record exceeds {} bytes, dropping connection",
            MAX_RPC_RECORD_LENGTH
        ));
    }
    let start_offset = append_to.len();
    append_to.resize(start_offset + length, 0);
    socket.read_exact(&mut append_to[start_offset..]).await?;
    Ok(is_last)
}

/// Writes `buf` as record-marked fragments.
pub async fn write_fragment<W: AsyncWrite + Unpin>(
    socket: &mut W,
    buf: &[u8],
) -> Result<(), anyhow::Error> {
    const MAX_FRAGMENT_SIZE: usize = (1 << 31) - 1;

    let mut offset = 0;
    loop {
        let remaining = buf.len() - offset;
        let fragment_size = remaining.min(MAX_FRAGMENT_SIZE);
        let is_last = offset + fragment_size >= buf.len();
        let fragment_header =
            if is_last { fragment_size as u32 | (1 << 31) } else { fragment_size as u32 };
        socket.write_all(&u32::to_be_bytes(fragment_header)).await?;
        trace!(fragment_size, is_last, "writing fragment");
        socket.write_all(&buf[offset..offset + fragment_size]).await?;
        offset += fragment_size;
        if is_last {
            break;
        }
    }
    socket.flush().await?;
    Ok(())
}

/// Rewrites AUTH_UNIX credentials according to the squash policy before
/// they can reach the backend.
fn squash_credentials(auth: &mut xdr::rpc::auth_unix, policy: Squash) {
    match policy {
        Squash::None => {}
        Squash::Root => {
            if auth.uid == 0 {
                auth.uid = ANONYMOUS_ID;
            }
            if auth.gid == 0 {
                auth.gid = ANONYMOUS_ID;
            }
        }
        Squash::All => {
            auth.uid = ANONYMOUS_ID;
            auth.gid = ANONYMOUS_ID;
            auth.gids.clear();
        }
    }
}

/// Processes one RPC record: header validation, authentication,
/// retransmission filtering and program routing.
///
/// Returns true when a reply was produced, false when the record was
/// dropped (retransmission). A decode failure of the procedure arguments
/// never reaches here — handlers answer those with GARBAGE_ARGS and the
/// connection stays open.
pub async fn handle_rpc(
    input: &mut impl Read,
    output: &mut impl Write,
    mut context: rpc::Context,
) -> Result<bool, anyhow::Error> {
    let recv = deserialize::<xdr::rpc::rpc_msg>(input)?;
    let xid = recv.xid;
    let xdr::rpc::rpc_body::CALL(call) = recv.body else {
        error!("received a Reply where a Call was expected");
        return Err(anyhow!("bad RPC call format"));
    };

    if call.rpcvers != xdr::rpc::RPC_VERSION {
        warn!("invalid RPC version {} != {}", call.rpcvers, xdr::rpc::RPC_VERSION);
        xdr::rpc::rpc_vers_mismatch(xid).serialize(output)?;
        return Ok(true);
    }

    match call.cred.flavor {
        xdr::rpc::auth_flavor::AUTH_NULL => {}
        xdr::rpc::auth_flavor::AUTH_UNIX => {
            match deserialize::<xdr::rpc::auth_unix>(&mut Cursor::new(&call.cred.body)) {
                Ok(auth) => context.auth = auth,
                Err(e) => {
                    debug!("undecodable AUTH_UNIX credentials: {e}");
                    xdr::rpc::auth_error_reply_message(xid, xdr::rpc::auth_stat::AUTH_BADCRED)
                        .serialize(output)?;
                    return Ok(true);
                }
            }
        }
        other => {
            debug!(?other, "unsupported auth flavor");
            xdr::rpc::auth_error_reply_message(xid, xdr::rpc::auth_stat::AUTH_REJECTEDCRED)
                .serialize(output)?;
            return Ok(true);
        }
    }
    let squash = context.server.options.read().unwrap().squash;
    squash_credentials(&mut context.auth, squash);

    if context.server.transactions.is_retransmission(xid, context.client_addr) {
        debug!(xid, client = %context.client_addr, "retransmission dropped");
        return Ok(false);
    }

    context
        .server
        .stats
        .requests
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    let res = match call.prog {
        nfs3::PROGRAM => match call.vers {
            nfs3::VERSION => nfs::v3::handle_nfs(xid, call, input, output, &context).await,
            _ => {
                warn!("unsupported NFS version {} (serving {})", call.vers, nfs3::VERSION);
                xdr::rpc::prog_mismatch_reply_message(xid, nfs3::VERSION).serialize(output)?;
                Ok(())
            }
        },
        mount::PROGRAM => match call.vers {
            // The MOUNT wire format is identical in versions 1 and 3;
            // version 2 (NFSv2-era) is not served.
            mount::VERSION_LOW | mount::VERSION => {
                nfs::mount::handle_mount(xid, call, input, output, &context).await
            }
            _ => {
                warn!("unsupported MOUNT version {}", call.vers);
                xdr::rpc::prog_mismatch_reply_message(xid, mount::VERSION).serialize(output)?;
                Ok(())
            }
        },
        portmap::PROGRAM => nfs::portmap::handle_portmap(xid, &call, input, output, &context),
        unknown => {
            warn!("unknown RPC program {unknown}");
            xdr::rpc::prog_unavail_reply_message(xid).serialize(output)?;
            Ok(())
        }
    }
    .map(|_| true);
    context.server.transactions.mark_processed(xid, context.client_addr);
    res
}

/// Adapter between the command queue and [`handle_rpc`].
pub fn process_rpc_command<'a>(
    data: &[u8],
    output: &'a mut ResponseBuffer,
    context: rpc::Context,
) -> futures::future::BoxFuture<'a, anyhow::Result<bool>> {
    let data = data.to_vec();
    Box::pin(async move {
        let mut input_cursor = Cursor::new(data);
        let mut output_cursor = Cursor::new(output.get_mut_buffer());
        handle_rpc(&mut input_cursor, &mut output_cursor, context).await
    })
}

//! MOUNT MNT procedure (procedure 1, RFC 1813 Appendix I section I.4.2).
//!
//! Validates the requested directory against the configured export and
//! returns the root file handle, which is allocated once at export start
//! and identical across MNT calls. Mount attempts are counted per client
//! over a one-minute sliding window.

use std::io::{Read, Write};

use num_traits::cast::ToPrimitive;
use tracing::{debug, warn};

use crate::protocol::nfs::decode_args;
use crate::protocol::rpc;
use crate::protocol::xdr::{self, mount, Serialize};
use crate::ratelimit::OpClass;

pub async fn mountproc3_mnt(
    xid: u32,
    input: &mut impl Read,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    let Some(path) = decode_args::<mount::dirpath>(xid, "MNT", input, output)? else {
        return Ok(());
    };
    let requested = path.as_utf8().into_owned();
    debug!("mountproc3_mnt({xid}, {requested:?})");
    let server = &context.server;

    if !server.limiter.allow_request(context.client_ip(), context.conn_id)
        || !server.limiter.allow_op(context.client_ip(), OpClass::Mount)
    {
        // The MOUNT status set has no JUKEBOX; SERVERFAULT is the closest
        // retryable answer.
        warn!("mountproc3_mnt({xid}) rate limited for {}", context.client_ip());
        xdr::rpc::make_success_reply(xid).serialize(output)?;
        mount::mountstat3::MNT3ERR_SERVERFAULT.serialize(output)?;
        return Ok(());
    }

    // Accept the configured export name, with or without trailing slash.
    let normalized = if requested.len() > 1 {
        requested.trim_end_matches('/')
    } else {
        requested.as_str()
    };
    if normalized != server.export_name.as_str() {
        debug!("mountproc3_mnt({xid}) no export matches {requested:?}");
        xdr::rpc::make_success_reply(xid).serialize(output)?;
        mount::mountstat3::MNT3ERR_NOENT.serialize(output)?;
        return Ok(());
    }

    let response = mount::mountres3_ok {
        fhandle: server.root_fh().data,
        auth_flavors: vec![
            xdr::rpc::auth_flavor::AUTH_NULL.to_u32().unwrap(),
            xdr::rpc::auth_flavor::AUTH_UNIX.to_u32().unwrap(),
        ],
    };
    server.register_mount(&context.client_ip().to_string(), normalized);
    server.signal_mount(true).await;
    debug!("mountproc3_mnt({xid}) -> {response:?}");
    xdr::rpc::make_success_reply(xid).serialize(output)?;
    mount::mountstat3::MNT3_OK.serialize(output)?;
    response.serialize(output)?;
    Ok(())
}

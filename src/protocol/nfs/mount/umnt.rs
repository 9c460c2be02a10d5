//! MOUNT UMNT procedure (procedure 3). Advisory: the server forgets the
//! mount record and notifies the embedder, but holds no client state that
//! depends on it.

use std::io::{Read, Write};

use tracing::debug;

use crate::protocol::nfs::decode_args;
use crate::protocol::rpc;
use crate::protocol::xdr::{self, mount, Serialize};

pub async fn mountproc3_umnt(
    xid: u32,
    input: &mut impl Read,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    let Some(path) = decode_args::<mount::dirpath>(xid, "UMNT", input, output)? else {
        return Ok(());
    };
    let requested = path.as_utf8().into_owned();
    debug!("mountproc3_umnt({xid}, {requested:?})");

    context
        .server
        .unregister_mount(&context.client_ip().to_string(), requested.trim_end_matches('/'));
    context.server.signal_mount(false).await;

    // UMNT returns nothing beyond the accepted-reply header.
    xdr::rpc::make_success_reply(xid).serialize(output)?;
    Ok(())
}

//! MOUNT UMNTALL procedure (procedure 4). Advisory cleanup of every mount
//! record of the calling client.

use std::io::Write;

use tracing::debug;

use crate::protocol::rpc;
use crate::protocol::xdr::{self, Serialize};

pub async fn mountproc3_umnt_all(
    xid: u32,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    debug!("mountproc3_umnt_all({xid})");
    context.server.unregister_all_mounts(&context.client_ip().to_string());
    context.server.signal_mount(false).await;
    xdr::rpc::make_success_reply(xid).serialize(output)?;
    Ok(())
}

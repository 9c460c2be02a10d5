//! Minimal PORTMAP (RFC 1833) handlers: NULL and GETPORT. Registration
//! with a system rpcbind is left to external glue; these replies are just
//! enough for clients that query the server process directly.

use std::io::{Read, Write};

use num_traits::cast::FromPrimitive;
use tracing::debug;

use crate::protocol::rpc;
use crate::protocol::xdr::{self, portmap, Serialize};

mod get_port;
mod null;

use get_port::pmapproc_getport;
use null::pmapproc_null;

/// Dispatches one PORTMAP call.
pub fn handle_portmap(
    xid: u32,
    call: &xdr::rpc::call_body,
    input: &mut impl Read,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    if call.vers != portmap::VERSION {
        debug!("unsupported portmap version {}", call.vers);
        xdr::rpc::prog_mismatch_reply_message(xid, portmap::VERSION).serialize(output)?;
        return Ok(());
    }
    let procedure =
        portmap::PortmapProgram::from_u32(call.proc).unwrap_or(portmap::PortmapProgram::INVALID);

    match procedure {
        portmap::PortmapProgram::PMAPPROC_NULL => pmapproc_null(xid, output)?,
        portmap::PortmapProgram::PMAPPROC_GETPORT => pmapproc_getport(xid, input, output, context)?,
        _ => {
            xdr::rpc::proc_unavail_reply_message(xid).serialize(output)?;
        }
    }
    Ok(())
}

//! PORTMAP GETPORT procedure (procedure 3).
//!
//! NFS and MOUNT run on the same listener in this process, so both
//! programs answer with the local port; anything else reports 0, the
//! protocol's "not registered".

use std::io::{Read, Write};

use tracing::debug;

use crate::protocol::nfs::decode_args;
use crate::protocol::rpc;
use crate::protocol::xdr::{self, mount, nfs3, portmap, Serialize};

pub fn pmapproc_getport(
    xid: u32,
    input: &mut impl Read,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    let Some(query) = decode_args::<portmap::mapping>(xid, "GETPORT", input, output)? else {
        return Ok(());
    };
    debug!("pmapproc_getport({xid}, {query:?})");

    let port = match (query.prog, query.prot) {
        (nfs3::PROGRAM | mount::PROGRAM, portmap::IPPROTO_TCP) => u32::from(context.local_port),
        _ => 0,
    };

    xdr::rpc::make_success_reply(xid).serialize(output)?;
    port.serialize(output)?;
    Ok(())
}

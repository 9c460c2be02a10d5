//! PORTMAP NULL procedure (procedure 0).

use std::io::Write;

use tracing::debug;

use crate::protocol::xdr::{self, Serialize};

pub fn pmapproc_null(xid: u32, output: &mut impl Write) -> Result<(), anyhow::Error> {
    debug!("pmapproc_null({xid})");
    xdr::rpc::make_success_reply(xid).serialize(output)?;
    Ok(())
}

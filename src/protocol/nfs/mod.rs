//! Program handlers for NFSv3, MOUNT and PORTMAP.

use std::io::{Read, Write};

use tracing::debug;

use crate::protocol::xdr::{self, deserialize, Deserialize, Serialize};

pub mod mount;
pub mod portmap;
pub mod v3;

/// Decodes procedure arguments, answering GARBAGE_ARGS on malformed input.
///
/// No reply body is ever produced from a partially decoded request; the
/// connection stays open and the next record is processed normally.
pub(crate) fn decode_args<T: Deserialize + Default>(
    xid: u32,
    procedure: &str,
    input: &mut impl Read,
    output: &mut impl Write,
) -> anyhow::Result<Option<T>> {
    match deserialize::<T>(input) {
        Ok(args) => Ok(Some(args)),
        Err(e) => {
            debug!("{procedure}({xid}) undecodable arguments: {e}");
            xdr::rpc::garbage_args_reply_message(xid).serialize(output)?;
            Ok(None)
        }
    }
}

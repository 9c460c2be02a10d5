//! MOUNT DUMP procedure (procedure 2): lists the mounts the server has
//! recorded through MNT/UMNT.

use std::io::Write;

use tracing::debug;

use crate::protocol::rpc;
use crate::protocol::xdr::{self, mount, Serialize};

pub fn mountproc3_dump(
    xid: u32,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    debug!("mountproc3_dump({xid})");

    let entries: Vec<mount::mountbody> = context
        .server
        .mount_list()
        .into_iter()
        .map(|m| mount::mountbody {
            ml_hostname: mount::name(m.hostname.into_bytes()),
            ml_directory: mount::dirpath(m.path.into_bytes()),
        })
        .collect();

    xdr::rpc::make_success_reply(xid).serialize(output)?;
    mount::serialize_list(&entries, output)?;
    Ok(())
}

//! MOUNT EXPORT procedure (procedure 5): reports the configured export
//! and, when an allow-list is set, its groups.

use std::io::Write;

use tracing::debug;

use crate::protocol::rpc;
use crate::protocol::xdr::{self, mount, Serialize};

pub fn mountproc3_export(
    xid: u32,
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    debug!("mountproc3_export({xid})");
    let server = &context.server;

    let groups: Vec<mount::name> = server
        .options
        .read()
        .unwrap()
        .allowed_ips
        .iter()
        .map(|net| mount::name(net.to_string().into_bytes()))
        .collect();
    let node = mount::exportnode {
        ex_dir: mount::dirpath(server.export_name.as_bytes().to_vec()),
        ex_groups: groups,
    };

    xdr::rpc::make_success_reply(xid).serialize(output)?;
    mount::serialize_list(&[node], output)?;
    Ok(())
}

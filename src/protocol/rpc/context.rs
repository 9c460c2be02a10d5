//! Per-connection request context.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::protocol::xdr;
use crate::server::ServerState;

/// State handed to every protocol handler: who is calling, with which
/// credentials, and the shared server it is calling into.
///
/// One `Context` exists per connection; the dispatcher clones it per
/// request and fills in the decoded (and possibly squashed) credentials.
#[derive(Clone)]
pub struct Context {
    /// Port the server answered on; reported by PORTMAP GETPORT.
    pub local_port: u16,
    /// Peer address of the connection.
    pub client_addr: SocketAddr,
    /// Server-unique id of this connection, used by the per-connection
    /// rate-limit bucket.
    pub conn_id: u64,
    /// AUTH_UNIX credentials after squashing; default (nobody) for
    /// AUTH_NULL callers.
    pub auth: xdr::rpc::auth_unix,
    /// The shared server state.
    pub server: Arc<ServerState>,
    /// Set once the connection is gone; long-running work checks it before
    /// queueing more backend calls.
    pub closed: Arc<AtomicBool>,
}

impl Context {
    pub fn client_ip(&self) -> std::net::IpAddr {
        self.client_addr.ip()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("rpc::Context")
            .field("local_port", &self.local_port)
            .field("client_addr", &self.client_addr)
            .field("conn_id", &self.conn_id)
            .field("auth", &self.auth)
            .finish()
    }
}

//! TCP connection manager.
//!
//! One listener serves the NFS, MOUNT and PORTMAP programs. For every
//! accepted connection the manager:
//!
//! - checks the IP allow-list and, with `Secure`, the client source port,
//!   before any protocol bytes are read;
//! - enforces `MaxConnections`;
//! - optionally completes a TLS handshake;
//! - runs a reader task feeding the per-connection command queue and a
//!   writer loop emitting record-marked replies, closing the connection
//!   after `IdleTimeout` of silence.
//!
//! `unexport` stops the accept loop, waits for connections to drain and
//! drops all cached state.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::ExportOptions;
use crate::error::Error;
use crate::protocol::rpc::{self, CommandQueue, CommandResult};
use crate::protocol::xdr;
use crate::server::{ServerState, StatsSnapshot};
use crate::tls;
use crate::vfs::FileSystem;

/// Common surface of NFS TCP servers.
#[async_trait]
pub trait NfsTcp: Send + Sync {
    /// The port actually bound; useful after binding port 0.
    fn get_listen_port(&self) -> u16;

    /// The address actually bound.
    fn get_listen_ip(&self) -> IpAddr;

    /// Registers a channel receiving `true` on MNT and `false` on UMNT.
    fn set_mount_listener(&self, signal: mpsc::Sender<bool>);

    /// Accepts and serves connections until `unexport` is called or the
    /// listener fails.
    async fn handle_forever(&self) -> std::io::Result<()>;
}

/// The TCP listener exporting one file system.
pub struct NfsTcpListener {
    listener: TcpListener,
    port: u16,
    state: Arc<ServerState>,
    tls: Option<tokio_rustls::TlsAcceptor>,
    shutdown: watch::Sender<bool>,
}

impl NfsTcpListener {
    /// Binds `ipstr` (`"ip:port"`) and prepares the export. Startup
    /// failures are distinguishable: [`Error::Bind`], [`Error::Tls`],
    /// [`Error::ExportPath`], [`Error::Backend`].
    pub async fn bind<T: FileSystem + 'static>(
        ipstr: &str,
        backend: T,
        export_name: &str,
        options: ExportOptions,
    ) -> Result<NfsTcpListener, Error> {
        let addr: SocketAddr = ipstr.parse().map_err(|_| Error::Bind {
            addr: ipstr.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "address must be of the form ip:port",
            ),
        })?;
        let tls = if options.tls.enabled {
            Some(tls::build_acceptor(&options.tls)?)
        } else {
            None
        };
        let state = ServerState::new(Arc::new(backend), export_name, options)?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr: ipstr.to_string(), source })?;
        let port = listener.local_addr()?.port();
        info!(%addr, port, tls = tls.is_some(), "NFS export listening");
        let (shutdown, _) = watch::channel(false);
        Ok(NfsTcpListener { listener, port, state, tls, shutdown })
    }

    /// Shared server state, for statistics and administration.
    pub fn state(&self) -> Arc<ServerState> {
        self.state.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.state.stats.snapshot()
    }

    /// Applies a runtime options update (ReadOnly, cache sizes/TTLs,
    /// connection caps). TLS changes are refused.
    pub fn update_export_options(&self, new: ExportOptions) -> Result<(), Error> {
        self.state.update_options(new)
    }

    /// Stops accepting, waits for in-flight connections to wind down and
    /// drops all cached state.
    pub async fn unexport(&self) {
        let _ = self.shutdown.send(true);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.state.active_connections.load(Ordering::Relaxed) > 0
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.state.drain();
        info!("export stopped");
    }

    /// Admission checks that run before any protocol bytes are read.
    fn admit(&self, peer: SocketAddr) -> bool {
        let options = self.state.options.read().unwrap();
        if !options.ip_allowed(&peer.ip()) {
            debug!(%peer, "connection refused by allow-list");
            return false;
        }
        if options.secure && peer.port() >= 1024 {
            debug!(%peer, "connection refused: unprivileged source port");
            return false;
        }
        let max = options.max_connections;
        drop(options);
        if self.state.active_connections.load(Ordering::Relaxed) >= max {
            warn!(%peer, "connection refused: connection limit reached");
            return false;
        }
        true
    }
}

#[async_trait]
impl NfsTcp for NfsTcpListener {
    fn get_listen_port(&self) -> u16 {
        self.port
    }

    fn get_listen_ip(&self) -> IpAddr {
        self.listener.local_addr().map(|a| a.ip()).unwrap_or(IpAddr::from([0, 0, 0, 0]))
    }

    fn set_mount_listener(&self, signal: mpsc::Sender<bool>) {
        self.state.set_mount_signal(signal);
    }

    async fn handle_forever(&self) -> std::io::Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let (socket, peer) = tokio::select! {
                accepted = self.listener.accept() => accepted?,
                _ = shutdown.changed() => {
                    info!("accept loop stopping");
                    return Ok(());
                }
            };
            if !self.admit(peer) {
                self.state.stats.rejected_connections.fetch_add(1, Ordering::Relaxed);
                drop(socket);
                continue;
            }

            let conn_id = self.state.next_conn_id();
            self.state.active_connections.fetch_add(1, Ordering::Relaxed);
            info!(%peer, conn_id, "accepted connection");

            let context = rpc::Context {
                local_port: self.port,
                client_addr: peer,
                conn_id,
                auth: xdr::rpc::auth_unix::default(),
                server: self.state.clone(),
                closed: Arc::new(AtomicBool::new(false)),
            };
            let tls = self.tls.clone();
            let state = self.state.clone();
            let shutdown_rx = self.shutdown.subscribe();
            tokio::spawn(async move {
                process_connection(socket, tls, context, shutdown_rx).await;
                state.active_connections.fetch_sub(1, Ordering::Relaxed);
                state.limiter.drop_connection(conn_id);
                debug!(%peer, conn_id, "connection finished");
            });
        }
    }
}

/// Completes the optional TLS handshake, then serves the connection.
async fn process_connection(
    socket: TcpStream,
    tls: Option<tokio_rustls::TlsAcceptor>,
    context: rpc::Context,
    shutdown: watch::Receiver<bool>,
) {
    let _ = socket.set_nodelay(true);
    match tls {
        Some(acceptor) => match acceptor.accept(socket).await {
            Ok(stream) => {
                {
                    let (_, conn) = stream.get_ref();
                    debug!(version = ?conn.protocol_version(), "TLS handshake complete");
                    if conn.peer_certificates().is_some() {
                        context
                            .server
                            .stats
                            .client_certs_validated
                            .fetch_add(1, Ordering::Relaxed);
                    }
                }
                serve_connection(stream, context, shutdown).await;
            }
            Err(err) => {
                warn!(peer = %context.client_addr, %err, "TLS handshake failed");
                context
                    .server
                    .stats
                    .tls_handshake_failures
                    .fetch_add(1, Ordering::Relaxed);
            }
        },
        None => serve_connection(socket, context, shutdown).await,
    }
}

/// Per-connection serve loop: a reader task reassembles records and feeds
/// the command queue; this task writes replies back and watches for idle
/// timeout and shutdown.
async fn serve_connection<S>(stream: S, context: rpc::Context, mut shutdown: watch::Receiver<bool>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (result_tx, mut result_rx) = mpsc::unbounded_channel::<CommandResult>();
    let queue = CommandQueue::new(rpc::process_rpc_command, result_tx, 8192);

    let closed = context.closed.clone();
    let reader_closed = closed.clone();
    let reader_context = context.clone();
    // Milliseconds of quiet, updated on every complete fragment.
    let last_activity = Arc::new(AtomicU64::new(0));
    let reader_activity = last_activity.clone();
    let started = tokio::time::Instant::now();

    let reader_task = tokio::spawn(async move {
        let mut fragment: Vec<u8> = Vec::new();
        loop {
            match rpc::read_fragment(&mut reader, &mut fragment).await {
                Ok(is_last) => {
                    reader_activity
                        .store(started.elapsed().as_millis() as u64, Ordering::Relaxed);
                    if is_last {
                        let record = std::mem::take(&mut fragment);
                        if queue.submit(record, reader_context.clone()).is_err() {
                            break;
                        }
                    }
                }
                Err(err) => {
                    debug!("read loop ended: {err:#}");
                    break;
                }
            }
        }
        reader_closed.store(true, Ordering::Relaxed);
    });

    let mut idle_check = tokio::time::interval(Duration::from_secs(1));
    idle_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            reply = result_rx.recv() => match reply {
                Some(Ok(Some(buffer))) if buffer.has_content() => {
                    if let Err(err) =
                        rpc::write_fragment(&mut writer, &buffer.into_inner()).await
                    {
                        debug!("write loop ended: {err:#}");
                        break;
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!("connection error: {err:#}");
                    break;
                }
                None => break,
            },
            _ = idle_check.tick() => {
                if closed.load(Ordering::Relaxed) {
                    break;
                }
                let idle_timeout = context.server.options.read().unwrap().idle_timeout;
                let last = Duration::from_millis(last_activity.load(Ordering::Relaxed));
                if started.elapsed().saturating_sub(last) > idle_timeout {
                    debug!(peer = %context.client_addr, "closing idle connection");
                    break;
                }
            },
            _ = shutdown.changed() => {
                debug!(peer = %context.client_addr, "closing connection on unexport");
                break;
            }
        }
    }
    closed.store(true, Ordering::Relaxed);
    reader_task.abort();
}

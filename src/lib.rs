//! nfs-bridge — a user-space NFSv3 server for abstract file systems.
//!
//! The crate translates NFSv3 RPC traffic into calls on an embedder-supplied
//! [`vfs::FileSystem`] and back. It implements the full NFS version 3
//! protocol (RFC 1813), the MOUNT protocol (versions 1 and 3) and minimal
//! PORTMAP GETPORT, over TCP with optional TLS.
//!
//! ## Main components
//!
//! - [`vfs`]: the path-based backend trait to implement, with typed error
//!   kinds the protocol layer maps onto NFS status codes.
//! - [`tcp`]: the TLS-capable connection manager; bind an address, then
//!   `handle_forever` serves clients until `unexport`.
//! - [`config`]: every recognized export option, from read-only mode and
//!   IP allow-lists to cache sizes, rate limits and TLS.
//! - [`protocol`]: XDR wire types, RPC framing/dispatch and one handler
//!   per protocol procedure.
//!
//! Behind the handlers sit the subsystems that carry the server's
//! guarantees: a file-handle table with dense id reuse (`handles`), TTL+LRU
//! attribute and directory caches (`cache`), a per-file read-ahead buffer
//! (`readahead`), a batch coalescer for duplicate metadata requests
//! (`batch`) and a layered rate limiter (`ratelimit`).
//!
//! ## Usage
//!
//! Implement [`vfs::FileSystem`], then:
//!
//! ```ignore
//! let listener = NfsTcpListener::bind(
//!     "0.0.0.0:2049",
//!     MyFs::new(),
//!     "/export/data",
//!     ExportOptions::default(),
//! )
//! .await?;
//! listener.handle_forever().await?;
//! ```

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod handles;
pub mod protocol;
pub mod ratelimit;
pub mod readahead;
pub mod server;
pub mod tcp;
pub mod tls;
pub mod vfs;
mod write_counter;

#[cfg(not(target_os = "windows"))]
pub mod fs_util;

pub use config::{ExportOptions, LogOptions, RateLimitConfig, Squash, TlsOptions};
pub use error::Error;
pub use tcp::{NfsTcp, NfsTcpListener};

pub use protocol::xdr;

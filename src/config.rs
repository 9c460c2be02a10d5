//! Export configuration.
//!
//! [`ExportOptions`] collects every knob the server recognizes, with
//! defaults that work for a small export out of the box. A subset of the
//! options can be changed while the server runs; see
//! [`crate::tcp::NfsTcpListener::update_export_options`].

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use ipnet::IpNet;
use tracing_subscriber::EnvFilter;

/// UID/GID rewrite policy applied to AUTH_UNIX credentials before they
/// reach the backend.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Squash {
    /// Credentials pass through untouched.
    #[default]
    None,
    /// Root (uid 0) maps to the anonymous id.
    Root,
    /// Every caller maps to the anonymous id.
    All,
}

/// The uid/gid substituted by squashing.
pub const ANONYMOUS_ID: u32 = 65534;

/// Rate-limiter configuration (see the `ratelimit` module).
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Global ceiling in requests per second; burst equals the rate.
    pub global_requests_per_second: u32,
    pub per_ip_requests_per_second: u32,
    pub per_ip_burst_size: u32,
    pub per_connection_requests_per_second: u32,
    pub per_connection_burst_size: u32,
    /// Per-IP ceiling for READs and WRITEs larger than 64 KiB.
    pub large_io_per_ip_per_second: u32,
    /// Per-IP ceiling for READDIR/READDIRPLUS.
    pub readdir_per_ip_per_second: u32,
    /// Per-IP MOUNT calls per minute, counted over a sliding window.
    pub mounts_per_minute: u32,
    /// Ceiling on live file handles across all clients.
    pub file_handles_global: u64,
    /// Ceiling on live file handles attributed to one client IP.
    pub file_handles_per_ip: u64,
}

impl Default for RateLimitConfig {
    fn default() -> RateLimitConfig {
        RateLimitConfig {
            enabled: false,
            global_requests_per_second: 10_000,
            per_ip_requests_per_second: 1_000,
            per_ip_burst_size: 2_000,
            per_connection_requests_per_second: 500,
            per_connection_burst_size: 1_000,
            large_io_per_ip_per_second: 200,
            readdir_per_ip_per_second: 100,
            mounts_per_minute: 30,
            file_handles_global: 1_000_000,
            file_handles_per_ip: 100_000,
        }
    }
}

/// Lowest/highest TLS protocol version to negotiate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    Tls12,
    Tls13,
}

/// Client-certificate policy of the TLS listener.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ClientAuth {
    /// No certificate is requested.
    #[default]
    None,
    /// A certificate is requested but the handshake proceeds without one.
    Request,
    /// A certificate must be presented.
    Require,
    /// A certificate must be presented and verify against the CA bundle.
    RequireAndVerify,
}

/// TLS settings of the connection manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsOptions {
    pub enabled: bool,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// CA bundle used to verify client certificates.
    pub ca_path: Option<PathBuf>,
    pub min_version: TlsVersion,
    pub max_version: TlsVersion,
    pub client_auth: ClientAuth,
}

impl Default for TlsOptions {
    fn default() -> TlsOptions {
        TlsOptions {
            enabled: false,
            cert_path: PathBuf::new(),
            key_path: PathBuf::new(),
            ca_path: None,
            min_version: TlsVersion::Tls12,
            max_version: TlsVersion::Tls13,
            client_auth: ClientAuth::None,
        }
    }
}

/// Where log lines go.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum LogSink {
    #[default]
    Stderr,
    /// Daily-rotated files under `directory` with the given prefix.
    File { directory: PathBuf, prefix: String },
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
}

/// Logging configuration consumed by [`init_logging`].
#[derive(Clone, Debug)]
pub struct LogOptions {
    /// Filter directive, e.g. `"info"` or `"nfs_bridge=debug"`.
    pub level: String,
    pub format: LogFormat,
    pub sink: LogSink,
    pub log_client_ip: bool,
    pub log_operations: bool,
    pub log_file_access: bool,
}

impl Default for LogOptions {
    fn default() -> LogOptions {
        LogOptions {
            level: "info".to_string(),
            format: LogFormat::Full,
            sink: LogSink::Stderr,
            log_client_ip: true,
            log_operations: false,
            log_file_access: false,
        }
    }
}

/// Installs a global `tracing` subscriber according to `options`. Does
/// nothing if a subscriber is already set.
pub fn init_logging(options: &LogOptions) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match (&options.sink, options.format) {
        (LogSink::Stderr, LogFormat::Full) => {
            builder.with_writer(std::io::stderr).try_init()
        }
        (LogSink::Stderr, LogFormat::Compact) => {
            builder.compact().with_writer(std::io::stderr).try_init()
        }
        (LogSink::File { directory, prefix }, format) => {
            let appender = tracing_appender::rolling::daily(directory, prefix);
            match format {
                LogFormat::Full => builder.with_writer(appender).with_ansi(false).try_init(),
                LogFormat::Compact => {
                    builder.compact().with_writer(appender).with_ansi(false).try_init()
                }
            }
        }
    };
    let _ = result;
}

/// All options recognized by an export.
#[derive(Clone, Debug)]
pub struct ExportOptions {
    /// Reject every mutating procedure with ROFS.
    pub read_only: bool,
    /// Require privileged (< 1024) client source ports.
    pub secure: bool,
    /// Addresses and CIDR ranges allowed to connect; empty allows all.
    pub allowed_ips: Vec<IpNet>,
    pub squash: Squash,
    pub enable_read_ahead: bool,
    /// Size of the prefetch window in bytes.
    pub read_ahead_size: u32,
    /// Negotiated rtmax/wtmax.
    pub transfer_size: u32,
    pub attr_cache_timeout: Duration,
    pub attr_cache_size: usize,
    pub enable_dir_cache: bool,
    pub dir_cache_size: usize,
    pub dir_cache_ttl: Duration,
    pub max_connections: usize,
    /// Connections silent for this long are closed.
    pub idle_timeout: Duration,
    pub batch_operations: bool,
    /// Flush threshold of the batch coalescer.
    pub max_batch_size: usize,
    pub rate_limit: RateLimitConfig,
    pub tls: TlsOptions,
    pub log: LogOptions,
}

impl Default for ExportOptions {
    fn default() -> ExportOptions {
        ExportOptions {
            read_only: false,
            secure: false,
            allowed_ips: Vec::new(),
            squash: Squash::None,
            enable_read_ahead: true,
            read_ahead_size: 256 * 1024,
            transfer_size: 1024 * 1024,
            attr_cache_timeout: Duration::from_secs(5),
            attr_cache_size: 8192,
            enable_dir_cache: true,
            dir_cache_size: 1024,
            dir_cache_ttl: Duration::from_secs(5),
            max_connections: 256,
            idle_timeout: Duration::from_secs(300),
            batch_operations: false,
            max_batch_size: 16,
            rate_limit: RateLimitConfig::default(),
            tls: TlsOptions::default(),
            log: LogOptions::default(),
        }
    }
}

impl ExportOptions {
    /// True when `addr` passes the allow-list.
    pub fn ip_allowed(&self, addr: &IpAddr) -> bool {
        if self.allowed_ips.is_empty() {
            return true;
        }
        self.allowed_ips.iter().any(|net| net.contains(addr))
    }
}

//! Startup and administrative errors surfaced to the embedder.

/// Errors returned by [`crate::tcp::NfsTcpListener`] administration calls.
///
/// Each startup failure has its own variant so operators can distinguish a
/// busy port from a broken certificate without parsing messages.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// TLS material could not be loaded or was inconsistent.
    #[error("TLS configuration: {0}")]
    Tls(String),

    /// The export path is empty or not absolute.
    #[error("invalid export path: {0}")]
    ExportPath(String),

    /// The backend rejected the export root.
    #[error("backend initialization: {0}")]
    Backend(String),

    /// TLS settings cannot be changed through a runtime options update.
    #[error("TLS changes require re-exporting the file system")]
    TlsReloadRequired,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

//! TLS support for the connection manager.
//!
//! Builds a `tokio_rustls::TlsAcceptor` from [`TlsOptions`]: certificate
//! and key from PEM files, an optional CA bundle for client verification,
//! protocol-version pinning and the four client-auth modes. Every load
//! failure surfaces as [`Error::Tls`] and aborts startup.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{version, RootCertStore, ServerConfig, SupportedProtocolVersion};
use tokio_rustls::TlsAcceptor;

use crate::config::{ClientAuth, TlsOptions, TlsVersion};
use crate::error::Error;

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
    let file = File::open(path)
        .map_err(|e| Error::Tls(format!("cannot open certificate {}: {e}", path.display())))?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<_, _>>()
        .map_err(|e| Error::Tls(format!("invalid certificate {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(Error::Tls(format!("no certificates in {}", path.display())));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, Error> {
    let file = File::open(path)
        .map_err(|e| Error::Tls(format!("cannot open key {}: {e}", path.display())))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| Error::Tls(format!("invalid key {}: {e}", path.display())))?
        .ok_or_else(|| Error::Tls(format!("no private key in {}", path.display())))
}

fn protocol_versions(
    min: TlsVersion,
    max: TlsVersion,
) -> Result<Vec<&'static SupportedProtocolVersion>, Error> {
    if min > max {
        return Err(Error::Tls("min TLS version exceeds max".into()));
    }
    let mut versions = Vec::new();
    if min <= TlsVersion::Tls12 && max >= TlsVersion::Tls12 {
        versions.push(&version::TLS12);
    }
    if max >= TlsVersion::Tls13 {
        versions.push(&version::TLS13);
    }
    Ok(versions)
}

/// Builds the acceptor used by the accept loop.
pub fn build_acceptor(options: &TlsOptions) -> Result<TlsAcceptor, Error> {
    let certs = load_certs(&options.cert_path)?;
    let key = load_key(&options.key_path)?;
    let versions = protocol_versions(options.min_version, options.max_version)?;
    let builder = ServerConfig::builder_with_protocol_versions(&versions);

    let config = match options.client_auth {
        ClientAuth::None => builder
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::Tls(e.to_string()))?,
        mode => {
            let ca_path = options
                .ca_path
                .as_ref()
                .ok_or_else(|| Error::Tls("client auth requires a CA bundle".into()))?;
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca_path)? {
                roots
                    .add(cert)
                    .map_err(|e| Error::Tls(format!("bad CA certificate: {e}")))?;
            }
            let verifier_builder = WebPkiClientVerifier::builder(Arc::new(roots));
            let verifier = match mode {
                ClientAuth::Request => verifier_builder.allow_unauthenticated().build(),
                // Both require modes demand a certificate that chains to
                // the CA bundle; rustls has no present-but-unverified mode.
                ClientAuth::Require | ClientAuth::RequireAndVerify => verifier_builder.build(),
                ClientAuth::None => unreachable!(),
            }
            .map_err(|e| Error::Tls(format!("client verifier: {e}")))?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)
                .map_err(|e| Error::Tls(e.to_string()))?
        }
    };
    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_range_is_validated() {
        assert!(protocol_versions(TlsVersion::Tls13, TlsVersion::Tls12).is_err());
        let both = protocol_versions(TlsVersion::Tls12, TlsVersion::Tls13).unwrap();
        assert_eq!(both.len(), 2);
        let only13 = protocol_versions(TlsVersion::Tls13, TlsVersion::Tls13).unwrap();
        assert_eq!(only13.len(), 1);
    }

    #[test]
    fn missing_certificate_is_a_startup_error() {
        let options = TlsOptions {
            enabled: true,
            cert_path: "/nonexistent/server.crt".into(),
            key_path: "/nonexistent/server.key".into(),
            ..TlsOptions::default()
        };
        assert!(matches!(build_acceptor(&options), Err(Error::Tls(_))));
    }
}

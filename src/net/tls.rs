//! TLS credentials and server-side handshake setup.
//!
//! # Responsibilities
//! - Hold the local certificate, private key and trusted CA certificates
//! - Build a rustls acceptor once the credential set is complete
//! - Refuse to start a handshake while any credential is missing
//! - Load PEM certificates and keys from disk
//!
//! # Design Decisions
//! - Missing credentials are a hard precondition failure, never retried
//! - Trusted CAs verify client certificates when offered; clients without one are accepted
//! - Handshake outcomes are observability signals only

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

use super::connection::ConnectionId;

/// Error type for TLS setup.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Missing TLS credential: {0}")]
    MissingCredential(&'static str),

    #[error("TLS credentials were rejected; handshakes are disabled")]
    NotConfigured,

    #[error("File not found: {0:?}")]
    NotFound(PathBuf),

    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No certificates found in {0:?}")]
    NoCertificates(PathBuf),

    #[error("No private key found in {0:?}")]
    NoPrivateKey(PathBuf),

    #[error("Invalid TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("Invalid trusted CA set: {0}")]
    Verifier(String),
}

/// Credential holder and acceptor factory for server-side handshakes.
#[derive(Default)]
pub struct TlsHandshakeManager {
    /// Leaf first, then any intermediates.
    certificate_chain: Vec<CertificateDer<'static>>,
    private_key: Option<PrivateKeyDer<'static>>,
    trusted_ca_certificates: Vec<CertificateDer<'static>>,
    acceptor: Option<TlsAcceptor>,
}

impl std::fmt::Debug for TlsHandshakeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsHandshakeManager")
            .field("certificate_chain", &self.certificate_chain.len())
            .field("has_private_key", &self.private_key.is_some())
            .field("trusted_ca_certificates", &self.trusted_ca_certificates.len())
            .field("ready", &self.acceptor.is_some())
            .finish()
    }
}

impl TlsHandshakeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set all three credentials at once.
    pub fn configure(
        &mut self,
        local_certificate: CertificateDer<'static>,
        private_key: PrivateKeyDer<'static>,
        trusted_ca_certificates: Vec<CertificateDer<'static>>,
    ) -> Result<(), TlsError> {
        self.certificate_chain = vec![local_certificate];
        self.private_key = Some(private_key);
        self.trusted_ca_certificates = trusted_ca_certificates;
        self.rebuild()
    }

    pub fn set_local_certificate(&mut self, cert: CertificateDer<'static>) -> Result<(), TlsError> {
        self.set_local_certificate_chain(vec![cert])
    }

    /// Leaf certificate followed by the intermediates sent to clients.
    pub fn set_local_certificate_chain(
        &mut self,
        chain: Vec<CertificateDer<'static>>,
    ) -> Result<(), TlsError> {
        self.certificate_chain = chain;
        self.rebuild()
    }

    pub fn set_private_key(&mut self, key: PrivateKeyDer<'static>) -> Result<(), TlsError> {
        self.private_key = Some(key);
        self.rebuild()
    }

    pub fn set_trusted_ca_certificates(
        &mut self,
        certs: Vec<CertificateDer<'static>>,
    ) -> Result<(), TlsError> {
        self.trusted_ca_certificates = certs;
        self.rebuild()
    }

    /// Check the handshake precondition and hand out an acceptor for `id`.
    ///
    /// Fails when the certificate, key or CA set is missing or empty; the caller
    /// must close the connection without attempting a handshake.
    pub fn begin_handshake(&self, id: ConnectionId) -> Result<TlsAcceptor, TlsError> {
        if let Err(missing) = self.check_credentials() {
            tracing::warn!(
                connection_id = %id,
                missing,
                "Invalid TLS credentials, closing connection"
            );
            return Err(TlsError::MissingCredential(missing));
        }

        let acceptor = self.acceptor.clone().ok_or(TlsError::NotConfigured)?;
        tracing::debug!(connection_id = %id, "Starting server encryption");
        Ok(acceptor)
    }

    fn check_credentials(&self) -> Result<(), &'static str> {
        if self.certificate_chain.is_empty()
            || self.certificate_chain.iter().any(|cert| cert.is_empty())
        {
            return Err("local certificate");
        }
        match &self.private_key {
            Some(key) if !key.secret_der().is_empty() => {}
            _ => return Err("private key"),
        }
        if self.trusted_ca_certificates.is_empty()
            || self.trusted_ca_certificates.iter().any(|ca| ca.is_empty())
        {
            return Err("trusted CA certificates");
        }
        Ok(())
    }

    fn rebuild(&mut self) -> Result<(), TlsError> {
        self.acceptor = None;
        if self.check_credentials().is_err() {
            return Ok(());
        }
        let Some(key) = &self.private_key else {
            return Ok(());
        };
        self.acceptor = Some(build_acceptor(
            &self.certificate_chain,
            key,
            &self.trusted_ca_certificates,
        )?);
        tracing::info!(
            trusted_ca_certificates = self.trusted_ca_certificates.len(),
            "TLS credentials loaded"
        );
        Ok(())
    }
}

fn build_acceptor(
    chain: &[CertificateDer<'static>],
    key: &PrivateKeyDer<'static>,
    trusted: &[CertificateDer<'static>],
) -> Result<TlsAcceptor, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut roots = RootCertStore::empty();
    for ca in trusted {
        roots.add(ca.clone())?;
    }
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .allow_unauthenticated()
        .build()
        .map_err(|e| TlsError::Verifier(e.to_string()))?;

    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(verifier)
        .with_single_cert(chain.to_vec(), key.clone_key())?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    if !path.exists() {
        return Err(TlsError::NotFound(path.to_path_buf()));
    }
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Load every certificate from a PEM file.
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

/// Load the first private key (PKCS#1, PKCS#8 or SEC1) from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

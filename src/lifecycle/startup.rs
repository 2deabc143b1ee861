//! Startup orchestration.
//!
//! # Responsibilities
//! - Build a `FrameServer` from validated configuration
//! - Load TLS credentials from disk when TLS is enabled
//!
//! # Design Decisions
//! - Fail fast: unreadable credentials are a startup error
//! - Binding is left to the caller so it can report `listen` failure itself

use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::config::{ServerConfig, TlsConfig};
use crate::dispatch::SourceFactory;
use crate::frame::FrameSource;
use crate::net::tls::{load_certificates, load_private_key};
use crate::net::TlsError;
use crate::server::FrameServer;

/// Create a server for `config`, loading TLS credentials if enabled.
pub fn build_server<S: FrameSource>(
    config: ServerConfig,
    new_source: SourceFactory<S>,
) -> Result<FrameServer<S>, TlsError> {
    let tls = config.tls.clone();
    let mut server = FrameServer::new(config, new_source);
    if tls.enabled {
        load_tls_credentials(&mut server, &tls)?;
    }
    Ok(server)
}

/// PEM credentials read from disk, not yet handed to a server.
#[derive(Debug)]
pub struct TlsCredentials {
    /// Every certificate in the cert file, leaf first.
    pub certificate_chain: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
    pub trusted_ca_certificates: Vec<CertificateDer<'static>>,
}

/// Read certificate chain, key and CA set from the configured PEM paths.
pub fn read_tls_credentials(tls: &TlsConfig) -> Result<TlsCredentials, TlsError> {
    let cert_path = tls
        .cert_path
        .as_deref()
        .ok_or(TlsError::MissingCredential("local certificate"))?;
    let key_path = tls
        .key_path
        .as_deref()
        .ok_or(TlsError::MissingCredential("private key"))?;
    let ca_path = tls
        .ca_path
        .as_deref()
        .ok_or(TlsError::MissingCredential("trusted CA certificates"))?;

    let credentials = TlsCredentials {
        certificate_chain: load_certificates(Path::new(cert_path))?,
        private_key: load_private_key(Path::new(key_path))?,
        trusted_ca_certificates: load_certificates(Path::new(ca_path))?,
    };
    tracing::info!(
        cert_path,
        key_path,
        ca_path,
        chain_length = credentials.certificate_chain.len(),
        "TLS credentials read"
    );
    Ok(credentials)
}

/// Load the configured credentials into `server`.
pub fn load_tls_credentials<S: FrameSource>(
    server: &mut FrameServer<S>,
    tls: &TlsConfig,
) -> Result<(), TlsError> {
    let credentials = read_tls_credentials(tls)?;
    server.set_local_certificate_chain(credentials.certificate_chain)?;
    server.set_private_key(credentials.private_key)?;
    server.set_trusted_ca_certificates(credentials.trusted_ca_certificates)?;
    Ok(())
}

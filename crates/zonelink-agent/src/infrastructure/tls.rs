//! Device trust anchors, certificate verification and the pre-flight check.
//!
//! # Why a custom verifier? (for beginners)
//!
//! Speakers present certificates issued by the vendor's private root, not by
//! a public CA, and some of them carry no subject-alternative-name at all.
//! The stock `WebPkiServerVerifier` would reject those for a name mismatch.
//! [`DeviceCertVerifier`] therefore:
//!
//! 1. always verifies the chain up to one of the configured trust anchors,
//! 2. checks the host name only when the leaf has a SAN extension.
//!
//! The system trust store is never consulted.
//!
//! # Pre-flight
//!
//! Before opening a secure WebSocket the connector performs a plain TLS
//! handshake against the same host and port ([`preflight_check`]) so that a
//! certificate problem is reported as such, rather than as a generic
//! WebSocket failure.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{verify_server_cert_signed_by_trust_anchor, verify_server_name};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};
use x509_parser::oid_registry::OID_X509_EXT_SUBJECT_ALT_NAME;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::domain::SessionError;

/// Error type for loading trust anchors and building the TLS client config.
#[derive(Debug, Error)]
pub enum TlsSetupError {
    #[error("failed to read trust anchor file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file parsed but held no `CERTIFICATE` blocks.
    #[error("no certificates found in {0}")]
    Empty(String),

    #[error("invalid trust anchor in {source_name}: {reason}")]
    Invalid { source_name: String, reason: String },

    #[error("TLS configuration error: {0}")]
    Rustls(#[from] rustls::Error),
}

/// The set of device roots secure sessions must chain to.
#[derive(Debug, Clone)]
pub struct TrustAnchors {
    roots: RootCertStore,
}

impl Default for TrustAnchors {
    fn default() -> Self {
        Self {
            roots: RootCertStore::empty(),
        }
    }
}

impl TrustAnchors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every certificate in a PEM bundle.  `source_name` labels errors.
    pub fn add_pem(&mut self, pem: &[u8], source_name: &str) -> Result<usize, TlsSetupError> {
        let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &pem[..])
            .collect::<Result<_, _>>()
            .map_err(|e| TlsSetupError::Invalid {
                source_name: source_name.to_string(),
                reason: e.to_string(),
            })?;
        if certs.is_empty() {
            return Err(TlsSetupError::Empty(source_name.to_string()));
        }

        let count = certs.len();
        for cert in certs {
            self.roots.add(cert).map_err(|e| TlsSetupError::Invalid {
                source_name: source_name.to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(count)
    }

    pub fn from_pem(pem: &[u8]) -> Result<Self, TlsSetupError> {
        let mut anchors = Self::new();
        anchors.add_pem(pem, "<memory>")?;
        Ok(anchors)
    }

    /// Loads each PEM file in `paths`.  An empty list yields an empty set,
    /// which makes every secure connection fail verification.
    pub fn from_pem_files(paths: &[PathBuf]) -> Result<Self, TlsSetupError> {
        let mut anchors = Self::new();
        for path in paths {
            anchors.add_pem_file(path)?;
        }
        Ok(anchors)
    }

    fn add_pem_file(&mut self, path: &Path) -> Result<usize, TlsSetupError> {
        let pem = std::fs::read(path).map_err(|source| TlsSetupError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let added = self.add_pem(&pem, &path.display().to_string())?;
        debug!(path = %path.display(), added, "loaded trust anchors");
        Ok(added)
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// Chain-to-anchor verification with a SAN-conditional host name check.
#[derive(Debug)]
pub struct DeviceCertVerifier {
    roots: Arc<RootCertStore>,
    provider: Arc<CryptoProvider>,
}

impl DeviceCertVerifier {
    pub fn new(anchors: &TrustAnchors, provider: Arc<CryptoProvider>) -> Self {
        Self {
            roots: Arc::new(anchors.roots.clone()),
            provider,
        }
    }
}

impl ServerCertVerifier for DeviceCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let cert = ParsedCertificate::try_from(end_entity)?;
        verify_server_cert_signed_by_trust_anchor(
            &cert,
            &self.roots,
            intermediates,
            now,
            self.provider.signature_verification_algorithms.all,
        )?;

        if has_subject_alt_name(end_entity)? {
            verify_server_name(&cert, server_name)?;
        } else {
            debug!(server = ?server_name, "certificate has no SAN; host name not checked");
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// `true` if the DER certificate carries a subject-alternative-name
/// extension, even an empty one.
pub fn has_subject_alt_name(der: &[u8]) -> Result<bool, rustls::Error> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|_| rustls::Error::InvalidCertificate(CertificateError::BadEncoding))?;
    Ok(cert
        .extensions()
        .iter()
        .any(|ext| ext.oid == OID_X509_EXT_SUBJECT_ALT_NAME))
}

/// Builds the client config used for both the pre-flight and the WebSocket.
pub fn client_config(anchors: &TrustAnchors) -> Result<Arc<ClientConfig>, TlsSetupError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = Arc::new(DeviceCertVerifier::new(anchors, Arc::clone(&provider)));
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Performs a TLS handshake with `host:port` and closes the connection.
///
/// # Errors
///
/// - [`SessionError::Certificate`] if the presented certificate is rejected
/// - [`SessionError::Timeout`] if the handshake does not finish in `timeout`
/// - [`SessionError::Transport`] for connection and other handshake failures
pub async fn preflight_check(
    config: Arc<ClientConfig>,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<(), SessionError> {
    let server_name =
        ServerName::try_from(host.to_string()).map_err(|e| SessionError::InvalidUrl {
            url: host.to_string(),
            reason: e.to_string(),
        })?;
    let connector = TlsConnector::from(config);

    let attempt = async {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| SessionError::Transport(format!("connect to {host}:{port} failed: {e}")))?;
        let mut tls = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| classify_handshake_error(host, e))?;
        if let Err(e) = tls.shutdown().await {
            debug!(host, "pre-flight close: {e}");
        }
        Ok::<(), SessionError>(())
    };

    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::Timeout {
            stage: "certificate pre-flight",
            timeout,
        }),
    }
}

/// Maps a failed handshake to a certificate error when rustls rejected the
/// peer's certificate, and to a transport error otherwise.
pub(crate) fn classify_handshake_error(host: &str, err: std::io::Error) -> SessionError {
    let tls_error = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>());
    match tls_error {
        Some(e @ (rustls::Error::InvalidCertificate(_) | rustls::Error::NoCertificatesPresented)) => {
            warn!(host, "certificate rejected: {e}");
            SessionError::Certificate {
                host: host.to_string(),
                reason: e.to_string(),
            }
        }
        _ => SessionError::Transport(format!("TLS handshake with {host} failed: {err}")),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

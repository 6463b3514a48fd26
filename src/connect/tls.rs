//! TLS transport on top of rustls.
//!
//! Certificate checking (expiry, chain, name match with wildcard rules and
//! optional CRLs) is webpki's job; this module adds public key pinning and
//! the switch to turn verification off.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, CertificateRevocationListDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{debug, instrument};

use super::ConnectError;
use super::pin::PinnedKey;
use super::transport::Transport;
use crate::options::TlsOptions;

/// Builds the client configuration shared by every TLS connection of a
/// session. Reusing it lets rustls resume earlier sessions.
///
/// # Errors
///
/// [`ConnectError::TlsInit`] when a CA, CRL or pin file cannot be loaded.
#[instrument(level = "debug", skip_all)]
pub fn build_client_config(options: &TlsOptions) -> Result<Arc<ClientConfig>, ConnectError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let webpki = if options.check_certificate {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        if let Some(path) = &options.ca_file {
            let certs = CertificateDer::pem_file_iter(path)
                .map_err(|e| ConnectError::tls_init(format!("{}: {e}", path.display())))?;
            for cert in certs {
                let cert =
                    cert.map_err(|e| ConnectError::tls_init(format!("{}: {e}", path.display())))?;
                roots
                    .add(cert)
                    .map_err(|e| ConnectError::tls_init(format!("{}: {e}", path.display())))?;
            }
            debug!(path = %path.display(), "loaded CA certificates");
        }

        let mut crls = Vec::new();
        if let Some(path) = &options.crl_file {
            let iter = CertificateRevocationListDer::pem_file_iter(path)
                .map_err(|e| ConnectError::tls_init(format!("{}: {e}", path.display())))?;
            for crl in iter {
                crls.push(
                    crl.map_err(|e| ConnectError::tls_init(format!("{}: {e}", path.display())))?,
                );
            }
            debug!(path = %path.display(), count = crls.len(), "loaded CRLs");
        }

        let verifier = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .with_crls(crls)
            .build()
            .map_err(|e| ConnectError::tls_init(e.to_string()))?;
        Some(verifier)
    } else {
        None
    };

    let pin = options
        .pinned_public_key
        .as_deref()
        .map(PinnedKey::parse)
        .transpose()?;

    let verifier = Verifier {
        webpki,
        pin,
        provider: provider.clone(),
    };

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ConnectError::tls_init(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Runs the TLS handshake for `host` over an established TCP stream.
///
/// # Errors
///
/// [`ConnectError::TlsInit`] for a host rustls will not accept as a server
/// name, [`ConnectError::Handshake`] for handshake or verification
/// failures, and [`ConnectError::ReadTimeout`] if `timeout` expires.
#[instrument(level = "debug", skip(config, stream))]
pub async fn handshake(
    config: Arc<ClientConfig>,
    host: &str,
    stream: TcpStream,
    timeout: Option<Duration>,
) -> Result<TlsTransport, ConnectError> {
    let name = ServerName::try_from(host.to_owned())
        .map_err(|e| ConnectError::tls_init(format!("invalid server name '{host}': {e}")))?;
    let peer = stream.peer_addr().map_err(ConnectError::read)?;
    let connect = TlsConnector::from(config).connect(name, stream);
    let stream = match timeout {
        Some(limit) => tokio::time::timeout(limit, connect)
            .await
            .map_err(|_| ConnectError::ReadTimeout)?,
        None => connect.await,
    }
    .map_err(|e| ConnectError::handshake(host, e))?;
    debug!(%peer, "TLS handshake complete");
    Ok(TlsTransport {
        stream,
        peer,
        pending: Vec::new(),
    })
}

struct Verifier {
    webpki: Option<Arc<WebPkiServerVerifier>>,
    pin: Option<PinnedKey>,
    provider: Arc<CryptoProvider>,
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier")
            .field("check_certificate", &self.webpki.is_some())
            .field("pin", &self.pin)
            .finish_non_exhaustive()
    }
}

impl ServerCertVerifier for Verifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if let Some(webpki) = &self.webpki {
            webpki.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;
        }
        if let Some(pin) = &self.pin
            && !pin.matches(end_entity.as_ref())
        {
            return Err(rustls::Error::General(
                "server public key does not match the pinned public key".to_string(),
            ));
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// A TLS-wrapped TCP stream.
///
/// rustls has no peek, so peeked plaintext is held in `pending` until a
/// read consumes it.
pub struct TlsTransport {
    stream: TlsStream<TcpStream>,
    peer: SocketAddr,
    pending: Vec<u8>,
}

impl fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsTransport")
            .field("peer", &self.peer)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for TlsTransport {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.pending.is_empty() {
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            return Ok(n);
        }
        self.stream.read(buf).await
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf).await?;
        self.stream.flush().await
    }

    async fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            let mut chunk = vec![0u8; buf.len()];
            let n = self.stream.read(&mut chunk).await?;
            self.pending.extend_from_slice(&chunk[..n]);
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        Ok(n)
    }

    async fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        if !self.pending.is_empty() {
            return Ok(true);
        }
        // Session tickets and other records without plaintext are absorbed
        // by rustls; only application data or end of stream count.
        let mut chunk = [0u8; 512];
        match tokio::time::timeout(timeout, self.stream.read(&mut chunk)).await {
            Ok(Ok(n)) => {
                self.pending.extend_from_slice(&chunk[..n]);
                Ok(true)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(false),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.peer)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_builds() {
        let config = build_client_config(&TlsOptions::default()).unwrap();
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn test_unverified_config_builds() {
        let options = TlsOptions {
            check_certificate: false,
            ..TlsOptions::default()
        };
        assert!(build_client_config(&options).is_ok());
    }

    #[test]
    fn test_missing_ca_file_is_init_error() {
        let options = TlsOptions {
            ca_file: Some("/nonexistent/ca.pem".into()),
            ..TlsOptions::default()
        };
        assert!(matches!(
            build_client_config(&options),
            Err(ConnectError::TlsInit { .. })
        ));
    }

    #[test]
    fn test_bad_pin_is_init_error() {
        let options = TlsOptions {
            pinned_public_key: Some("sha256//@@@".to_string()),
            ..TlsOptions::default()
        };
        assert!(matches!(
            build_client_config(&options),
            Err(ConnectError::TlsInit { .. })
        ));
    }
}

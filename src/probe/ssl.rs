//! Certificate expiry lookup over a direct TLS connection.
//!
//! The lookup only reads the leaf certificate. It does not validate the
//! chain, so expired, self-signed and private-CA certificates still report
//! their expiry.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{self, CryptoProvider};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{self, ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;

use super::ProbeError;

const SECONDS_PER_DAY: i64 = 86_400;

/// Reads the leaf certificate of a host and reports days until expiry.
#[derive(Clone)]
pub struct SslChecker {
    config: Arc<ClientConfig>,
}

impl SslChecker {
    pub fn new() -> Result<Self, ProbeError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| ProbeError::Config(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(ReadOnlyVerifier(provider)))
            .with_no_client_auth();

        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Days until the peer certificate's `notAfter`, negative once expired.
    pub async fn expiry_days(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<i64, ProbeError> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| ProbeError::Config(format!("invalid host {}: {}", host, e)))?;
        let connector = TlsConnector::from(self.config.clone());

        let handshake = async {
            let stream = TcpStream::connect((host, port)).await?;
            connector.connect(server_name, stream).await
        };

        let tls = tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| ProbeError::Timeout(timeout))?
            .map_err(|e| ProbeError::Network(e.to_string()))?;

        let (_, session) = tls.get_ref();
        let leaf = session
            .peer_certificates()
            .and_then(|certs| certs.first())
            .ok_or_else(|| ProbeError::Network("peer sent no certificate".to_string()))?;

        let (_, cert) = x509_parser::parse_x509_certificate(leaf.as_ref())
            .map_err(|e| ProbeError::Network(format!("unparseable certificate: {}", e)))?;

        Ok(days_until(cert.validity().not_after.timestamp(), Utc::now().timestamp()))
    }
}

/// Accepts any certificate chain but still checks handshake signatures.
///
/// Nothing is sent over these connections; they exist only to read the
/// peer certificate.
#[derive(Debug)]
struct ReadOnlyVerifier(Arc<CryptoProvider>);

impl ServerCertVerifier for ReadOnlyVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Whole days from `now` until `expiry` (both unix seconds), rounded down.
pub fn days_until(expiry: i64, now: i64) -> i64 {
    (expiry - now).div_euclid(SECONDS_PER_DAY)
}

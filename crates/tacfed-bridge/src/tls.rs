//! TLS client configuration for peer links.
//!
//! Certificate material lives in the peer registry as PEM text and is
//! parsed in memory — nothing touches the filesystem. Verification
//! policy follows the peer row:
//!
//! - CA configured, `verify_hostname` on: full webpki verification.
//! - CA configured, `verify_hostname` off: the chain is still verified
//!   against the CA; only the name check is waived.
//! - No CA: the peer certificate is accepted unverified. This matches
//!   deployments that rely on network-level trust; it is logged at warn.

use std::sync::Arc;

use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tacfed_types::PeerDefinition;

use crate::error::BridgeError;

/// Builds the rustls client configuration for one peer.
pub fn client_config(peer: &PeerDefinition) -> Result<ClientConfig, BridgeError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let builder = match &peer.ca_certificate {
        Some(ca_pem) => {
            let roots = root_store(ca_pem)?;
            if peer.verify_hostname {
                builder.with_root_certificates(roots)
            } else {
                let inner = WebPkiServerVerifier::builder_with_provider(
                    Arc::new(roots),
                    provider.clone(),
                )
                .build()
                .map_err(|e| BridgeError::InvalidCertificate(e.to_string()))?;
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoHostnameVerification { inner }))
            }
        }
        None => {
            tracing::warn!(
                peer = %peer.name,
                "no CA certificate configured; remote certificate will not be verified"
            );
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
        }
    };

    let config = match (&peer.client_certificate, &peer.client_key) {
        (Some(cert_pem), Some(key_pem)) => {
            let certs = parse_certificates(cert_pem)?;
            let key = parse_private_key(key_pem)?;
            builder.with_client_auth_cert(certs, key)?
        }
        _ => builder.with_no_client_auth(),
    };

    Ok(config)
}

/// Parses the peer address into a TLS server name.
pub fn server_name(address: &str) -> Result<ServerName<'static>, BridgeError> {
    ServerName::try_from(address.to_string())
        .map_err(|_| BridgeError::InvalidServerName(address.to_string()))
}

fn root_store(ca_pem: &str) -> Result<RootCertStore, BridgeError> {
    let mut roots = RootCertStore::empty();
    for cert in parse_certificates(ca_pem)? {
        roots
            .add(cert)
            .map_err(|e| BridgeError::InvalidCertificate(e.to_string()))?;
    }
    Ok(roots)
}

fn parse_certificates(pem: &str) -> Result<Vec<CertificateDer<'static>>, BridgeError> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<_, _>>()
        .map_err(|e| BridgeError::InvalidCertificate(e.to_string()))?;
    if certs.is_empty() {
        return Err(BridgeError::InvalidCertificate(
            "no certificates found in PEM".to_string(),
        ));
    }
    Ok(certs)
}

fn parse_private_key(pem: &str) -> Result<PrivateKeyDer<'static>, BridgeError> {
    rustls_pemfile::private_key(&mut pem.as_bytes())
        .map_err(|e| BridgeError::InvalidCertificate(e.to_string()))?
        .ok_or_else(|| BridgeError::InvalidCertificate("no private key found in PEM".to_string()))
}

/// Verifies the chain against the configured CA but waives the hostname
/// check. Every other certificate error still fails the handshake.
#[derive(Debug)]
struct NoHostnameVerification {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for NoHostnameVerification {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName
                | CertificateError::NotValidForNameContext { .. },
            )) => Ok(ServerCertVerified::assertion()),
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Accepts any certificate the peer presents. Used only when no CA is
/// configured for the peer.
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
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
        rustls::crypto::verify_tls12_signature(
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
        rustls::crypto::verify_tls13_signature(
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

//! Server certificate verifiers.

use std::cmp::Ordering;
use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, SignatureScheme};

/// Match a target host name against a certificate name.
///
/// Comparison is ASCII case-insensitive:
/// - equal lengths must be equal;
/// - a target shorter than the certificate name must be its prefix, followed
///   by a `.` in the certificate name (`myserver` matches
///   `myserver.corp.local`, `ab` does not match `abc.corp.local`);
/// - a target longer than the certificate name never matches.
#[must_use]
pub fn certificate_name_matches(target: &str, certificate_name: &str) -> bool {
    let target = target.as_bytes();
    let cert = certificate_name.as_bytes();
    if target.is_empty() {
        return false;
    }

    match target.len().cmp(&cert.len()) {
        Ordering::Greater => false,
        Ordering::Equal => target.eq_ignore_ascii_case(cert),
        Ordering::Less => {
            cert[..target.len()].eq_ignore_ascii_case(target) && cert[target.len()] == b'.'
        }
    }
}

fn is_name_mismatch(reason: &CertificateError) -> bool {
    matches!(
        reason,
        CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
    )
}

fn presented_dns_names(end_entity: &CertificateDer<'_>) -> Vec<String> {
    match webpki::EndEntityCert::try_from(end_entity) {
        Ok(cert) => cert.valid_dns_names().map(str::to_owned).collect(),
        Err(_) => Vec::new(),
    }
}

// =============================================================================
// Chain validation with the legacy host name rule
// =============================================================================

/// Verifier that validates the chain with webpki and, when the only failure
/// is a host name mismatch, retries the name with [`certificate_name_matches`].
#[derive(Debug)]
pub(crate) struct LegacyNameVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl LegacyNameVerifier {
    pub(crate) fn new(inner: Arc<WebPkiServerVerifier>) -> Self {
        Self { inner }
    }
}

impl ServerCertVerifier for LegacyNameVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let result = self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        );

        match result {
            Err(rustls::Error::InvalidCertificate(reason)) if is_name_mismatch(&reason) => {
                let ServerName::DnsName(target) = server_name else {
                    return Err(rustls::Error::InvalidCertificate(reason));
                };
                let names = presented_dns_names(end_entity);
                if names
                    .iter()
                    .any(|name| certificate_name_matches(target.as_ref(), name))
                {
                    tracing::debug!(
                        target = target.as_ref(),
                        presented = ?names,
                        "certificate accepted by short host name rule"
                    );
                    Ok(ServerCertVerified::assertion())
                } else {
                    Err(rustls::Error::InvalidCertificate(reason))
                }
            }
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

// =============================================================================
// No validation (validate_certificate = false)
// =============================================================================

/// A certificate verifier that accepts any server certificate.
///
/// **WARNING:** Using this verifier exposes the connection to
/// man-in-the-middle attacks. Handshake signatures are still checked.
#[derive(Debug)]
pub(crate) struct NoValidationVerifier {
    provider: Arc<CryptoProvider>,
}

impl NoValidationVerifier {
    pub(crate) fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for NoValidationVerifier {
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

//! TLS fixtures.

use std::io;
use std::sync::Arc;

use rcgen::{CertificateParams, KeyPair};
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use sni_tls::PreloginShim;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;

/// A self-signed certificate and its private key.
#[derive(Debug)]
pub struct TestCertificate {
    cert: CertificateDer<'static>,
    key: PrivateKeyDer<'static>,
}

impl TestCertificate {
    /// Generate a certificate valid for the given DNS names.
    pub fn generate(names: &[&str]) -> Result<Self, rcgen::Error> {
        let key_pair = KeyPair::generate()?;
        let params = CertificateParams::new(names.iter().map(|n| (*n).to_string()).collect::<Vec<_>>())?;
        let cert = params.self_signed(&key_pair)?;

        Ok(Self {
            cert: cert.der().clone(),
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
        })
    }

    /// The DER-encoded certificate, usable as a trust anchor.
    pub fn der(&self) -> &CertificateDer<'static> {
        &self.cert
    }

    /// Build a TLS 1.2 acceptor serving this certificate.
    pub fn acceptor(&self) -> Result<TlsAcceptor, rustls::Error> {
        let config = ServerConfig::builder_with_provider(sni_tls::crypto_provider())
            .with_protocol_versions(&[&rustls::version::TLS12])?
            .with_no_client_auth()
            .with_single_cert(vec![self.cert.clone()], self.key.clone_key())?;
        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

/// Run the server side of a pre-login framed TLS handshake.
///
/// The returned stream has already left pre-login framing.
pub async fn accept_prelogin_tls<S>(
    acceptor: &TlsAcceptor,
    stream: S,
) -> io::Result<TlsStream<PreloginShim<S>>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut tls = acceptor.accept(PreloginShim::new(stream)).await?;
    tls.get_mut().0.finish_handshake();
    tracing::debug!("test server: TLS handshake completed");
    Ok(tls)
}

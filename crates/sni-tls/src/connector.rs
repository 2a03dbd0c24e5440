//! TLS connector for establishing encrypted connections.

use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::ServerCertVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector as TokioTlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::{TlsConfig, TlsVersion};
use crate::error::TlsError;
use crate::verifier::{LegacyNameVerifier, NoValidationVerifier};

/// The crypto provider used for every client configuration.
///
/// Passed explicitly so no process-wide default provider has to be installed.
#[must_use]
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

// =============================================================================
// TLS Connector
// =============================================================================

/// TLS connector for transport handles.
///
/// The connector performs the client side of the handshake over whatever
/// stream it is given; transport handles hand it a
/// [`PreloginShim`](crate::PreloginShim) so the handshake rides inside
/// pre-login packets.
pub struct TlsConnector {
    config: TlsConfig,
    inner: TokioTlsConnector,
}

impl TlsConnector {
    /// Create a new TLS connector with the given configuration.
    pub fn new(config: TlsConfig) -> Result<Self, TlsError> {
        let client_config = Self::build_client_config(&config)?;
        let inner = TokioTlsConnector::from(Arc::new(client_config));

        Ok(Self { config, inner })
    }

    /// Build the rustls client configuration.
    fn build_client_config(config: &TlsConfig) -> Result<ClientConfig, TlsError> {
        let provider = crypto_provider();
        let versions = Self::select_versions(config);
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_protocol_versions(&versions)?;

        let verifier: Arc<dyn ServerCertVerifier> = if config.validate_certificate {
            let root_store = Self::build_root_store(config)?;
            let webpki = WebPkiServerVerifier::builder_with_provider(Arc::new(root_store), provider)
                .build()
                .map_err(|e| TlsError::Configuration(format!("verifier setup failed: {e}")))?;
            Arc::new(LegacyNameVerifier::new(webpki))
        } else {
            tracing::warn!(
                "server certificate validation is DISABLED - \
                 connections are vulnerable to man-in-the-middle attacks"
            );
            Arc::new(NoValidationVerifier::new(provider))
        };

        Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth())
    }

    /// Build the root certificate store.
    fn build_root_store(config: &TlsConfig) -> Result<RootCertStore, TlsError> {
        let mut root_store = RootCertStore::empty();

        if config.root_certificates.is_empty() {
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        } else {
            for cert in &config.root_certificates {
                root_store
                    .add(cert.clone())
                    .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
            }
        }

        Ok(root_store)
    }

    /// Select TLS protocol versions based on configuration.
    fn select_versions(config: &TlsConfig) -> Vec<&'static rustls::SupportedProtocolVersion> {
        let mut versions = Vec::new();

        for version in [TlsVersion::Tls12, TlsVersion::Tls13] {
            if config.min_protocol_version <= version && config.max_protocol_version >= version {
                versions.push(version.to_rustls());
            }
        }

        if versions.is_empty() {
            versions.push(&rustls::version::TLS12);
        }

        versions
    }

    /// Perform the client handshake over `stream`.
    ///
    /// `server_name` is the host from the server spec; a configured
    /// [`TlsConfig::server_name`] overrides it.
    pub async fn connect<S>(&self, stream: S, server_name: &str) -> Result<TlsStream<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let server_name = self.config.server_name.as_deref().unwrap_or(server_name);

        let dns_name = ServerName::try_from(server_name.to_string())
            .map_err(|_| TlsError::InvalidServerName(server_name.to_string()))?;

        tracing::debug!(server_name = %server_name, "performing TLS handshake");

        let tls_stream = self
            .inner
            .connect(dns_name, stream)
            .await
            .map_err(|e| TlsError::HandshakeFailed(e.to_string()))?;

        tracing::debug!("TLS handshake completed");

        Ok(tls_stream)
    }

    /// Get the underlying configuration.
    #[must_use]
    pub fn config(&self) -> &TlsConfig {
        &self.config
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

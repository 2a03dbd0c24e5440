//! TLS configuration options.

use rustls::pki_types::CertificateDer;

/// TLS configuration for transport handles.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct TlsConfig {
    /// Whether to validate the server certificate.
    ///
    /// **Warning:** disabling validation is insecure and should only be used
    /// for development servers.
    pub validate_certificate: bool,

    /// Custom root certificates to trust.
    ///
    /// If empty, the webpki root certificates are used.
    pub root_certificates: Vec<CertificateDer<'static>>,

    /// Server hostname for certificate validation.
    ///
    /// If not set, the host from the server spec is used.
    pub server_name: Option<String>,

    /// Minimum TLS version to accept.
    pub min_protocol_version: TlsVersion,

    /// Maximum TLS version to accept.
    ///
    /// Defaults to TLS 1.2. A TLS 1.3 server keeps writing session tickets
    /// after the client has finished its handshake, and those would arrive
    /// pre-login framed after the shim switched to pass-through.
    pub max_protocol_version: TlsVersion,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            validate_certificate: true,
            root_certificates: Vec::new(),
            server_name: None,
            min_protocol_version: TlsVersion::Tls12,
            max_protocol_version: TlsVersion::Tls12,
        }
    }
}

impl TlsConfig {
    /// Create a new TLS configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable server certificate validation.
    #[must_use]
    pub fn validate_certificate(mut self, validate: bool) -> Self {
        self.validate_certificate = validate;
        self
    }

    /// Add a custom root certificate to trust.
    #[must_use]
    pub fn add_root_certificate(mut self, cert: CertificateDer<'static>) -> Self {
        self.root_certificates.push(cert);
        self
    }

    /// Set custom root certificates, replacing any existing ones.
    #[must_use]
    pub fn with_root_certificates(mut self, certs: Vec<CertificateDer<'static>>) -> Self {
        self.root_certificates = certs;
        self
    }

    /// Set the server name for certificate validation.
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Set the minimum TLS version.
    #[must_use]
    pub fn min_protocol_version(mut self, version: TlsVersion) -> Self {
        self.min_protocol_version = version;
        self
    }

    /// Set the maximum TLS version.
    #[must_use]
    pub fn max_protocol_version(mut self, version: TlsVersion) -> Self {
        self.max_protocol_version = version;
        self
    }
}

/// TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TlsVersion {
    /// TLS 1.2
    #[default]
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Convert to rustls protocol version.
    #[must_use]
    pub fn to_rustls(&self) -> &'static rustls::SupportedProtocolVersion {
        match self {
            Self::Tls12 => &rustls::version::TLS12,
            Self::Tls13 => &rustls::version::TLS13,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        let config = TlsConfig::default();
        assert!(config.validate_certificate);
        assert!(config.root_certificates.is_empty());
        assert_eq!(config.min_protocol_version, TlsVersion::Tls12);
        assert_eq!(config.max_protocol_version, TlsVersion::Tls12);
    }

    #[test]
    fn test_builder_methods() {
        let config = TlsConfig::new()
            .validate_certificate(false)
            .with_server_name("db.corp.local")
            .min_protocol_version(TlsVersion::Tls13);

        assert!(!config.validate_certificate);
        assert_eq!(config.server_name.as_deref(), Some("db.corp.local"));
        assert_eq!(config.min_protocol_version, TlsVersion::Tls13);
    }
}

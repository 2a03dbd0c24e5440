//! TLS-related error types.

use thiserror::Error;

/// Errors that can occur during TLS operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TlsError {
    /// TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    /// The target host is not a valid TLS server name.
    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    /// Invalid certificate format.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// TLS configuration error.
    #[error("TLS configuration error: {0}")]
    Configuration(String),

    /// Rustls error.
    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),
}

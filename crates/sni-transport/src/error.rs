//! Transport error types.

use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Layer that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Provider {
    /// TCP transport.
    Tcp,
    /// Named-pipe transport.
    Np,
    /// TLS layer.
    Ssl,
    /// Session multiplexer.
    Smux,
    /// Not tied to a transport (parsing, configuration).
    Invalid,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tcp => "TCP Provider",
            Self::Np => "Named Pipes Provider",
            Self::Ssl => "SSL Provider",
            Self::Smux => "SMux Provider",
            Self::Invalid => "SNI",
        };
        f.write_str(name)
    }
}

/// SNI error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SniErrorCode {
    /// Plain I/O failure without a more specific code.
    Unspecified,
    /// The peer closed the connection.
    ConnTerminated,
    /// An argument was out of range.
    InvalidParameter,
    /// The requested protocol is not available.
    ProtocolNotSupported,
    /// A receive timed out.
    ConnTimeout,
    /// The connection is no longer usable.
    ConnNotUsable,
    /// The server spec could not be parsed.
    InvalidConnString,
    /// The TLS handshake failed.
    HandshakeFailure,
    /// An internal invariant was violated.
    InternalException,
    /// The connection could not be opened.
    ConnOpenFailed,
    /// Parallel connect resolved more addresses than allowed.
    MultiSubnetTooManyAddresses,
    /// Parallel connect was requested for a non-TCP protocol.
    MultiSubnetNonTcp,
    /// The multiplexed stream carried an invalid or unexpected frame.
    MuxProtocolViolation,
}

impl SniErrorCode {
    /// Numeric SNI error code.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Unspecified | Self::MuxProtocolViolation => 0,
            Self::ConnTerminated => 2,
            Self::InvalidParameter => 5,
            Self::ProtocolNotSupported => 8,
            Self::ConnTimeout => 11,
            Self::ConnNotUsable => 19,
            Self::InvalidConnString => 25,
            Self::HandshakeFailure => 31,
            Self::InternalException => 35,
            Self::ConnOpenFailed => 40,
            Self::MultiSubnetTooManyAddresses => 47,
            Self::MultiSubnetNonTcp => 49,
        }
    }
}

/// Error returned by every transport, TLS and multiplexer operation.
///
/// Carries the provider that failed, the SNI code, the native OS error (0
/// when there is none) and a message. Raw [`io::Error`]s are kept only as
/// the source.
#[derive(Debug, Clone, Error)]
#[error("{provider}, error: {} - {message}", .code.code())]
pub struct TransportError {
    /// Layer that failed.
    pub provider: Provider,
    /// SNI error code.
    pub code: SniErrorCode,
    /// Native OS error code, 0 if none.
    pub native_error: u32,
    /// Human-readable message.
    pub message: String,
    #[source]
    source: Option<Arc<io::Error>>,
}

impl TransportError {
    /// Create an error without an underlying I/O cause.
    pub fn new(provider: Provider, code: SniErrorCode, message: impl Into<String>) -> Self {
        Self {
            provider,
            code,
            native_error: 0,
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an I/O error.
    ///
    /// Closed-connection kinds map to [`SniErrorCode::ConnTerminated`] and
    /// timeouts to [`SniErrorCode::ConnTimeout`].
    pub fn io(provider: Provider, err: io::Error) -> Self {
        let code = match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => SniErrorCode::ConnTerminated,
            io::ErrorKind::TimedOut => SniErrorCode::ConnTimeout,
            _ => SniErrorCode::Unspecified,
        };
        Self::io_with_code(provider, code, err)
    }

    /// Wrap an I/O error under an explicit code.
    pub fn io_with_code(provider: Provider, code: SniErrorCode, err: io::Error) -> Self {
        Self {
            provider,
            code,
            native_error: err
                .raw_os_error()
                .and_then(|e| u32::try_from(e).ok())
                .unwrap_or(0),
            message: err.to_string(),
            source: Some(Arc::new(err)),
        }
    }

    /// The peer closed the connection.
    pub fn terminated(provider: Provider) -> Self {
        Self::new(
            provider,
            SniErrorCode::ConnTerminated,
            "An existing connection was forcibly closed by the remote host.",
        )
    }

    /// A receive did not complete in time.
    pub fn timeout(provider: Provider) -> Self {
        Self::new(provider, SniErrorCode::ConnTimeout, "Timeout error")
    }

    /// The handle was killed or closed.
    pub fn not_usable(provider: Provider) -> Self {
        Self::new(
            provider,
            SniErrorCode::ConnNotUsable,
            "Connection was terminated.",
        )
    }

    /// Whether retrying the same request cannot succeed.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.code,
            SniErrorCode::InvalidConnString
                | SniErrorCode::InvalidParameter
                | SniErrorCode::ProtocolNotSupported
                | SniErrorCode::MultiSubnetTooManyAddresses
                | SniErrorCode::MultiSubnetNonTcp
        )
    }

    /// Check if this error is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.code == SniErrorCode::ConnTimeout
    }

    /// Check if the connection is gone.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        matches!(
            self.code,
            SniErrorCode::ConnTerminated | SniErrorCode::ConnNotUsable
        )
    }

    /// Check if the peer broke the multiplexing protocol.
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        self.code == SniErrorCode::MuxProtocolViolation
    }

    /// Get the underlying I/O error, if any.
    #[must_use]
    pub fn io_error(&self) -> Option<&io::Error> {
        self.source.as_deref()
    }
}

impl From<sni_tls::TlsError> for TransportError {
    fn from(err: sni_tls::TlsError) -> Self {
        Self::new(
            Provider::Ssl,
            SniErrorCode::HandshakeFailure,
            err.to_string(),
        )
    }
}

//! Pool error types.

use sni_transport::TransportError;
use thiserror::Error;

/// Errors that can occur during pool operations.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// No connection became available before the checkout deadline.
    #[error("timed out waiting for a pooled connection")]
    Timeout,

    /// The pool is not running (not started yet, or shutting down).
    #[error("pool is not running")]
    PoolClosed,

    /// Opening or activating a physical connection failed.
    #[error("failed to create connection: {0}")]
    Connection(#[from] TransportError),

    /// A pool invariant was violated.
    #[error("internal pool error: {0}")]
    Internal(String),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the checkout deadline passed.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

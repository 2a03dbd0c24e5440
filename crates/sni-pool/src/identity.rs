//! Pool identity.
//!
//! A pool is bound to the identity that was current when it was created.
//! Connections opened under integrated security belong to that identity, so
//! replenishment stops once the caller's identity changes.

use std::fmt;

use crate::error::PoolError;

/// The security identity a pool's connections were opened under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum PoolIdentity {
    /// No integrated identity. Matches every identity.
    #[default]
    None,
    /// A user identity.
    User {
        /// Security identifier of the user.
        sid: String,
        /// Restricted tokens cannot own pooled connections.
        restricted: bool,
        /// Network logon.
        network: bool,
    },
}

impl PoolIdentity {
    /// Create an unrestricted, non-network identity.
    pub fn user(sid: impl Into<String>) -> Self {
        Self::User {
            sid: sid.into(),
            restricted: false,
            network: false,
        }
    }

    /// Whether connections created under this identity may serve `other`.
    #[must_use]
    pub fn matches(&self, other: &PoolIdentity) -> bool {
        matches!(self, Self::None) || self == other
    }

    /// Whether this is a restricted identity.
    #[must_use]
    pub fn is_restricted(&self) -> bool {
        matches!(self, Self::User { restricted: true, .. })
    }

    /// Fails for identities that cannot own a pool.
    pub fn ensure_poolable(&self) -> Result<(), PoolError> {
        if self.is_restricted() {
            return Err(PoolError::internal(
                "cannot pool connections for a restricted identity",
            ));
        }
        Ok(())
    }
}

/// Source of the current caller identity.
pub trait IdentityProvider: Send + Sync + fmt::Debug {
    /// Identity of the current caller.
    fn current(&self) -> PoolIdentity;
}

/// Provider for pools that do not use integrated security.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIdentity;

impl IdentityProvider for NoIdentity {
    fn current(&self) -> PoolIdentity {
        PoolIdentity::None
    }
}

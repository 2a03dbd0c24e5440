//! Connection lifecycle management.
//!
//! This module defines the traits a pooled connection and its factory
//! implement, the owner token that ties a checkout to its user, and the
//! per-connection bookkeeping the pool keeps under a short lock.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;

use crate::error::PoolError;

/// Lifecycle hooks for a connection managed by the pool.
#[async_trait]
pub trait PooledObject: Send + Sync + 'static {
    /// Cheap liveness check, run on every checkout from the idle stacks.
    fn is_alive(&self) -> bool;

    /// Whether the connection may go back to the idle stacks.
    fn can_be_pooled(&self) -> bool {
        true
    }

    /// Prepare the connection for a new owner.
    async fn activate(&self) -> Result<(), PoolError> {
        Ok(())
    }

    /// Reset per-owner state before the connection is pooled again.
    async fn deactivate(&self) {}

    /// Close the physical connection.
    async fn close(&self);
}

/// Creates physical connections for a pool.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The connection type this factory produces.
    type Connection: PooledObject;

    /// Open a new connection.
    async fn create(&self) -> Result<Self::Connection, PoolError>;
}

// =============================================================================
// Owner tokens
// =============================================================================

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct OwnerId(u64);

/// Identifies the user of a checked-out connection.
///
/// The pool holds only a weak reference to the token; the checkout handle
/// holds a strong one. Once the handle and every other clone are gone
/// without the connection being returned, it is emancipated and the next
/// sweep returns it to the pool.
#[derive(Clone)]
pub struct OwnerToken {
    inner: Arc<OwnerId>,
}

impl OwnerToken {
    /// Create a fresh owner.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(OwnerId(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))),
        }
    }

    /// Numeric id, for logging.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.0
    }

    pub(crate) fn downgrade(&self) -> OwnerRef {
        OwnerRef(Arc::downgrade(&self.inner))
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnerToken").field(&self.inner.0).finish()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct OwnerRef(Weak<OwnerId>);

impl OwnerRef {
    pub(crate) fn is_gone(&self) -> bool {
        self.0.strong_count() == 0
    }
}

// =============================================================================
// Per-connection bookkeeping
// =============================================================================

/// Where a tracked connection currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created but not yet handed out or pooled.
    Creating,
    /// On the "new" idle stack.
    IdleNew,
    /// On the "old" idle stack, a candidate for pruning.
    IdleOld,
    /// Handed to an owner, or on its way back to the pool.
    CheckedOut,
}

impl ConnectionState {
    /// Check if the connection is on an idle stack.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::IdleNew | Self::IdleOld)
    }
}

/// Metadata about a pooled connection.
#[derive(Debug)]
pub(crate) struct ConnectionMetadata {
    pub(crate) state: ConnectionState,
    pub(crate) owner: Option<OwnerRef>,
    /// Bumped on every checkout and reclaim; handles carry the value they
    /// were issued with so stale returns are ignored.
    pub(crate) lease: u64,
    pub(crate) doomed: bool,
    pub(crate) checkout_count: u64,
}

impl ConnectionMetadata {
    pub(crate) fn new() -> Self {
        Self {
            state: ConnectionState::Creating,
            owner: None,
            lease: 0,
            doomed: false,
            checkout_count: 0,
        }
    }

    /// Bind to `owner` and return the new lease.
    pub(crate) fn mark_checkout(&mut self, owner: &OwnerToken) -> u64 {
        self.state = ConnectionState::CheckedOut;
        self.owner = Some(owner.downgrade());
        self.lease += 1;
        self.checkout_count += 1;
        self.lease
    }

    /// Detach from the owner ahead of deactivation.
    pub(crate) fn mark_returning(&mut self) {
        self.owner = None;
        self.lease += 1;
    }

    /// Checked out to an owner that no longer exists.
    pub(crate) fn is_emancipated(&self) -> bool {
        self.state == ConnectionState::CheckedOut
            && self.owner.as_ref().is_some_and(OwnerRef::is_gone)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_idle() {
        assert!(ConnectionState::IdleNew.is_idle());
        assert!(ConnectionState::IdleOld.is_idle());
        assert!(!ConnectionState::CheckedOut.is_idle());
        assert!(!ConnectionState::Creating.is_idle());
    }

    #[test]
    fn test_owner_tokens_are_distinct() {
        let a = OwnerToken::new();
        let b = OwnerToken::new();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn test_metadata_checkout_bumps_lease() {
        let owner = OwnerToken::new();
        let mut meta = ConnectionMetadata::new();
        assert_eq!(meta.state, ConnectionState::Creating);

        let lease = meta.mark_checkout(&owner);
        assert_eq!(lease, 1);
        assert_eq!(meta.checkout_count, 1);
        assert_eq!(meta.state, ConnectionState::CheckedOut);

        meta.mark_returning();
        assert!(meta.owner.is_none());
        assert_ne!(meta.lease, lease);
    }

    #[test]
    fn test_emancipation_follows_owner_lifetime() {
        let owner = OwnerToken::new();
        let clone = owner.clone();
        let mut meta = ConnectionMetadata::new();
        meta.mark_checkout(&owner);

        drop(owner);
        assert!(!meta.is_emancipated());
        drop(clone);
        assert!(meta.is_emancipated());

        meta.mark_returning();
        assert!(!meta.is_emancipated());
    }
}

//! # sni-driver-pool
//!
//! Connection pooling for SNI transports.
//!
//! The pool keeps physical connections open between uses, hands them to
//! owners, and takes them back when the owner releases them or disappears.
//!
//! ## Features
//!
//! - Two-generation idle stacks with periodic pruning down to the minimum size
//! - Checkout with an absolute deadline, or queued asynchronous checkout
//! - Reclaiming connections whose owner was dropped without returning them
//! - Dooming connections so they are closed instead of pooled
//! - Identity-bound pools for integrated security
//! - [`PoolGroup`] registry keyed by connection configuration
//! - [`TransportConnectionFactory`] opening TCP or named-pipe transports with
//!   optional TLS and MARS
//!
//! ## Example
//!
//! ```rust,ignore
//! use sni_driver_pool::{ConnectOptions, OwnerToken, Pool, PoolConfig, TransportConnectionFactory};
//!
//! let factory = TransportConnectionFactory::new(ConnectOptions::new("tcp:db,1433"))?;
//! let pool = Pool::new(PoolConfig::new().min_pool_size(2).max_pool_size(20), factory)?;
//! pool.startup();
//!
//! let owner = OwnerToken::new();
//! let conn = pool.checkout(&owner, None).await?;
//! conn.handle().send(Packet::from_slice(b"...")).await?;
//! conn.release().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod group;
pub mod identity;
pub mod lifecycle;
pub mod physical;
pub mod pool;

pub use config::PoolConfig;
pub use error::PoolError;
pub use group::{PoolGroup, PoolKey};
pub use identity::{IdentityProvider, NoIdentity, PoolIdentity};
pub use lifecycle::{ConnectionFactory, ConnectionState, OwnerToken, PooledObject};
pub use physical::{ConnectOptions, PhysicalConnection, TransportConnectionFactory};
pub use pool::{Checkout, PendingCheckout, Pool, PoolState, PoolStatus, PooledConnection};

//! # sni-transport
//!
//! Packet buffers and physical transport handles for the SNI layer.
//!
//! A [`TransportHandle`] is a duplex packet stream. This crate provides the
//! TCP and named-pipe implementations; `sni-mux` adds multiplexed sessions
//! behind the same trait.
//!
//! ## Features
//!
//! - [`Packet`]: reusable buffer with a read cursor and a one-shot completion
//!   callback
//! - Server spec parsing (`[tcp:|np:]host[,port|\pipe]`)
//! - TCP connect with an absolute deadline and optional parallel address
//!   racing (multi-subnet failover)
//! - Named pipes on Windows, with busy-pipe retry
//! - TLS upgrade through the pre-login shim from `sni-tls`
//! - Typed [`TransportError`]s carrying provider and SNI error codes
//!
//! ## Example
//!
//! ```rust,ignore
//! use sni_transport::{Packet, connect};
//!
//! let handle = connect("tcp:localhost,1433", None, false).await?;
//! handle.send(Packet::from_slice(b"hello")).await?;
//! let reply = handle.receive(None).await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connect;
pub mod error;
pub mod handle;
pub mod packet;
mod pipe;
pub mod server_spec;
pub mod stream;
mod tcp;

pub use connect::{connect, connect_spec};
pub use error::{Provider, SniErrorCode, TransportError};
pub use handle::{AsyncOp, Completion, CompletionSender, TransportHandle};
pub use packet::{CompletionCallback, DEFAULT_BUFFER_SIZE, Packet};
pub use server_spec::{DEFAULT_PIPE_NAME, DEFAULT_PORT, ServerSpec};
pub use stream::StreamHandle;
pub use tcp::MAX_PARALLEL_ADDRESSES;

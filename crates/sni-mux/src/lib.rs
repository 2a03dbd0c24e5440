//! # sni-mux
//!
//! Session multiplexing (MARS) over a single SNI transport handle.
//!
//! Once multiplexing is enabled on a physical connection, any number of
//! [`Session`]s share it. Each session is a full [`TransportHandle`] with
//! its own sequence numbers and credit window; frames are tagged with the
//! 16-byte header from `sni-protocol`.
//!
//! ## Features
//!
//! - SYN/DATA/ACK/FIN session lifecycle
//! - Credit flow control: sends past the peer's highwater queue in FIFO
//!   order and drain as ACKs arrive
//! - ACKs emitted once more than two consumed frames are unacknowledged
//! - Connection-wide reassembly across physical reads
//! - Fatal protocol errors broadcast to every session
//!
//! ## Example
//!
//! ```rust,ignore
//! use sni_mux::MultiplexedConnection;
//! use sni_transport::{Packet, TransportHandle};
//!
//! let handle = sni_transport::connect("tcp:db.corp.local,1433", None, false).await?;
//! let mux = MultiplexedConnection::new(handle);
//!
//! let session = mux.create_session().await?;
//! session.send(Packet::from_slice(b"batch")).await?;
//! let reply = session.receive(None).await?;
//! session.close().await?;
//! ```
//!
//! [`TransportHandle`]: sni_transport::TransportHandle

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod session;

pub use config::{ACK_THRESHOLD, INITIAL_HIGHWATER, MuxConfig};
pub use connection::MultiplexedConnection;
pub use session::Session;

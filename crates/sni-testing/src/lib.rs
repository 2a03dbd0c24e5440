//! # sni-testing
//!
//! Test infrastructure for the SNI transport, multiplexer and pool crates.
//!
//! Everything here listens on loopback and needs no database server.
//!
//! ## Features
//!
//! - [`MockSmuxPeer`]: server side of a multiplexed connection, driven frame
//!   by frame from the test body
//! - [`EchoServer`]: accepts any number of connections and echoes their
//!   bytes, optionally after a pre-login framed TLS handshake
//! - [`TestCertificate`]: self-signed certificates and matching TLS 1.2
//!   acceptors
//!
//! ## Mock Peer Example
//!
//! ```rust,ignore
//! use sni_testing::MockSmuxPeer;
//!
//! #[tokio::test]
//! async fn test_session_open() {
//!     let peer = MockSmuxPeer::bind().await.unwrap();
//!     // connect a transport to peer.server_spec() ...
//!     let mut conn = peer.accept().await.unwrap();
//!     let syn = conn.read_frame().await.unwrap();
//!     conn.send_ack(syn.header.session_id, 0, 8).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod echo;
pub mod mock_peer;
pub mod tls;

pub use echo::EchoServer;
pub use mock_peer::{MockPeerError, MockSmuxPeer, PeerConnection};
pub use tls::{TestCertificate, accept_prelogin_tls};

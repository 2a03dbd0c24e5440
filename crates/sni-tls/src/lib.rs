//! # sni-tls
//!
//! TLS negotiation layer for SNI transport handles.
//!
//! The TLS handshake does not run on the bare socket. Each handshake record
//! travels inside a pre-login packet, and only once the handshake completes
//! does the TLS stream own the wire:
//!
//! ```text
//! TCP Connect → PreLogin (cleartext) → TLS Handshake (in PreLogin packets) → TLS records
//! ```
//!
//! [`PreloginShim`] provides that framing and switches to pass-through when
//! [`PreloginShim::finish_handshake`] is called.
//!
//! ## Features
//!
//! - TLS 1.2 and TLS 1.3 support via rustls
//! - Server certificate chain validation against webpki roots or custom roots
//! - Hostname verification with the legacy short-name rule
//!   ([`certificate_name_matches`])
//! - Optional validation bypass for development servers
//!
//! ## Security
//!
//! By default, server certificates are validated using the Mozilla root
//! certificate store. Turning validation off logs a warning and should only be
//! used for development.
//!
//! ```rust,ignore
//! use sni_tls::{TlsConfig, TlsConnector, PreloginShim};
//!
//! let connector = TlsConnector::new(TlsConfig::new())?;
//! let mut tls = connector.connect(PreloginShim::new(tcp), "myserver").await?;
//! tls.get_mut().0.finish_handshake();
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connector;
pub mod error;
pub mod prelogin_shim;
pub mod verifier;

pub use config::{TlsConfig, TlsVersion};
pub use connector::{TlsConnector, crypto_provider};
pub use error::TlsError;
pub use prelogin_shim::PreloginShim;
pub use verifier::certificate_name_matches;

// Re-export tokio-rustls stream type for convenience
pub use tokio_rustls::client::TlsStream;

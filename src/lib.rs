//! dimux is a datagram security-handshake multiplexer.
//!
//! It sits between an unreliable, packet oriented transport and the
//! application, and upgrades the channel to an encrypted, authenticated
//! tunnel using a DTLS-style handshake. Handshake traffic and application
//! traffic share the same channel, told apart by a two bit header:
//!
//! ```text
//! encrypted=0                      | payload bits (plaintext channel)
//! encrypted=1 | is_handshake=1     | handshake datagram bytes
//! encrypted=1 | is_handshake=0     | ciphertext of (payload bits, 1, 0-padding)
//! ```
//!
//! Application packets are bit buffers ([`BitBuf`]) that need not be byte
//! aligned. A single termination bit appended before encryption lets the
//! receiver recover the exact bit length after byte oriented decryption.
//!
//! The crate is Sans-IO and tick driven. The [`Multiplexer`] owns a
//! [`Transport`] that it hands handshake packets to, and a
//! [`CryptoEngine`] that creates one [`Session`] per handshake. A DTLS 1.2
//! flavoured engine ships with the crate as [`DtlsEngine`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use dimux::{BitBuf, Config, DtlsEngine, Multiplexer, Role, Transport};
//!
//! struct Udp;
//!
//! impl Transport for Udp {
//!     fn send_unreliable(&mut self, _packet: BitBuf) {}
//!     fn max_outgoing_bits(&self) -> u32 {
//!         1024 * 8
//!     }
//! }
//!
//! let config = Arc::new(Config::builder().pre_shared_keys(true).build().unwrap());
//! let engine = Arc::new(DtlsEngine::new(Arc::clone(&config)));
//!
//! let mut mux = Multiplexer::new(Role::Client, config, engine, Udp);
//! mux.set_encryption_data(b"secret", &[], "").unwrap();
//! mux.enable_encryption().unwrap();
//!
//! // Drive the handshake from the host's update loop.
//! mux.tick(Duration::from_millis(16));
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![deny(missing_docs)]

#[macro_use]
extern crate log;

mod bits;
pub use bits::{BitBuf, BitReader};

mod error;
pub use error::{Error, PacketError};

mod config;
pub use config::{Config, ConfigBuilder};

pub mod certificate;

mod identity;
pub use identity::{IdentityMaterial, FINGERPRINT_LENGTH};

pub mod framing;

mod engine;
pub use engine::{CryptoEngine, HandshakeStatus, Session, Want};

mod channel;
pub use channel::ChannelState;

mod driver;

mod mux;
pub use mux::{Multiplexer, Transport};

mod rng;

mod dtls;
pub use dtls::DtlsEngine;

/// Which end of the handshake a multiplexer plays.
///
/// Fixed at construction. Decides who opens the handshake and which
/// [`IdentityMaterial`] variant is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Accepts the handshake. Presents a certificate in certificate mode.
    Server,
    /// Opens the handshake. Pins the server certificate by fingerprint.
    Client,
}

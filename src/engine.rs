//! Capability interface of the cryptographic engine.
//!
//! The multiplexer never sees cipher suites, certificates or record layouts.
//! It creates a [`Session`] through a [`CryptoEngine`], pumps its handshake,
//! shuttles opaque bytes in and out, and asks it to encrypt and decrypt
//! application payloads. [`DtlsEngine`](crate::DtlsEngine) is the built-in
//! implementation.

use std::fmt;
use std::time::Duration;

use crate::{Error, IdentityMaterial, Role};

/// Factory of sessions.
pub trait CryptoEngine: Send + Sync + fmt::Debug {
    /// Create a session for one handshake and the tunnel that follows it.
    ///
    /// `max_plaintext_size` bounds a single application plaintext, and also
    /// sizes the handshake datagrams the session produces so that they fit
    /// the same transport budget.
    fn create_session(
        &self,
        role: Role,
        max_plaintext_size: usize,
        identity: &IdentityMaterial,
    ) -> Result<Box<dyn Session>, Error>;
}

/// One live handshake/encryption context.
///
/// All calls are non-blocking. Would-block is reported through
/// [`HandshakeStatus::WouldBlock`], any `Err` from
/// [`Session::advance_handshake`] is fatal for the session.
pub trait Session: Send + fmt::Debug {
    /// Move the handshake forward. `now` is monotonic time since the owning
    /// multiplexer was created and drives the engine's retransmit timers.
    fn advance_handshake(&mut self, now: Duration) -> Result<HandshakeStatus, Error>;

    /// Whether the handshake has completed.
    fn is_handshake_complete(&self) -> bool;

    /// Take the datagrams queued for sending. Zero or more.
    fn drain_pending_output(&mut self) -> Vec<Vec<u8>>;

    /// Feed a handshake datagram from the peer. Returns bytes consumed.
    fn write_input(&mut self, data: &[u8]) -> Result<usize, Error>;

    /// Protect an application plaintext.
    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error>;

    /// Authenticate and decrypt an application ciphertext.
    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Error>;
}

/// Non-fatal outcome of [`Session::advance_handshake`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// The handshake is done.
    Complete,
    /// The handshake cannot proceed until the condition clears.
    WouldBlock(Want),
}

/// What a blocked handshake is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Want {
    /// Input from the peer.
    Read,
    /// Pending output to be drained.
    Write,
}

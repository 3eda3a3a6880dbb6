use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::channel::Channel;
use crate::framing::{self, reserved_framing_bits, WireEnvelope};
use crate::identity::IdentityStore;
use crate::{BitBuf, ChannelState, Config, CryptoEngine, Error, IdentityMaterial, PacketError};
use crate::{driver, Role};

/// The unreliable packet transport under the multiplexer.
pub trait Transport {
    /// Send a packet. Best effort, must not block.
    fn send_unreliable(&mut self, packet: BitBuf);

    /// Largest packet the transport sends, in bits.
    fn max_outgoing_bits(&self) -> u32;
}

/// Entry point: frames, encrypts and decrypts the packets of one connection.
///
/// Outgoing application packets go through [`Multiplexer::process_outgoing`]
/// and incoming packets through [`Multiplexer::process_incoming`]. Both
/// return `Ok(None)` when a packet is consumed or dropped without anything
/// for the caller. [`Multiplexer::tick`] drives the handshake.
pub struct Multiplexer<T> {
    role: Role,
    engine: Arc<dyn CryptoEngine>,
    transport: T,
    identity: IdentityStore,
    channel: Channel,
    session_limit_bits: Option<u32>,
    now: Duration,
}

impl<T: Transport> Multiplexer<T> {
    /// Create a multiplexer in `Unencrypted` state.
    pub fn new(
        role: Role,
        config: Arc<Config>,
        engine: Arc<dyn CryptoEngine>,
        transport: T,
    ) -> Self {
        Multiplexer {
            role,
            engine,
            transport,
            identity: IdentityStore::new(role, config.pre_shared_keys()),
            channel: Channel::new(role),
            session_limit_bits: None,
            now: Duration::ZERO,
        }
    }

    /// The role fixed at construction.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current channel state.
    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Set identity material from raw parts.
    ///
    /// In pre-shared key mode `key` is stored. Otherwise a server stores
    /// `cert_id` and a client stores `fingerprint`, which must be
    /// [`FINGERPRINT_LENGTH`](crate::FINGERPRINT_LENGTH) bytes. A rejected
    /// fingerprint leaves the previous material in place.
    pub fn set_encryption_data(
        &mut self,
        key: &[u8],
        fingerprint: &[u8],
        cert_id: &str,
    ) -> Result<(), Error> {
        self.identity.set_encryption_data(key, fingerprint, cert_id)
    }

    /// Set typed identity material.
    ///
    /// The variant must fit the role and key mode, else the previous material
    /// is kept.
    pub fn set_identity(&mut self, material: IdentityMaterial) -> Result<(), Error> {
        self.identity.set(material)
    }

    /// Start a handshake.
    ///
    /// On success the channel is `Handshaking`. On failure it stays
    /// `Unencrypted` and the call may be retried.
    pub fn enable_encryption(&mut self) -> Result<(), Error> {
        if self.channel.is_encryption_enabled() {
            warn!("enable_encryption while {:?}", self.channel.state());
            return Err(Error::AlreadyEnabled);
        }

        let budget = self.transport.max_outgoing_bits();
        let reserved = reserved_framing_bits();

        if budget < reserved {
            error!(
                "Transport budget {} bits below reserved {} bits",
                budget, reserved
            );
            return Err(Error::BudgetTooSmall { budget, reserved });
        }

        // Room for the payload plus its termination bit. The alignment bits
        // in the reserve keep the rounded up byte inside the budget.
        let max_packet_size = (budget - reserved + 1).div_ceil(8) as usize;

        let Some(identity) = self.identity.get() else {
            error!("enable_encryption without identity material");
            return Err(Error::MissingIdentity);
        };

        self.channel
            .enable(self.engine.as_ref(), max_packet_size, identity)?;
        self.session_limit_bits = Some(8 * max_packet_size as u32 - 1);

        Ok(())
    }

    /// Destroy the session, if any. Always safe, idempotent.
    pub fn disable_encryption(&mut self) {
        self.channel.disable();
    }

    /// Whether a session exists, i.e. `Handshaking` or `Encrypted`.
    pub fn is_encryption_enabled(&self) -> bool {
        self.channel.is_encryption_enabled()
    }

    /// Bits reserved per packet for framing and record overhead.
    pub fn reserved_framing_bits(&self) -> u32 {
        reserved_framing_bits()
    }

    /// Largest application payload that can be encrypted, in bits.
    ///
    /// Follows the transport's current budget, capped by what the live
    /// session was sized for at `enable_encryption`.
    pub fn max_payload_bits(&self) -> u32 {
        let budget = self
            .transport
            .max_outgoing_bits()
            .saturating_sub(reserved_framing_bits());

        match self.session_limit_bits {
            Some(limit) if self.channel.is_encryption_enabled() => budget.min(limit),
            _ => budget,
        }
    }

    /// Advance time and drive the handshake.
    pub fn tick(&mut self, delta: Duration) {
        self.now = self.now.saturating_add(delta);
        driver::advance(&mut self.channel, &mut self.transport, self.now);
    }

    /// Frame an outgoing application packet.
    ///
    /// Returns `Ok(None)` when the packet is dropped because the handshake is
    /// still running.
    pub fn process_outgoing(&mut self, payload: BitBuf) -> Result<Option<BitBuf>, PacketError> {
        if !self.channel.is_encryption_enabled() {
            return Ok(Some(framing::encode_plain(&payload)));
        }

        let state = self.channel.state();

        match state {
            ChannelState::Encrypted => {
                let max = self.max_payload_bits();
                if payload.len() > max as usize {
                    return Err(PacketError::TooLarge {
                        bits: payload.len(),
                        max,
                    });
                }

                let session = self
                    .channel
                    .session_mut()
                    .ok_or(PacketError::InvalidState(state))?;

                let plaintext = framing::terminate(&payload);
                let ciphertext = session.encrypt(&plaintext).map_err(|e| {
                    debug!("Encrypt failed: {}", e);
                    PacketError::Encrypt(e)
                })?;

                Ok(Some(framing::encode_encrypted(false, &ciphertext)))
            }
            ChannelState::Handshaking => {
                debug!(
                    "Dropping {} bit outgoing packet during handshake",
                    payload.len()
                );
                Ok(None)
            }
            ChannelState::Unencrypted => Err(PacketError::InvalidState(state)),
        }
    }

    /// Unframe an incoming packet.
    ///
    /// Returns the application payload, or `Ok(None)` when the packet was
    /// handshake input or dropped.
    pub fn process_incoming(&mut self, packet: BitBuf) -> Result<Option<BitBuf>, PacketError> {
        let (is_handshake, payload) = match WireEnvelope::decode(&packet)? {
            WireEnvelope::Plain(payload) => return Ok(Some(payload)),
            WireEnvelope::Encrypted {
                is_handshake,
                payload,
            } => (is_handshake, payload),
        };

        let state = self.channel.state();

        match (state, is_handshake) {
            (ChannelState::Handshaking, true) => {
                let session = self
                    .channel
                    .session_mut()
                    .ok_or(PacketError::InvalidState(state))?;

                let written = session.write_input(&payload).map_err(|e| {
                    debug!("Handshake input rejected: {}", e);
                    PacketError::InputRejected(e)
                })?;

                if written != payload.len() {
                    return Err(PacketError::InputRejected(Error::Crypto(format!(
                        "partial write {} of {} bytes",
                        written,
                        payload.len()
                    ))));
                }

                Ok(None)
            }
            (ChannelState::Handshaking, false) => {
                warn!("Dropping non-handshake packet during handshake");
                Ok(None)
            }
            (ChannelState::Encrypted, false) => {
                let session = self
                    .channel
                    .session_mut()
                    .ok_or(PacketError::InvalidState(state))?;

                let plaintext = session.decrypt(&payload).map_err(|e| {
                    debug!("Decrypt failed: {}", e);
                    PacketError::Decrypt(e)
                })?;

                framing::unterminate(plaintext).map(Some)
            }
            (ChannelState::Encrypted, true) => {
                warn!("Dropping handshake packet after completion");
                Ok(None)
            }
            (ChannelState::Unencrypted, _) => Err(PacketError::InvalidState(state)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Multiplexer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("role", &self.role)
            .field("state", &self.channel.state())
            .field("transport", &self.transport)
            .field("now", &self.now)
            .finish_non_exhaustive()
    }
}

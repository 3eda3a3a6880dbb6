//! Wire envelope encoding.
//!
//! Every packet starts with an `encrypted` bit. Encrypted packets follow it
//! with an `is_handshake` bit and whole bytes from the engine. Plaintext
//! packets carry the payload bits unchanged.
//!
//! Application payloads get a termination bit appended before encryption.
//! The encryption primitive works on bytes, so the plaintext is padded with
//! zero bits to the next byte boundary. After decryption the highest set bit
//! of the last byte marks where the payload ended.

use crate::{BitBuf, PacketError};

/// Cipher block padding allowance per record, in bytes.
pub const BLOCK_PADDING_BYTES: u32 = 16;

/// Length of a DTLS record header.
pub const HANDSHAKE_RECORD_HEADER_LEN: u32 = 13;

/// Length of a DTLS handshake message header.
pub const HANDSHAKE_MESSAGE_HEADER_LEN: u32 = 12;

// encrypted + is_handshake + termination
const FLAG_BITS: u32 = 3;

// Termination bit rounded up to the next byte.
const ALIGNMENT_BITS: u32 = 7;

/// Bits the multiplexer adds on top of an application payload, worst case.
///
/// Subtract this from the transport's outgoing budget before sizing any
/// plaintext.
pub const fn reserved_framing_bits() -> u32 {
    let header = if HANDSHAKE_RECORD_HEADER_LEN > HANDSHAKE_MESSAGE_HEADER_LEN {
        HANDSHAKE_RECORD_HEADER_LEN
    } else {
        HANDSHAKE_MESSAGE_HEADER_LEN
    };

    FLAG_BITS + ALIGNMENT_BITS + 8 * BLOCK_PADDING_BYTES + 8 * header
}

/// A decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEnvelope {
    /// `encrypted=0`. The payload bits as sent.
    Plain(BitBuf),
    /// `encrypted=1`. Whole bytes for the engine.
    Encrypted {
        /// Handshake datagram rather than application ciphertext.
        is_handshake: bool,
        /// Bytes following the two header bits.
        payload: Vec<u8>,
    },
}

impl WireEnvelope {
    /// Whether the `encrypted` bit is set.
    pub fn is_encrypted(&self) -> bool {
        matches!(self, WireEnvelope::Encrypted { .. })
    }

    /// Decode the header bits of an incoming packet.
    ///
    /// Bits after the last whole byte of an encrypted packet are ignored.
    pub fn decode(packet: &BitBuf) -> Result<Self, PacketError> {
        let mut r = packet.reader();

        let encrypted = r.read_bit().ok_or(PacketError::Malformed("empty packet"))?;

        if !encrypted {
            return Ok(WireEnvelope::Plain(r.read_rest()));
        }

        let is_handshake = r
            .read_bit()
            .ok_or(PacketError::Malformed("missing handshake bit"))?;

        let payload = r.read_whole_bytes();

        if payload.is_empty() {
            return Err(PacketError::Malformed("encrypted packet without payload"));
        }

        Ok(WireEnvelope::Encrypted {
            is_handshake,
            payload,
        })
    }

    /// Encode the envelope for the wire.
    pub fn encode(&self) -> BitBuf {
        match self {
            WireEnvelope::Plain(payload) => encode_plain(payload),
            WireEnvelope::Encrypted {
                is_handshake,
                payload,
            } => encode_encrypted(*is_handshake, payload),
        }
    }
}

/// Frame a payload for the plaintext channel.
pub fn encode_plain(payload: &BitBuf) -> BitBuf {
    let mut out = BitBuf::with_capacity(1 + payload.len());
    out.push(false);
    out.extend_from_bitbuf(payload);
    out
}

/// Frame engine output: handshake datagram or application ciphertext.
pub fn encode_encrypted(is_handshake: bool, payload: &[u8]) -> BitBuf {
    let mut out = BitBuf::with_capacity(2 + payload.len() * 8);
    out.push(true);
    out.push(is_handshake);
    out.extend_from_bytes(payload);
    out
}

/// Append the termination bit and pad to whole bytes.
pub fn terminate(payload: &BitBuf) -> Vec<u8> {
    let mut out = payload.clone();
    out.push(true);
    // Unused high bits are zero, which is the padding.
    out.into_bytes()
}

/// Strip padding and the termination bit from decrypted bytes.
pub fn unterminate(plaintext: Vec<u8>) -> Result<BitBuf, PacketError> {
    let last = *plaintext.last().ok_or(PacketError::MissingTerminationBit)?;

    if last == 0 {
        return Err(PacketError::MissingTerminationBit);
    }

    let zeros = last.leading_zeros() as usize;
    let bits = plaintext.len() * 8 - 1 - zeros;

    // from_bits drops the marker along with the padding.
    Ok(BitBuf::from_bits(plaintext, bits))
}

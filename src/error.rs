use thiserror::Error;

use crate::ChannelState;

/// Errors from configuration, session management and the handshake.
///
/// None of these are raised for a single bad datagram once a tunnel is up,
/// those are reported as [`PacketError`].
#[derive(Debug, Error)]
pub enum Error {
    /// A peer fingerprint did not have the fixed length.
    #[error("Fingerprint must be {expected} bytes, got {actual}")]
    FingerprintLength {
        /// Required length.
        expected: usize,
        /// Length that was offered.
        actual: usize,
    },

    /// Identity material of a kind that does not fit the role or key mode.
    #[error("Identity material {0} does not fit this role or key mode")]
    IdentityMismatch(&'static str),

    /// `enable_encryption` without identity material.
    #[error("No identity material set")]
    MissingIdentity,

    /// `enable_encryption` while a session is already live.
    #[error("Encryption is already enabled")]
    AlreadyEnabled,

    /// The transport budget cannot even hold the reserved framing bits.
    #[error("Transport budget of {budget} bits is below the {reserved} reserved bits")]
    BudgetTooSmall {
        /// Bits the transport offers per packet.
        budget: u32,
        /// Bits reserved for framing and record overhead.
        reserved: u32,
    },

    /// Invalid configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// No certificate registered under the id.
    #[error("Unknown certificate id: {0}")]
    UnknownCertificate(String),

    /// Certificate could not be generated or loaded.
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Malformed record or handshake message.
    #[error("Parse error: {0:?}")]
    Parse(nom::error::ErrorKind),

    /// Record or handshake message cut short.
    #[error("Parse incomplete")]
    ParseIncomplete,

    /// Handshake message that is not legal in the current handshake state.
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    /// Failure in a cryptographic primitive.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Peer failed authentication (Finished, signature or fingerprint).
    #[error("Security error: {0}")]
    Security(String),

    /// The handshake did not complete in time.
    #[error("Handshake timed out")]
    Timeout,

    /// Record protection requested before the handshake completed.
    #[error("Handshake not complete")]
    HandshakeIncomplete,

    /// Duplicated or too old application record.
    #[error("Replayed or stale record {0}")]
    Replay(u64),

    /// Plaintext larger than the session limit.
    #[error("Plaintext of {size} bytes exceeds the {max} byte limit")]
    TooLarge {
        /// Offered plaintext size.
        size: usize,
        /// Session limit.
        max: usize,
    },
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for Error {
    fn from(value: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        match value {
            nom::Err::Incomplete(_) => Error::ParseIncomplete,
            nom::Err::Error(x) => Error::Parse(x.code),
            nom::Err::Failure(x) => Error::Parse(x.code),
        }
    }
}

/// Errors for a single packet.
///
/// The packet is discarded. The channel state is never changed by these.
#[derive(Debug, Error)]
pub enum PacketError {
    /// The wire envelope could not be decoded.
    #[error("Malformed frame: {0}")]
    Malformed(&'static str),

    /// The decrypted payload has no termination bit in its last byte.
    #[error("Missing termination bit")]
    MissingTerminationBit,

    /// Outgoing payload larger than the transport budget allows.
    #[error("Payload of {bits} bits exceeds the {max} bit budget")]
    TooLarge {
        /// Payload length.
        bits: usize,
        /// Largest payload that fits.
        max: u32,
    },

    /// The engine failed to encrypt the payload.
    #[error("Encrypt failed: {0}")]
    Encrypt(#[source] Error),

    /// The engine failed to decrypt or authenticate the payload.
    #[error("Decrypt failed: {0}")]
    Decrypt(#[source] Error),

    /// The engine refused handshake input.
    #[error("Handshake input rejected: {0}")]
    InputRejected(#[source] Error),

    /// Packet cannot be handled in the current channel state.
    #[error("Invalid channel state {0:?}")]
    InvalidState(ChannelState),
}

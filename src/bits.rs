//! Bit granular packet buffers.
//!
//! Packets crossing the public API are [`BitBuf`]s: a byte vector plus the
//! exact number of bits in use. Bits are packed least significant bit first
//! within each byte, so bit `i` lives in `bytes[i / 8]` at `1 << (i % 8)`.
//! The unused high bits of the last byte are always zero.

use std::fmt;

/// Owned buffer of an exact number of bits.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct BitBuf {
    bytes: Vec<u8>,
    bits: usize,
}

impl BitBuf {
    /// Create a new empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer with room for `bits` bits.
    pub fn with_capacity(bits: usize) -> Self {
        BitBuf {
            bytes: Vec::with_capacity(bits.div_ceil(8)),
            bits: 0,
        }
    }

    /// Create a byte aligned buffer from a slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// Create a byte aligned buffer taking ownership of the bytes.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let bits = bytes.len() * 8;
        BitBuf { bytes, bits }
    }

    /// Create a buffer of the first `bits` bits of `bytes`.
    ///
    /// `bits` is clamped to the bits available. Bits past the end are
    /// cleared.
    pub fn from_bits(mut bytes: Vec<u8>, bits: usize) -> Self {
        let bits = bits.min(bytes.len() * 8);
        bytes.truncate(bits.div_ceil(8));
        let mut buf = BitBuf { bytes, bits };
        buf.clear_tail();
        buf
    }

    /// Number of bits in the buffer.
    pub fn len(&self) -> usize {
        self.bits
    }

    /// Whether the buffer holds no bits.
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Number of bytes needed to hold the bits.
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// The packed bytes. The last byte may be partially used.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Convert the buffer into the packed bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Read the bit at `index`.
    pub fn get(&self, index: usize) -> Option<bool> {
        if index >= self.bits {
            return None;
        }
        Some(self.bytes[index / 8] & (1 << (index % 8)) != 0)
    }

    /// Append a single bit.
    pub fn push(&mut self, bit: bool) {
        let shift = self.bits % 8;
        if shift == 0 {
            self.bytes.push(0);
        }
        if bit {
            // The byte exists, it was pushed above or is partially used.
            let last = self.bytes.len() - 1;
            self.bytes[last] |= 1 << shift;
        }
        self.bits += 1;
    }

    /// Append whole bytes, regardless of the current bit alignment.
    pub fn extend_from_bytes(&mut self, data: &[u8]) {
        let shift = self.bits % 8;

        if shift == 0 {
            self.bytes.extend_from_slice(data);
        } else {
            self.bytes.reserve(data.len());
            for &byte in data {
                // Non-zero shift means there is a partially used last byte.
                let last = self.bytes.len() - 1;
                self.bytes[last] |= byte << shift;
                self.bytes.push(byte >> (8 - shift));
            }
        }

        self.bits += data.len() * 8;
    }

    /// Append all bits of another buffer.
    pub fn extend_from_bitbuf(&mut self, other: &BitBuf) {
        let whole = other.bits / 8;
        self.extend_from_bytes(&other.bytes[..whole]);
        for index in whole * 8..other.bits {
            // index < other.bits
            let bit = other.bytes[index / 8] & (1 << (index % 8)) != 0;
            self.push(bit);
        }
    }

    /// Sequential reader over the bits.
    pub fn reader(&self) -> BitReader<'_> {
        BitReader { buf: self, pos: 0 }
    }

    fn clear_tail(&mut self) {
        let used = self.bits % 8;
        if used != 0 {
            if let Some(last) = self.bytes.last_mut() {
                *last &= (1u8 << used) - 1;
            }
        }
    }
}

impl fmt::Debug for BitBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitBuf").field("bits", &self.bits).finish()
    }
}

impl From<Vec<u8>> for BitBuf {
    fn from(value: Vec<u8>) -> Self {
        BitBuf::from_vec(value)
    }
}

impl From<&[u8]> for BitBuf {
    fn from(value: &[u8]) -> Self {
        BitBuf::from_bytes(value)
    }
}

/// Reads a [`BitBuf`] front to back.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    buf: &'a BitBuf,
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// Bits not yet read.
    pub fn remaining(&self) -> usize {
        self.buf.bits - self.pos
    }

    /// Read one bit.
    pub fn read_bit(&mut self) -> Option<bool> {
        let bit = self.buf.get(self.pos)?;
        self.pos += 1;
        Some(bit)
    }

    /// Read eight bits as a byte.
    pub fn read_byte(&mut self) -> Option<u8> {
        if self.remaining() < 8 {
            return None;
        }

        let index = self.pos / 8;
        let shift = self.pos % 8;
        let bytes = &self.buf.bytes;

        let byte = if shift == 0 {
            bytes[index]
        } else {
            // Eight bits remain, so an unaligned read spans two bytes.
            (bytes[index] >> shift) | (bytes[index + 1] << (8 - shift))
        };

        self.pos += 8;
        Some(byte)
    }

    /// Read as many whole bytes as remain. Trailing bits are left unread.
    pub fn read_whole_bytes(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.remaining() / 8);
        while let Some(byte) = self.read_byte() {
            out.push(byte);
        }
        out
    }

    /// Read everything that remains, bit exact.
    pub fn read_rest(&mut self) -> BitBuf {
        let mut out = BitBuf::with_capacity(self.remaining());
        let whole = self.read_whole_bytes();
        out.extend_from_bytes(&whole);
        while let Some(bit) = self.read_bit() {
            out.push(bit);
        }
        out
    }
}

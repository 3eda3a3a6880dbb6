//! Handshake message headers, fragmentation and reassembly.

use std::collections::BTreeMap;

use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::IResult;

use super::HANDSHAKE_HEADER_LEN;
use crate::Error;

/// Largest handshake message accepted from a peer.
const MAX_MESSAGE_LEN: u32 = 16 * 1024;

/// How far ahead of the next expected message we buffer.
const MAX_MESSAGES_AHEAD: u16 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageType {
    #[default]
    ClientHello,
    ServerHello,
    Certificate,
    CertificateVerify,
    Finished,
    Unknown(u8),
}

impl MessageType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => MessageType::ClientHello,
            2 => MessageType::ServerHello,
            11 => MessageType::Certificate,
            15 => MessageType::CertificateVerify,
            20 => MessageType::Finished,
            _ => MessageType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            MessageType::ClientHello => 1,
            MessageType::ServerHello => 2,
            MessageType::Certificate => 11,
            MessageType::CertificateVerify => 15,
            MessageType::Finished => 20,
            MessageType::Unknown(value) => *value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub msg_type: MessageType,
    pub length: u32,
    pub message_seq: u16,
    pub fragment_offset: u32,
    pub fragment_length: u32,
}

impl Header {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Header> {
        let (input, msg_type) = be_u8(input)?;
        let (input, length) = be_u24(input)?;
        let (input, message_seq) = be_u16(input)?;
        let (input, fragment_offset) = be_u24(input)?;
        let (input, fragment_length) = be_u24(input)?;

        Ok((
            input,
            Header {
                msg_type: MessageType::from_u8(msg_type),
                length,
                message_seq,
                fragment_offset,
                fragment_length,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.msg_type.as_u8());
        output.extend_from_slice(&self.length.to_be_bytes()[1..]);
        output.extend_from_slice(&self.message_seq.to_be_bytes());
        output.extend_from_slice(&self.fragment_offset.to_be_bytes()[1..]);
        output.extend_from_slice(&self.fragment_length.to_be_bytes()[1..]);
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Fragment<'a> {
    pub header: Header,
    pub body: &'a [u8],
}

impl<'a> Fragment<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Fragment<'a>> {
        let (input, header) = Header::parse(input)?;
        let (input, body) = take(header.fragment_length as usize)(input)?;
        Ok((input, Fragment { header, body }))
    }
}

/// A complete message as it enters the transcript: header with offset 0
/// and fragment length equal to the message length, then the body.
pub fn transcript_bytes(msg_type: MessageType, message_seq: u16, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HANDSHAKE_HEADER_LEN + body.len());
    Header {
        msg_type,
        length: body.len() as u32,
        message_seq,
        fragment_offset: 0,
        fragment_length: body.len() as u32,
    }
    .serialize(&mut out);
    out.extend_from_slice(body);
    out
}

/// Split a message into serialized fragments whose bodies are at most
/// `max_body` bytes. Always yields at least one fragment.
pub fn fragment(
    msg_type: MessageType,
    message_seq: u16,
    body: &[u8],
    max_body: usize,
) -> Vec<Vec<u8>> {
    let max_body = max_body.max(1);
    let length = body.len() as u32;

    let mut chunks: Vec<(usize, &[u8])> = body
        .chunks(max_body)
        .enumerate()
        .map(|(i, c)| (i * max_body, c))
        .collect();

    if chunks.is_empty() {
        chunks.push((0, &body[..0]));
    }

    chunks
        .into_iter()
        .map(|(offset, chunk)| {
            let mut out = Vec::with_capacity(HANDSHAKE_HEADER_LEN + chunk.len());
            Header {
                msg_type,
                length,
                message_seq,
                fragment_offset: offset as u32,
                fragment_length: chunk.len() as u32,
            }
            .serialize(&mut out);
            out.extend_from_slice(chunk);
            out
        })
        .collect()
}

/// Outcome of offering a fragment to the [`Reassembler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// Belongs to a message already processed. The peer is retransmitting.
    Old,
    /// Buffered, possibly completing a message.
    Accepted,
    /// Too far ahead, dropped.
    Ignored,
}

#[derive(Debug)]
struct Partial {
    msg_type: MessageType,
    data: Vec<u8>,
    // Sorted, non-overlapping, non-adjacent [start, end) ranges received.
    ranges: Vec<(u32, u32)>,
}

impl Partial {
    fn new(msg_type: MessageType, length: u32) -> Self {
        Partial {
            msg_type,
            data: vec![0; length as usize],
            ranges: Vec::new(),
        }
    }

    fn add(&mut self, offset: u32, body: &[u8]) {
        let start = offset as usize;
        self.data[start..start + body.len()].copy_from_slice(body);

        if body.is_empty() {
            return;
        }

        let mut start = offset;
        let mut end = offset + body.len() as u32;

        // Merge every range touching [start, end).
        self.ranges.retain(|&(s, e)| {
            if e < start || s > end {
                true
            } else {
                start = start.min(s);
                end = end.max(e);
                false
            }
        });

        let pos = self.ranges.partition_point(|&(s, _)| s < start);
        self.ranges.insert(pos, (start, end));
    }

    fn is_complete(&self) -> bool {
        let length = self.data.len() as u32;
        length == 0 || self.ranges.first() == Some(&(0, length))
    }
}

/// Collects fragments per `message_seq` until messages are whole.
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: BTreeMap<u16, Partial>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, fragment: &Fragment, next_seq: u16) -> Result<Insertion, Error> {
        let h = &fragment.header;

        if h.message_seq < next_seq {
            return Ok(Insertion::Old);
        }

        if h.message_seq - next_seq >= MAX_MESSAGES_AHEAD {
            trace!("Ignore message_seq {} far ahead of {}", h.message_seq, next_seq);
            return Ok(Insertion::Ignored);
        }

        if h.length > MAX_MESSAGE_LEN {
            return Err(Error::TooLarge {
                size: h.length as usize,
                max: MAX_MESSAGE_LEN as usize,
            });
        }

        let end = h.fragment_offset as u64 + h.fragment_length as u64;
        if end > h.length as u64 {
            return Err(Error::UnexpectedMessage(format!(
                "fragment {}..{} beyond length {}",
                h.fragment_offset, end, h.length
            )));
        }

        let partial = self
            .pending
            .entry(h.message_seq)
            .or_insert_with(|| Partial::new(h.msg_type, h.length));

        if partial.msg_type != h.msg_type || partial.data.len() != h.length as usize {
            return Err(Error::UnexpectedMessage(format!(
                "fragment of message_seq {} disagrees on type or length",
                h.message_seq
            )));
        }

        partial.add(h.fragment_offset, fragment.body);

        Ok(Insertion::Accepted)
    }

    /// Take message `seq` if all its bytes have arrived.
    pub fn pop(&mut self, seq: u16) -> Option<(MessageType, Vec<u8>)> {
        if !self.pending.get(&seq)?.is_complete() {
            return None;
        }

        self.pending
            .remove(&seq)
            .map(|partial| (partial.msg_type, partial.data))
    }
}

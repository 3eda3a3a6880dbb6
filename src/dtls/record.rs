use nom::bytes::complete::take;
use nom::combinator::map;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use super::{DTLS_VERSION, RECORD_HEADER_LEN};
use crate::Error;

/// Largest sequence number a record can carry (48 bits).
pub const MAX_SEQUENCE: u64 = (1 << 48) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentType {
    Alert,
    #[default]
    Handshake,
    ApplicationData,
    Unknown(u8),
}

impl ContentType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            _ => ContentType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
            ContentType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ContentType> {
        let (input, byte) = be_u8(input)?;
        Ok((input, Self::from_u8(byte)))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Record<'a> {
    pub content_type: ContentType,
    pub version: u16,
    pub epoch: u16,
    pub sequence_number: u64,
    pub fragment: &'a [u8],
}

impl<'a> Record<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Record<'a>> {
        let (input, content_type) = ContentType::parse(input)?;
        let (input, version) = be_u16(input)?;
        let (input, epoch) = be_u16(input)?;
        let (input, sequence_number) = be_u48(input)?;
        let (input, length) = be_u16(input)?;
        let (input, fragment) = take(length as usize)(input)?;

        Ok((
            input,
            Record {
                content_type,
                version,
                epoch,
                sequence_number,
                fragment,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        write_header(
            self.content_type,
            self.epoch,
            self.sequence_number,
            self.fragment.len(),
            output,
        );
        output.extend_from_slice(self.fragment);
    }
}

/// Write a record header for a fragment of `length` bytes.
pub fn write_header(
    content_type: ContentType,
    epoch: u16,
    sequence_number: u64,
    length: usize,
    output: &mut Vec<u8>,
) {
    output.push(content_type.as_u8());
    output.extend_from_slice(&DTLS_VERSION.to_be_bytes());
    output.extend_from_slice(&epoch.to_be_bytes());
    output.extend_from_slice(&sequence_number.to_be_bytes()[2..]);
    output.extend_from_slice(&(length as u16).to_be_bytes());
}

/// Split a datagram into its records.
pub fn parse_datagram(mut input: &[u8]) -> Result<Vec<Record<'_>>, Error> {
    let mut records = Vec::new();

    while !input.is_empty() {
        if input.len() < RECORD_HEADER_LEN {
            return Err(Error::ParseIncomplete);
        }

        let (rest, record) = Record::parse(input)?;

        if record.version != DTLS_VERSION {
            return Err(Error::UnexpectedMessage(format!(
                "record version {:#06x}",
                record.version
            )));
        }

        records.push(record);
        input = rest;
    }

    Ok(records)
}

fn be_u48(input: &[u8]) -> IResult<&[u8], u64> {
    map(take(6_usize), |b: &[u8]| {
        b.iter().fold(0_u64, |acc, x| (acc << 8) | *x as u64)
    })(input)
}

//! Handshake message bodies.

use nom::bytes::complete::take;
use nom::combinator::{all_consuming, map_res};
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::IResult;

use super::keys::{KEY_SHARE_LEN, RANDOM_LEN, VERIFY_DATA_LEN};
use super::DTLS_VERSION;
use crate::Error;

/// How the server authenticates itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    PreSharedKey,
    Certificate,
}

impl Mode {
    pub fn as_u8(&self) -> u8 {
        match self {
            Mode::PreSharedKey => 1,
            Mode::Certificate => 2,
        }
    }

    fn parse(input: &[u8]) -> IResult<&[u8], Mode> {
        map_res(be_u8, |b| match b {
            1 => Ok(Mode::PreSharedKey),
            2 => Ok(Mode::Certificate),
            _ => Err(()),
        })(input)
    }
}

/// ClientHello and ServerHello share one layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub version: u16,
    pub random: [u8; RANDOM_LEN],
    pub mode: Mode,
    pub key_share: [u8; KEY_SHARE_LEN],
}

impl Hello {
    pub fn new(random: [u8; RANDOM_LEN], mode: Mode, key_share: [u8; KEY_SHARE_LEN]) -> Self {
        Hello {
            version: DTLS_VERSION,
            random,
            mode,
            key_share,
        }
    }

    pub fn parse(input: &[u8]) -> Result<Hello, Error> {
        let (_, hello) = all_consuming(Self::parse_inner)(input)?;

        if hello.version != DTLS_VERSION {
            return Err(Error::UnexpectedMessage(format!(
                "hello version {:#06x}",
                hello.version
            )));
        }

        Ok(hello)
    }

    fn parse_inner(input: &[u8]) -> IResult<&[u8], Hello> {
        let (input, version) = be_u16(input)?;
        let (input, random) = array::<RANDOM_LEN>(input)?;
        let (input, mode) = Mode::parse(input)?;
        let (input, share_len) = be_u8(input)?;
        let (input, share) = take(share_len as usize)(input)?;

        let key_share = share.try_into().map_err(|_| {
            nom::Err::Failure(nom::error::Error::new(
                share,
                nom::error::ErrorKind::LengthValue,
            ))
        })?;

        Ok((
            input,
            Hello {
                version,
                random,
                mode,
                key_share,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.version.to_be_bytes());
        output.extend_from_slice(&self.random);
        output.push(self.mode.as_u8());
        output.push(KEY_SHARE_LEN as u8);
        output.extend_from_slice(&self.key_share);
    }
}

/// A single DER certificate with a 24 bit length prefix.
pub fn parse_certificate(input: &[u8]) -> Result<&[u8], Error> {
    fn inner(input: &[u8]) -> IResult<&[u8], &[u8]> {
        let (input, len) = be_u24(input)?;
        take(len as usize)(input)
    }

    let (_, der) = all_consuming(inner)(input)?;
    if der.is_empty() {
        return Err(Error::UnexpectedMessage("empty certificate".into()));
    }
    Ok(der)
}

pub fn serialize_certificate(der: &[u8], output: &mut Vec<u8>) {
    output.extend_from_slice(&(der.len() as u32).to_be_bytes()[1..]);
    output.extend_from_slice(der);
}

/// A DER ECDSA signature with a 16 bit length prefix.
pub fn parse_certificate_verify(input: &[u8]) -> Result<&[u8], Error> {
    fn inner(input: &[u8]) -> IResult<&[u8], &[u8]> {
        let (input, len) = be_u16(input)?;
        take(len as usize)(input)
    }

    let (_, signature) = all_consuming(inner)(input)?;
    Ok(signature)
}

pub fn serialize_certificate_verify(signature: &[u8], output: &mut Vec<u8>) {
    output.extend_from_slice(&(signature.len() as u16).to_be_bytes());
    output.extend_from_slice(signature);
}

pub fn parse_finished(input: &[u8]) -> Result<[u8; VERIFY_DATA_LEN], Error> {
    let (_, verify_data) = all_consuming(array::<VERIFY_DATA_LEN>)(input)?;
    Ok(verify_data)
}

fn array<const N: usize>(input: &[u8]) -> IResult<&[u8], [u8; N]> {
    let (input, bytes) = take(N)(input)?;
    let mut out = [0; N];
    out.copy_from_slice(bytes);
    Ok((input, out))
}

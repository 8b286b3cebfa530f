//! Record and handshake framing.
//!
//! A record is `content_type(1) || version(2) || length(2) || fragment`. A handshake message is
//! `type(1) || length || body`, where the length is 3 bytes ([LengthWidth::Standard]) or a zero
//! byte followed by 2 bytes ([LengthWidth::Legacy]). Both widths produce the same bytes for bodies
//! shorter than 2^16, so received messages are always parsed with the 3-byte length.
//!
//! Both headers (and [HandshakeMessage]) implement the [commonware_codec] traits. The width of a
//! handshake length is the [Read::Cfg] of a [HandshakeMessage].

use crate::{
    codec::{decode_u16, decode_u24, encode_u16, encode_u24, read_bytes, read_u24, U16_MAX},
    suite::ProtocolVersion,
    Error,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use commonware_codec::{EncodeSize, Error as CodecError, FixedSize, Read, ReadExt, Write};

/// Length of a record header.
pub const RECORD_HEADER_LENGTH: usize = 5;

/// Length of a handshake message header.
pub const HANDSHAKE_HEADER_LENGTH: usize = 4;

/// A `ChangeCipherSpec` record, sent only for middlebox compatibility.
pub const CHANGE_CIPHER_SPEC: [u8; 6] = [0x14, 0x03, 0x03, 0x00, 0x01, 0x01];

/// Type of a record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    ChangeCipherSpec,
    Alert,
    Handshake,
    ApplicationData,
    Unknown(u8),
}

impl From<u8> for ContentType {
    fn from(value: u8) -> Self {
        match value {
            20 => Self::ChangeCipherSpec,
            21 => Self::Alert,
            22 => Self::Handshake,
            23 => Self::ApplicationData,
            other => Self::Unknown(other),
        }
    }
}

impl From<ContentType> for u8 {
    fn from(value: ContentType) -> Self {
        match value {
            ContentType::ChangeCipherSpec => 20,
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
            ContentType::Unknown(other) => other,
        }
    }
}

/// Type of a handshake message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HandshakeType {
    ClientHello,
    ServerHello,
    NewSessionTicket,
    EncryptedExtensions,
    Certificate,
    CertificateRequest,
    CertificateVerify,
    Finished,
    KeyUpdate,
    Unknown(u8),
}

impl From<u8> for HandshakeType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::ClientHello,
            2 => Self::ServerHello,
            4 => Self::NewSessionTicket,
            8 => Self::EncryptedExtensions,
            11 => Self::Certificate,
            13 => Self::CertificateRequest,
            15 => Self::CertificateVerify,
            20 => Self::Finished,
            24 => Self::KeyUpdate,
            other => Self::Unknown(other),
        }
    }
}

impl From<HandshakeType> for u8 {
    fn from(value: HandshakeType) -> Self {
        match value {
            HandshakeType::ClientHello => 1,
            HandshakeType::ServerHello => 2,
            HandshakeType::NewSessionTicket => 4,
            HandshakeType::EncryptedExtensions => 8,
            HandshakeType::Certificate => 11,
            HandshakeType::CertificateRequest => 13,
            HandshakeType::CertificateVerify => 15,
            HandshakeType::Finished => 20,
            HandshakeType::KeyUpdate => 24,
            HandshakeType::Unknown(other) => other,
        }
    }
}

/// Width of the length field in the header of an outgoing handshake message.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LengthWidth {
    /// 3-byte big-endian length.
    #[default]
    Standard,
    /// A zero byte followed by a 2-byte big-endian length. Bodies of 2^16 bytes or more cannot be
    /// represented.
    Legacy,
}

/// The header of a record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RecordHeader {
    pub content_type: ContentType,
    pub version: u16,
    pub length: u16,
}

impl RecordHeader {
    /// Create a header for a fragment of `length` bytes.
    pub fn new(
        content_type: ContentType,
        version: ProtocolVersion,
        length: usize,
    ) -> Result<Self, Error> {
        Ok(Self {
            content_type,
            version: version.code(),
            length: decode_u16(encode_u16("record", length)?),
        })
    }
}

impl FixedSize for RecordHeader {
    const SIZE: usize = RECORD_HEADER_LENGTH;
}

impl Write for RecordHeader {
    fn write(&self, buf: &mut impl BufMut) {
        u8::from(self.content_type).write(buf);
        self.version.write(buf);
        self.length.write(buf);
    }
}

impl Read for RecordHeader {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let content_type = ContentType::from(u8::read(buf)?);
        let version = u16::read(buf)?;
        let length = u16::read(buf)?;
        Ok(Self {
            content_type,
            version,
            length,
        })
    }
}

/// Frame `fragment` as a single record.
pub fn encode_record(
    content_type: ContentType,
    version: ProtocolVersion,
    fragment: &[u8],
) -> Result<Bytes, Error> {
    let header = RecordHeader::new(content_type, version, fragment.len())?;
    let mut buf = BytesMut::with_capacity(RECORD_HEADER_LENGTH + fragment.len());
    header.write(&mut buf);
    buf.put_slice(fragment);
    Ok(buf.freeze())
}

/// Split the first complete record off the front of `buf`.
///
/// Returns `None` if `buf` does not yet hold a complete record.
pub fn next_record(buf: &mut BytesMut) -> Option<(RecordHeader, Bytes)> {
    let header = RecordHeader::read(&mut buf.get(..RECORD_HEADER_LENGTH)?).ok()?;
    let total = RECORD_HEADER_LENGTH + header.length as usize;
    if buf.len() < total {
        return None;
    }
    let mut record = buf.split_to(total);
    let fragment = record.split_off(RECORD_HEADER_LENGTH).freeze();
    Some((header, fragment))
}

/// A handshake message.
///
/// The body always fits the length field of the message's [LengthWidth].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HandshakeMessage {
    typ: HandshakeType,
    body: Bytes,
    width: LengthWidth,
}

impl HandshakeMessage {
    /// Create a message whose header carries a length field of the given width.
    pub fn new(
        typ: HandshakeType,
        body: impl Into<Bytes>,
        width: LengthWidth,
    ) -> Result<Self, Error> {
        let body = body.into();
        match width {
            LengthWidth::Standard => {
                encode_u24("handshake", body.len())?;
            }
            LengthWidth::Legacy => {
                encode_u16("handshake", body.len())?;
            }
        }
        Ok(Self { typ, body, width })
    }

    pub fn typ(&self) -> HandshakeType {
        self.typ
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn width(&self) -> LengthWidth {
        self.width
    }
}

impl Write for HandshakeMessage {
    fn write(&self, buf: &mut impl BufMut) {
        u8::from(self.typ).write(buf);
        let [_, a, b, c] = (self.body.len() as u32).to_be_bytes();
        buf.put_slice(&[a, b, c]);
        buf.put_slice(&self.body);
    }
}

impl EncodeSize for HandshakeMessage {
    fn encode_size(&self) -> usize {
        HANDSHAKE_HEADER_LENGTH + self.body.len()
    }
}

impl Read for HandshakeMessage {
    type Cfg = LengthWidth;

    fn read_cfg(buf: &mut impl Buf, width: &LengthWidth) -> Result<Self, CodecError> {
        let typ = HandshakeType::from(u8::read(buf)?);
        let len = match width {
            LengthWidth::Standard => read_u24(buf)?,
            LengthWidth::Legacy => {
                if u8::read(buf)? != 0 {
                    return Err(CodecError::Invalid("HandshakeMessage", "legacy length"));
                }
                u16::read(buf)? as usize
            }
        };
        let body = read_bytes(buf, len)?;
        Ok(Self {
            typ,
            body,
            width: *width,
        })
    }
}

/// Split the first complete handshake message (header included) off the front of `buf`.
///
/// Returns `None` if `buf` does not yet hold a complete message. Messages that declare a body
/// larger than `max` are rejected before they are buffered.
pub fn next_message(buf: &mut BytesMut, max: usize) -> Result<Option<Bytes>, Error> {
    if buf.len() < HANDSHAKE_HEADER_LENGTH {
        return Ok(None);
    }
    let len = decode_u24([buf[1], buf[2], buf[3]]);
    if len > max {
        return Err(Error::LengthOverflow {
            field: "handshake",
            len,
            max,
        });
    }
    if buf.len() < HANDSHAKE_HEADER_LENGTH + len {
        return Ok(None);
    }
    Ok(Some(buf.split_to(HANDSHAKE_HEADER_LENGTH + len).freeze()))
}

/// Largest handshake body we are willing to buffer from the server.
pub const MAX_HANDSHAKE_LENGTH: usize = U16_MAX * 4;

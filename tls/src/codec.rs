//! Big-endian length fields and length-prefixed payloads.
//!
//! Every length written by this crate goes through [encode_u16] or [encode_u24], which refuse
//! values that do not fit the field instead of truncating them. The readers return
//! [commonware_codec::Error] so they compose with the [commonware_codec::Read] implementations of
//! the wire types.

use crate::Error;
use bytes::{Buf, BufMut, Bytes};
use commonware_codec::{Error as CodecError, ReadExt};
use std::ops::RangeBounds;

/// Largest value of a 16-bit length field.
pub const U16_MAX: usize = u16::MAX as usize;

/// Largest value of a 24-bit length field.
pub const U24_MAX: usize = (1 << 24) - 1;

/// Encode `len` as a 2-byte big-endian length.
pub fn encode_u16(field: &'static str, len: usize) -> Result<[u8; 2], Error> {
    if len > U16_MAX {
        return Err(Error::LengthOverflow {
            field,
            len,
            max: U16_MAX,
        });
    }
    Ok((len as u16).to_be_bytes())
}

/// Decode a 2-byte big-endian value.
pub fn decode_u16(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}

/// Encode `len` as a 3-byte big-endian length.
pub fn encode_u24(field: &'static str, len: usize) -> Result<[u8; 3], Error> {
    if len > U24_MAX {
        return Err(Error::LengthOverflow {
            field,
            len,
            max: U24_MAX,
        });
    }
    let [_, a, b, c] = (len as u32).to_be_bytes();
    Ok([a, b, c])
}

/// Decode a 3-byte big-endian value.
pub fn decode_u24(bytes: [u8; 3]) -> usize {
    u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]) as usize
}

/// Concatenate `buffers` in order.
pub fn concat(buffers: &[&[u8]]) -> Vec<u8> {
    let len = buffers.iter().map(|b| b.len()).sum();
    let mut out = Vec::with_capacity(len);
    for buffer in buffers {
        out.extend_from_slice(buffer);
    }
    out
}

/// Write `payload` preceded by its length as a single byte.
pub fn put_u8_prefixed(
    buf: &mut impl BufMut,
    field: &'static str,
    payload: &[u8],
) -> Result<(), Error> {
    let len = u8::try_from(payload.len()).map_err(|_| Error::LengthOverflow {
        field,
        len: payload.len(),
        max: u8::MAX as usize,
    })?;
    buf.put_u8(len);
    buf.put_slice(payload);
    Ok(())
}

/// Write `payload` preceded by its length as a 2-byte big-endian value.
pub fn put_u16_prefixed(
    buf: &mut impl BufMut,
    field: &'static str,
    payload: &[u8],
) -> Result<(), Error> {
    buf.put_slice(&encode_u16(field, payload.len())?);
    buf.put_slice(payload);
    Ok(())
}

/// Read exactly `len` bytes.
pub fn read_bytes(buf: &mut impl Buf, len: usize) -> Result<Bytes, CodecError> {
    if buf.remaining() < len {
        return Err(CodecError::EndOfBuffer);
    }
    Ok(buf.copy_to_bytes(len))
}

/// Read a 3-byte big-endian length.
pub fn read_u24(buf: &mut impl Buf) -> Result<usize, CodecError> {
    Ok(decode_u24(<[u8; 3]>::read(buf)?))
}

/// Read a payload preceded by a 1-byte length, rejecting lengths outside of `range`.
pub fn read_u8_prefixed(
    buf: &mut impl Buf,
    range: impl RangeBounds<usize>,
) -> Result<Bytes, CodecError> {
    let len = u8::read(buf)? as usize;
    read_bounded(buf, len, range)
}

/// Read a payload preceded by a 2-byte big-endian length, rejecting lengths outside of `range`.
pub fn read_u16_prefixed(
    buf: &mut impl Buf,
    range: impl RangeBounds<usize>,
) -> Result<Bytes, CodecError> {
    let len = u16::read(buf)? as usize;
    read_bounded(buf, len, range)
}

fn read_bounded(
    buf: &mut impl Buf,
    len: usize,
    range: impl RangeBounds<usize>,
) -> Result<Bytes, CodecError> {
    if !range.contains(&len) {
        return Err(CodecError::InvalidLength(len));
    }
    read_bytes(buf, len)
}

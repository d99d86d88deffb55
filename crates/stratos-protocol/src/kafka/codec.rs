//! Primitive encode/decode helpers for the framed, big-endian wire format
//!: fixed-width integers, `i16`-length strings,
//! `i32`-length byte arrays, `-1` as the null sentinel for both, and
//! `i32`-length arrays with `-1` denoting a null array.

use bytes::{Buf, BufMut, BytesMut};
use stratos_common::error::{Error, ProtocolError, Result};

fn ensure(buf: &impl Buf, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(Error::Protocol(ProtocolError::IncompleteMessage));
    }
    Ok(())
}

pub fn read_i8(buf: &mut impl Buf) -> Result<i8> {
    ensure(buf, 1)?;
    Ok(buf.get_i8())
}

pub fn read_i16(buf: &mut impl Buf) -> Result<i16> {
    ensure(buf, 2)?;
    Ok(buf.get_i16())
}

pub fn read_i32(buf: &mut impl Buf) -> Result<i32> {
    ensure(buf, 4)?;
    Ok(buf.get_i32())
}

pub fn read_i64(buf: &mut impl Buf) -> Result<i64> {
    ensure(buf, 8)?;
    Ok(buf.get_i64())
}

/// A non-null string: `length: i16 | utf8_bytes`.
pub fn read_string(buf: &mut impl Buf) -> Result<String> {
    match read_nullable_string(buf)? {
        Some(s) => Ok(s),
        None => Err(Error::Protocol(ProtocolError::InvalidFormat(
            "expected non-null string, got null".to_string(),
        ))),
    }
}

/// A string where `length == -1` denotes null.
pub fn read_nullable_string(buf: &mut impl Buf) -> Result<Option<String>> {
    let len = read_i16(buf)?;
    if len < 0 {
        return Ok(None);
    }
    ensure(buf, len as usize)?;
    let mut raw = vec![0u8; len as usize];
    buf.copy_to_slice(&mut raw);
    String::from_utf8(raw)
        .map(Some)
        .map_err(|e| Error::Protocol(ProtocolError::InvalidFormat(e.to_string())))
}

/// A non-null byte array: `length: i32 | bytes`. A `-1` length reads as
/// empty rather than erroring, so a producer's null-value tombstone
/// decodes the same way a zero-length value would.
pub fn read_bytes(buf: &mut impl Buf) -> Result<Vec<u8>> {
    Ok(read_nullable_bytes(buf)?.unwrap_or_default())
}

/// A byte array where `length == -1` denotes null.
pub fn read_nullable_bytes(buf: &mut impl Buf) -> Result<Option<Vec<u8>>> {
    let len = read_i32(buf)?;
    if len < 0 {
        return Ok(None);
    }
    ensure(buf, len as usize)?;
    let mut raw = vec![0u8; len as usize];
    buf.copy_to_slice(&mut raw);
    Ok(Some(raw))
}

/// Reads an `i32` array length, rejecting the null (`-1`) case since every
/// request/response array this dispatcher decodes is always present (even
/// if empty).
pub fn read_array_len(buf: &mut impl Buf) -> Result<usize> {
    let len = read_i32(buf)?;
    if len < 0 {
        return Ok(0);
    }
    Ok(len as usize)
}

pub fn write_i8(out: &mut BytesMut, v: i8) {
    out.put_i8(v);
}

pub fn write_i16(out: &mut BytesMut, v: i16) {
    out.put_i16(v);
}

pub fn write_i32(out: &mut BytesMut, v: i32) {
    out.put_i32(v);
}

pub fn write_i64(out: &mut BytesMut, v: i64) {
    out.put_i64(v);
}

pub fn write_string(out: &mut BytesMut, s: &str) {
    out.put_i16(s.len() as i16);
    out.extend_from_slice(s.as_bytes());
}

pub fn write_nullable_string(out: &mut BytesMut, s: Option<&str>) {
    match s {
        Some(s) => write_string(out, s),
        None => out.put_i16(-1),
    }
}

pub fn write_bytes(out: &mut BytesMut, b: &[u8]) {
    out.put_i32(b.len() as i32);
    out.extend_from_slice(b);
}

pub fn write_nullable_bytes(out: &mut BytesMut, b: Option<&[u8]>) {
    match b {
        Some(b) => write_bytes(out, b),
        None => out.put_i32(-1),
    }
}

pub fn write_array_len(out: &mut BytesMut, len: usize) {
    out.put_i32(len as i32);
}

/// A request's versioned header: `(api_key, api_version, correlation_id,
/// client_id)`.
#[derive(Debug, Clone)]
pub struct RequestHeader {
    pub api_key: i16,
    pub api_version: i16,
    pub correlation_id: i32,
    pub client_id: Option<String>,
}

pub fn decode_request_header(buf: &mut impl Buf) -> Result<RequestHeader> {
    let api_key = read_i16(buf)?;
    let api_version = read_i16(buf)?;
    let correlation_id = read_i32(buf)?;
    let client_id = read_nullable_string(buf)?;
    Ok(RequestHeader {
        api_key,
        api_version,
        correlation_id,
        client_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Buf as _;

    #[test]
    fn round_trips_strings_and_bytes() {
        let mut out = BytesMut::new();
        write_string(&mut out, "topic-a");
        write_nullable_string(&mut out, None);
        write_bytes(&mut out, b"payload");
        write_nullable_bytes(&mut out, None);

        let mut cursor = out.freeze();
        assert_eq!(read_string(&mut cursor).unwrap(), "topic-a");
        assert_eq!(read_nullable_string(&mut cursor).unwrap(), None);
        assert_eq!(read_bytes(&mut cursor).unwrap(), b"payload");
        assert_eq!(read_nullable_bytes(&mut cursor).unwrap(), None);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn incomplete_message_is_an_error() {
        let mut cursor = BytesMut::from(&b"\x00"[..]).freeze();
        assert!(read_i16(&mut cursor).is_err());
    }

    #[test]
    fn decodes_request_header() {
        let mut out = BytesMut::new();
        write_i16(&mut out, 18);
        write_i16(&mut out, 3);
        write_i32(&mut out, 42);
        write_string(&mut out, "test-client");

        let header = decode_request_header(&mut out.freeze()).unwrap();
        assert_eq!(header.api_key, 18);
        assert_eq!(header.correlation_id, 42);
        assert_eq!(header.client_id.as_deref(), Some("test-client"));
    }
}

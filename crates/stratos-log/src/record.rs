//! On-disk record framing.
//!
//! `size: u32 | offset: u64 | timestamp: u64 | key_len: u32 | key: bytes |
//! value_len: u32 | value: bytes`, all big-endian. `size` counts the bytes
//! *after* itself, i.e. `24 + key.len() + value.len()`.

use stratos_common::error::{LogError, Result};
use stratos_common::types::Record;

/// Bytes of fixed framing overhead after the leading `size: u32`.
const FIXED_OVERHEAD: usize = 8 /* offset */ + 8 /* timestamp */ + 4 /* key_len */ + 4 /* value_len */;

/// Encode a record using the on-disk framing, including the leading
/// `size: u32` prefix.
#[must_use]
pub fn encode(record: &Record) -> Vec<u8> {
    let size = FIXED_OVERHEAD + record.key.len() + record.value.len();
    let mut buf = Vec::with_capacity(4 + size);
    buf.extend_from_slice(&(size as u32).to_be_bytes());
    buf.extend_from_slice(&(record.offset as u64).to_be_bytes());
    buf.extend_from_slice(&(record.timestamp as u64).to_be_bytes());
    buf.extend_from_slice(&(record.key.len() as u32).to_be_bytes());
    buf.extend_from_slice(&record.key);
    buf.extend_from_slice(&(record.value.len() as u32).to_be_bytes());
    buf.extend_from_slice(&record.value);
    buf
}

/// Encoded length of `record` on disk, including the leading `size: u32`.
#[must_use]
pub fn encoded_len(key_len: usize, value_len: usize) -> usize {
    4 + FIXED_OVERHEAD + key_len + value_len
}

/// Decode one record from the front of `buf`. Returns the record and the
/// number of bytes consumed. Fails with `CorruptedSegment` if `size`
/// overruns `buf` or the length invariant doesn't hold.
pub fn decode(buf: &[u8]) -> Result<(Record, usize)> {
    if buf.len() < 4 {
        return Err(LogError::CorruptedSegment("truncated size prefix".into()).into());
    }
    let size = u32::from_be_bytes(buf[0..4].try_into().unwrap()) as usize;
    if buf.len() < 4 + size {
        return Err(LogError::CorruptedSegment(format!(
            "record claims {size} bytes but only {} available",
            buf.len() - 4
        ))
        .into());
    }
    if size < FIXED_OVERHEAD {
        return Err(LogError::CorruptedSegment(format!(
            "record size {size} smaller than fixed overhead {FIXED_OVERHEAD}"
        ))
        .into());
    }

    let body = &buf[4..4 + size];
    let offset = u64::from_be_bytes(body[0..8].try_into().unwrap()) as i64;
    let timestamp = u64::from_be_bytes(body[8..16].try_into().unwrap()) as i64;
    let key_len = u32::from_be_bytes(body[16..20].try_into().unwrap()) as usize;

    if key_len > size.saturating_sub(FIXED_OVERHEAD) {
        return Err(LogError::CorruptedSegment(format!(
            "key_len {key_len} overruns record of size {size}"
        ))
        .into());
    }
    let key_start = 20;
    let key_end = key_start + key_len;
    if key_end + 4 > body.len() {
        return Err(LogError::CorruptedSegment("truncated key".into()).into());
    }
    let key = body[key_start..key_end].to_vec();

    let value_len_start = key_end;
    let value_len =
        u32::from_be_bytes(body[value_len_start..value_len_start + 4].try_into().unwrap())
            as usize;
    let value_start = value_len_start + 4;
    let value_end = value_start + value_len;
    if value_end != body.len() {
        return Err(LogError::CorruptedSegment(format!(
            "key_len {key_len} + value_len {value_len} + {FIXED_OVERHEAD} != size {size}"
        ))
        .into());
    }
    let value = body[value_start..value_end].to_vec();

    let record = Record {
        offset,
        timestamp,
        key,
        value,
        headers: std::collections::HashMap::new(),
    };
    Ok((record, 4 + size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let r = Record::new(42, 1_700_000_000_000, b"k".to_vec(), b"v".to_vec());
        let encoded = encode(&r);
        let (decoded, consumed) = decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded.offset, r.offset);
        assert_eq!(decoded.timestamp, r.timestamp);
        assert_eq!(decoded.key, r.key);
        assert_eq!(decoded.value, r.value);
    }

    #[test]
    fn empty_key_and_value_round_trip() {
        let r = Record::new(0, 0, vec![], vec![]);
        let encoded = encode(&r);
        let (decoded, _) = decode(&encoded).unwrap();
        assert_eq!(decoded, r);
    }

    #[test]
    fn truncated_buffer_is_corrupted() {
        let r = Record::new(1, 1, b"key".to_vec(), b"value".to_vec());
        let encoded = encode(&r);
        let truncated = &encoded[..encoded.len() - 2];
        assert!(decode(truncated).is_err());
    }

    #[test]
    fn inconsistent_lengths_are_corrupted() {
        let mut encoded = encode(&Record::new(1, 1, b"key".to_vec(), b"value".to_vec()));
        // Corrupt the key_len field to no longer match the framed size.
        encoded[20..24].copy_from_slice(&99u32.to_be_bytes());
        assert!(decode(&encoded).is_err());
    }
}

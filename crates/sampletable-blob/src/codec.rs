//! Stored value framing
//!
//! Layout: 4-byte little-endian CRC32C of the body, then the bincode body.

use crate::{BlobError, BlobResult};
use bytes::{BufMut, Bytes, BytesMut};
use sampletable_common::Value;

const CHECKSUM_LEN: usize = 4;

/// Serialize a value into a checksummed payload
pub fn encode_value(value: &Value) -> BlobResult<Bytes> {
    let body = bincode::serialize(value).map_err(|e| BlobError::Codec(e.to_string()))?;
    let mut buf = BytesMut::with_capacity(CHECKSUM_LEN + body.len());
    buf.put_u32_le(crc32c::crc32c(&body));
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Verify and deserialize a payload produced by [`encode_value`]
pub fn decode_value(payload: &[u8]) -> BlobResult<Value> {
    if payload.len() < CHECKSUM_LEN {
        return Err(BlobError::Corrupt {
            key: String::new(),
            reason: format!("payload too short ({} bytes)", payload.len()),
        });
    }
    let (header, body) = payload.split_at(CHECKSUM_LEN);
    let expected = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let actual = crc32c::crc32c(body);
    if expected != actual {
        return Err(BlobError::Corrupt {
            key: String::new(),
            reason: format!("checksum mismatch: expected {expected:#010x}, got {actual:#010x}"),
        });
    }
    bincode::deserialize(body).map_err(|e| BlobError::Codec(e.to_string()))
}

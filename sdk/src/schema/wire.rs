use crate::error::AuctionError;
use bytes::{BufMut, Bytes, BytesMut};

pub const MAGIC_BYTE: u8 = 0;
pub const HEADER_SIZE: usize = 5;

/// Frames a serialized payload with its schema identity:
/// magic byte, 4-byte big-endian schema ID, payload.
pub fn encode(schema_id: u32, payload: &[u8]) -> Bytes {
    let mut bytes = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    bytes.put_u8(MAGIC_BYTE);
    bytes.put_u32(schema_id);
    bytes.put_slice(payload);
    bytes.freeze()
}

/// Returns the declared schema ID and the payload that follows the header.
pub fn decode(bytes: &[u8]) -> Result<(u32, &[u8]), AuctionError> {
    if bytes.len() < HEADER_SIZE {
        return Err(AuctionError::InvalidWireFormat(format!(
            "record of {} bytes is shorter than the {HEADER_SIZE} byte header",
            bytes.len()
        )));
    }

    if bytes[0] != MAGIC_BYTE {
        return Err(AuctionError::InvalidWireFormat(format!(
            "unknown magic byte: {}",
            bytes[0]
        )));
    }

    let schema_id = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    Ok((schema_id, &bytes[HEADER_SIZE..]))
}

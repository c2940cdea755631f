//! On-disk record and hint-entry codec.
//!
//! Record layout (big-endian throughout):
//!
//! ```text
//! +--------+-----------+--------+----------+-----+-------+
//! | crc32  | timestamp | key_sz | value_sz | key | value |
//! |  4 B   |   16 B    |  4 B   |   4 B    |  K  |   V    |
//! +--------+-----------+--------+----------+-----+-------+
//! ```
//!
//! `crc32` covers `timestamp || key_sz || value_sz || key || value`
//! (IEEE/zlib polynomial). `value_sz == 0` marks a tombstone.
//!
//! Hint entries mirror this but carry `value_pos` instead of the value
//! itself, and carry no checksum of their own.

use uuid::Uuid;

pub(crate) const HEADER_SIZE: usize = 4 + 16 + 4 + 4;
pub(crate) const HINT_HEADER_SIZE: usize = 16 + 4 + 4 + 4;

pub(crate) struct RecordHeader {
    pub(crate) timestamp: Uuid,
    pub(crate) key_len: u32,
    pub(crate) value_len: u32,
}

/// Encodes a single record: header, CRC, key and value, ready to append.
pub(crate) fn encode_record(timestamp: Uuid, key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(16 + 4 + 4 + key.len() + value.len());
    body.extend_from_slice(timestamp.as_bytes());
    body.extend_from_slice(&(key.len() as u32).to_be_bytes());
    body.extend_from_slice(&(value.len() as u32).to_be_bytes());
    body.extend_from_slice(key);
    body.extend_from_slice(value);

    let crc = crc32fast::hash(&body);

    let mut record = Vec::with_capacity(4 + body.len());
    record.extend_from_slice(&crc.to_be_bytes());
    record.extend_from_slice(&body);
    record
}

/// Decodes the fixed-size header, returning the claimed CRC alongside it.
/// The caller still owns reading `key_len + value_len` further bytes and
/// verifying the CRC with [`verify_crc`].
pub(crate) fn decode_header(bytes: &[u8; HEADER_SIZE]) -> (u32, RecordHeader) {
    let crc = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
    let timestamp = Uuid::from_bytes(bytes[4..20].try_into().unwrap());
    let key_len = u32::from_be_bytes(bytes[20..24].try_into().unwrap());
    let value_len = u32::from_be_bytes(bytes[24..28].try_into().unwrap());
    (crc, RecordHeader { timestamp, key_len, value_len })
}

pub(crate) fn verify_crc(header: &RecordHeader, key: &[u8], value: &[u8], claimed_crc: u32) -> bool {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header.timestamp.as_bytes());
    hasher.update(&header.key_len.to_be_bytes());
    hasher.update(&header.value_len.to_be_bytes());
    hasher.update(key);
    hasher.update(value);
    hasher.finalize() == claimed_crc
}

/// Encodes a hint entry: timestamp, key/value sizes, the value's absolute
/// position in the paired data segment, and the key itself.
pub(crate) fn encode_hint(timestamp: Uuid, key: &[u8], value_len: u32, value_pos: u32) -> Vec<u8> {
    let mut hint = Vec::with_capacity(HINT_HEADER_SIZE + key.len());
    hint.extend_from_slice(timestamp.as_bytes());
    hint.extend_from_slice(&(key.len() as u32).to_be_bytes());
    hint.extend_from_slice(&value_len.to_be_bytes());
    hint.extend_from_slice(&value_pos.to_be_bytes());
    hint.extend_from_slice(key);
    hint
}

pub(crate) fn decode_hint_header(bytes: &[u8; HINT_HEADER_SIZE]) -> (Uuid, u32, u32, u32) {
    let timestamp = Uuid::from_bytes(bytes[0..16].try_into().unwrap());
    let key_len = u32::from_be_bytes(bytes[16..20].try_into().unwrap());
    let value_len = u32::from_be_bytes(bytes[20..24].try_into().unwrap());
    let value_pos = u32::from_be_bytes(bytes[24..28].try_into().unwrap());
    (timestamp, key_len, value_len, value_pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips() {
        let ts = Uuid::now_v7();
        let key = b"biz";
        let value = b"boo2";
        let encoded = encode_record(ts, key, value);

        assert_eq!(encoded.len(), HEADER_SIZE + key.len() + value.len());

        let header_bytes: [u8; HEADER_SIZE] = encoded[..HEADER_SIZE].try_into().unwrap();
        let (crc, header) = decode_header(&header_bytes);
        assert_eq!(header.timestamp, ts);
        assert_eq!(header.key_len as usize, key.len());
        assert_eq!(header.value_len as usize, value.len());

        let rest = &encoded[HEADER_SIZE..];
        let (decoded_key, decoded_value) = rest.split_at(key.len());
        assert_eq!(decoded_key, key);
        assert_eq!(decoded_value, value);
        assert!(verify_crc(&header, decoded_key, decoded_value, crc));
    }

    #[test]
    fn tombstone_has_zero_value_len() {
        let ts = Uuid::now_v7();
        let encoded = encode_record(ts, b"k", b"");
        let header_bytes: [u8; HEADER_SIZE] = encoded[..HEADER_SIZE].try_into().unwrap();
        let (_, header) = decode_header(&header_bytes);
        assert_eq!(header.value_len, 0);
    }

    #[test]
    fn flipped_bit_fails_crc_verification() {
        let ts = Uuid::now_v7();
        let key = b"k";
        let value = b"value";
        let mut encoded = encode_record(ts, key, value);
        let last = encoded.len() - 1;
        encoded[last] ^= 0x01;

        let header_bytes: [u8; HEADER_SIZE] = encoded[..HEADER_SIZE].try_into().unwrap();
        let (crc, header) = decode_header(&header_bytes);
        let rest = &encoded[HEADER_SIZE..];
        let (decoded_key, decoded_value) = rest.split_at(key.len());
        assert!(!verify_crc(&header, decoded_key, decoded_value, crc));
    }

    #[test]
    fn hint_round_trips() {
        let ts = Uuid::now_v7();
        let key = b"long_one";
        let encoded = encode_hint(ts, key, 42, 17);

        assert_eq!(encoded.len(), HINT_HEADER_SIZE + key.len());

        let header_bytes: [u8; HINT_HEADER_SIZE] = encoded[..HINT_HEADER_SIZE].try_into().unwrap();
        let (timestamp, key_len, value_len, value_pos) = decode_hint_header(&header_bytes);
        assert_eq!(timestamp, ts);
        assert_eq!(key_len as usize, key.len());
        assert_eq!(value_len, 42);
        assert_eq!(value_pos, 17);
        assert_eq!(&encoded[HINT_HEADER_SIZE..], key);
    }
}

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::StrataError;

/// Sequence numbers are 56 bits; the low byte of the internal key trailer
/// carries the value kind.
pub const MAX_SEQUENCE: u64 = (1u64 << 56) - 1;

pub(crate) const INTERNAL_KEY_TRAILER_LEN: usize = 8;

/// The kind of a record. Discriminants match the on-disk trailer byte; for a
/// given `(user_key, seq)` the kind with the larger discriminant sorts first.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    Delete = 0x00,
    Put = 0x01,
    Merge = 0x02,
    SingleDelete = 0x07,
    RangeDelete = 0x0F,
    BlobIndex = 0x11,
}

impl ValueKind {
    /// The kind used when building a seek target; sorts before every real
    /// record of the same `(user_key, seq)`.
    pub const MAX_FOR_SEEK: ValueKind = ValueKind::BlobIndex;

    pub fn from_u8(b: u8) -> Option<ValueKind> {
        match b {
            0x00 => Some(ValueKind::Delete),
            0x01 => Some(ValueKind::Put),
            0x02 => Some(ValueKind::Merge),
            0x07 => Some(ValueKind::SingleDelete),
            0x0F => Some(ValueKind::RangeDelete),
            0x11 => Some(ValueKind::BlobIndex),
            _ => None,
        }
    }

    /// Point-deletion kinds counted as deletion inputs.
    pub fn is_deletion(self) -> bool {
        matches!(
            self,
            ValueKind::Delete | ValueKind::SingleDelete | ValueKind::RangeDelete
        )
    }
}

/// An internal key: `(user_key, seq, kind)`. Keys sort by user key under the
/// user comparator, then by sequence descending, then by kind descending, so
/// the newest record for a user key is visited first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InternalKey {
    pub user_key: Bytes,
    pub seq: u64,
    pub kind: ValueKind,
}

impl InternalKey {
    pub fn new(user_key: impl Into<Bytes>, seq: u64, kind: ValueKind) -> Self {
        debug_assert!(seq <= MAX_SEQUENCE);
        Self {
            user_key: user_key.into(),
            seq,
            kind,
        }
    }

    /// A key positioned before every record of `user_key`.
    pub fn for_seek(user_key: impl Into<Bytes>) -> Self {
        Self::new(user_key, MAX_SEQUENCE, ValueKind::MAX_FOR_SEEK)
    }

    pub fn trailer(&self) -> u64 {
        (self.seq << 8) | self.kind as u64
    }

    pub fn encoded_len(&self) -> usize {
        self.user_key.len() + INTERNAL_KEY_TRAILER_LEN
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(&self.user_key);
        buf.put_u64_le(self.trailer());
        buf.freeze()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, StrataError> {
        if buf.len() < INTERNAL_KEY_TRAILER_LEN {
            return Err(StrataError::corruption("internal key too short"));
        }
        let split = buf.len() - INTERNAL_KEY_TRAILER_LEN;
        let trailer = u64::from_le_bytes(buf[split..].try_into().expect("trailer is 8 bytes"));
        let kind = ValueKind::from_u8((trailer & 0xFF) as u8)
            .ok_or_else(|| StrataError::corruption("unknown value kind in internal key"))?;
        Ok(Self {
            user_key: Bytes::copy_from_slice(&buf[..split]),
            seq: trailer >> 8,
            kind,
        })
    }
}

/// A single record flowing through the compaction pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RowEntry {
    pub key: InternalKey,
    pub value: Bytes,
}

impl RowEntry {
    pub fn new(key: InternalKey, value: Bytes) -> Self {
        Self { key, value }
    }

    pub fn user_key(&self) -> &Bytes {
        &self.key.user_key
    }

    pub fn seq(&self) -> u64 {
        self.key.seq
    }

    pub fn kind(&self) -> ValueKind {
        self.key.kind
    }

    pub fn estimated_size(&self) -> usize {
        self.key.encoded_len() + self.value.len()
    }

    pub fn new_put(user_key: &[u8], value: &[u8], seq: u64) -> Self {
        Self::new(
            InternalKey::new(Bytes::copy_from_slice(user_key), seq, ValueKind::Put),
            Bytes::copy_from_slice(value),
        )
    }

    pub fn new_delete(user_key: &[u8], seq: u64) -> Self {
        Self::new(
            InternalKey::new(Bytes::copy_from_slice(user_key), seq, ValueKind::Delete),
            Bytes::new(),
        )
    }

    pub fn new_single_delete(user_key: &[u8], seq: u64) -> Self {
        Self::new(
            InternalKey::new(
                Bytes::copy_from_slice(user_key),
                seq,
                ValueKind::SingleDelete,
            ),
            Bytes::new(),
        )
    }

    pub fn new_merge(user_key: &[u8], operand: &[u8], seq: u64) -> Self {
        Self::new(
            InternalKey::new(Bytes::copy_from_slice(user_key), seq, ValueKind::Merge),
            Bytes::copy_from_slice(operand),
        )
    }

    pub fn new_blob_index(user_key: &[u8], index: Bytes, seq: u64) -> Self {
        Self::new(
            InternalKey::new(Bytes::copy_from_slice(user_key), seq, ValueKind::BlobIndex),
            index,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ValueKind::Delete)]
    #[case(ValueKind::Put)]
    #[case(ValueKind::Merge)]
    #[case(ValueKind::SingleDelete)]
    #[case(ValueKind::RangeDelete)]
    #[case(ValueKind::BlobIndex)]
    fn value_kind_round_trips(#[case] kind: ValueKind) {
        assert_eq!(ValueKind::from_u8(kind as u8), Some(kind));
    }

    #[test]
    fn internal_key_round_trips() {
        let key = InternalKey::new(Bytes::from_static(b"user-key"), 42, ValueKind::Put);
        let encoded = key.encode();
        assert_eq!(encoded.len(), 8 + 8);
        let decoded = InternalKey::decode(&encoded).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        let mut encoded = InternalKey::new(Bytes::from_static(b"k"), 7, ValueKind::Put)
            .encode()
            .to_vec();
        let trailer_start = encoded.len() - 8;
        encoded[trailer_start] = 0x55;
        assert!(matches!(
            InternalKey::decode(&encoded),
            Err(StrataError::Corruption { .. })
        ));
    }

    #[test]
    fn decode_rejects_short_buffer() {
        assert!(InternalKey::decode(b"short").is_err());
    }
}

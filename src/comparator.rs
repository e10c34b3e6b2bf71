use std::cmp::Ordering;
use std::sync::Arc;

use crate::types::InternalKey;

/// User-key ordering supplied with the compaction descriptor. Implementations
/// must define a total order over user keys.
pub trait UserComparator: Send + Sync {
    fn name(&self) -> &'static str;

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Size in bytes of the timestamp suffix carried by user keys, 0 when the
    /// column family does not use user-defined timestamps.
    fn timestamp_size(&self) -> usize {
        0
    }

    /// The timestamp suffix of a user key. Only meaningful when
    /// `timestamp_size() > 0`.
    fn timestamp_of<'a>(&self, user_key: &'a [u8]) -> &'a [u8] {
        let ts = self.timestamp_size();
        debug_assert!(user_key.len() >= ts);
        &user_key[user_key.len() - ts..]
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl UserComparator for BytewiseComparator {
    fn name(&self) -> &'static str {
        "stratadb.BytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Composite order over internal keys: user key ascending under the user
/// comparator, then sequence descending, then kind descending.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user: Arc<dyn UserComparator>,
}

impl InternalKeyComparator {
    pub fn new(user: Arc<dyn UserComparator>) -> Self {
        Self { user }
    }

    pub fn user(&self) -> &Arc<dyn UserComparator> {
        &self.user
    }

    pub fn compare(&self, a: &InternalKey, b: &InternalKey) -> Ordering {
        self.user
            .compare(&a.user_key, &b.user_key)
            .then_with(|| b.seq.cmp(&a.seq))
            .then_with(|| (b.kind as u8).cmp(&(a.kind as u8)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueKind;
    use bytes::Bytes;

    fn ikey(user_key: &'static [u8], seq: u64, kind: ValueKind) -> InternalKey {
        InternalKey::new(Bytes::from_static(user_key), seq, kind)
    }

    #[test]
    fn orders_by_user_key_first() {
        let icmp = InternalKeyComparator::new(Arc::new(BytewiseComparator));
        assert_eq!(
            icmp.compare(
                &ikey(b"a", 1, ValueKind::Put),
                &ikey(b"b", 100, ValueKind::Put)
            ),
            Ordering::Less
        );
    }

    #[test]
    fn newer_sequence_sorts_first() {
        let icmp = InternalKeyComparator::new(Arc::new(BytewiseComparator));
        assert_eq!(
            icmp.compare(
                &ikey(b"k", 12, ValueKind::Put),
                &ikey(b"k", 10, ValueKind::Put)
            ),
            Ordering::Less
        );
    }

    #[test]
    fn kind_breaks_sequence_ties_descending() {
        let icmp = InternalKeyComparator::new(Arc::new(BytewiseComparator));
        assert_eq!(
            icmp.compare(
                &ikey(b"k", 10, ValueKind::Merge),
                &ikey(b"k", 10, ValueKind::Put)
            ),
            Ordering::Less
        );
    }

    #[test]
    fn seek_key_sorts_before_records() {
        let icmp = InternalKeyComparator::new(Arc::new(BytewiseComparator));
        let seek = InternalKey::for_seek(Bytes::from_static(b"k"));
        assert_eq!(
            icmp.compare(&seek, &ikey(b"k", 99, ValueKind::Put)),
            Ordering::Less
        );
    }
}

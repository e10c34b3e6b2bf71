use std::cmp::Ordering;

use crate::comparator::InternalKeyComparator;
use crate::error::StrataError;
use crate::types::{InternalKey, RowEntry};

/// Digest of an output file captured at build time and recomputed by the
/// verifier on the read path; paranoid checks compare the two.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorDigest {
    pub num_entries: u64,
    pub hash: u32,
}

/// Validates that entries added to an output file are strictly increasing
/// under the composite internal-key order and accumulates a content hash.
pub struct OutputValidator {
    icmp: InternalKeyComparator,
    prev: Option<InternalKey>,
    hasher: crc32fast::Hasher,
    num_entries: u64,
}

impl OutputValidator {
    pub fn new(icmp: InternalKeyComparator) -> Self {
        Self {
            icmp,
            prev: None,
            hasher: crc32fast::Hasher::new(),
            num_entries: 0,
        }
    }

    pub fn add(&mut self, entry: &RowEntry) -> Result<(), StrataError> {
        if let Some(prev) = &self.prev {
            if self.icmp.compare(prev, &entry.key) != Ordering::Less {
                return Err(StrataError::corruption(
                    "compaction output keys are not strictly increasing",
                ));
            }
        }
        self.hasher.update(&entry.key.encode());
        self.hasher.update(&entry.value);
        self.num_entries += 1;
        self.prev = Some(entry.key.clone());
        Ok(())
    }

    pub fn digest(&self) -> ValidatorDigest {
        ValidatorDigest {
            num_entries: self.num_entries,
            hash: self.hasher.clone().finalize(),
        }
    }
}

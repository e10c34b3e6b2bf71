use uuid::Uuid;

use crate::types::InternalKey;

/// Storage temperature tag passed through to the filesystem when creating
/// output files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Temperature {
    #[default]
    Unknown,
    Hot,
    Warm,
    Cold,
}

/// Metadata of one SST, carried in the version and in version edits.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub file_number: u64,
    pub file_size: u64,
    pub smallest: Option<InternalKey>,
    pub largest: Option<InternalKey>,
    pub smallest_seq: u64,
    pub largest_seq: u64,
    pub num_entries: u64,
    pub num_range_deletions: u64,
    /// Seconds since the epoch when the file was created.
    pub creation_time: u64,
    /// Oldest ancestor time across the input files this file was compacted
    /// from; equals `creation_time` for flush outputs.
    pub oldest_ancester_time: u64,
    pub oldest_blob_file_number: Option<u64>,
    pub temperature: Temperature,
    pub file_checksum: u32,
    pub unique_id: Uuid,
}

impl FileMetadata {
    pub fn smallest_user_key(&self) -> Option<&[u8]> {
        self.smallest.as_ref().map(|k| k.user_key.as_ref())
    }

    pub fn largest_user_key(&self) -> Option<&[u8]> {
        self.largest.as_ref().map(|k| k.user_key.as_ref())
    }
}

/// Unique file id derived from `(db_id, session_id, file_number)`; stable
/// across restarts for the same physical file.
pub fn unique_file_id(db_id: &Uuid, session_id: &Uuid, file_number: u64) -> Uuid {
    let mut name = Vec::with_capacity(24);
    name.extend_from_slice(session_id.as_bytes());
    name.extend_from_slice(&file_number.to_le_bytes());
    Uuid::new_v5(db_id, &name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_id_is_stable_and_distinct() {
        let db = Uuid::new_v4();
        let session = Uuid::new_v4();
        assert_eq!(
            unique_file_id(&db, &session, 7),
            unique_file_id(&db, &session, 7)
        );
        assert_ne!(
            unique_file_id(&db, &session, 7),
            unique_file_id(&db, &session, 8)
        );
        assert_ne!(
            unique_file_id(&db, &session, 7),
            unique_file_id(&db, &Uuid::new_v4(), 7)
        );
    }
}

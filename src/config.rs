use std::sync::Arc;

use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::listener::EventListener;

/// Knobs that are not per-compaction: identity, verification policy, and the
/// pluggable clock and listeners. The per-compaction inputs live in the
/// descriptor.
#[derive(Clone)]
pub struct CompactionJobOptions {
    pub db_id: Uuid,
    pub session_id: Uuid,
    /// Re-read every output after the build and compare against the
    /// validator captured while writing.
    pub paranoid_file_checks: bool,
    /// Treat single-delete contract violations as fatal corruption instead
    /// of counters.
    pub enforce_single_del_contracts: bool,
    /// Fail output finalization once cumulative added bytes exceed this.
    pub max_allowed_space: Option<u64>,
    pub listeners: Vec<Arc<dyn EventListener>>,
    pub clock: Arc<dyn Clock>,
}

impl Default for CompactionJobOptions {
    fn default() -> Self {
        Self {
            db_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            paranoid_file_checks: false,
            enforce_single_del_contracts: true,
            max_allowed_space: None,
            listeners: Vec::new(),
            clock: Arc::new(SystemClock::new()),
        }
    }
}

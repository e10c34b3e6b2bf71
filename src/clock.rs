use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Time source used for job timing and file creation metadata. Wall and CPU
/// time are kept separate so a platform clock can be injected.
pub trait Clock: Send + Sync {
    /// Microseconds since the Unix epoch.
    fn now_micros(&self) -> u64;

    /// CPU time consumed by the calling thread, in microseconds. Best-effort;
    /// the default clock falls back to wall time.
    fn cpu_micros(&self) -> u64;
}

pub struct SystemClock {
    last_tick: AtomicU64,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            last_tick: AtomicU64::new(0),
        }
    }
}

impl Clock for SystemClock {
    fn now_micros(&self) -> u64 {
        // SystemTime is not guaranteed to be monotonic; enforce it here.
        let tick = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        self.last_tick.fetch_max(tick, Ordering::SeqCst);
        self.last_tick.load(Ordering::SeqCst)
    }

    fn cpu_micros(&self) -> u64 {
        self.now_micros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_micros();
        let b = clock.now_micros();
        assert!(b >= a);
    }
}

use log::info;

/// Buffers a job's log lines so that messages from concurrent jobs flush as
/// one readable block at well-defined events (job start, job finish).
#[derive(Debug, Default)]
pub struct LogBuffer {
    lines: Vec<String>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, line: String) {
        self.lines.push(line);
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn flush(&mut self) {
        for line in self.lines.drain(..) {
            info!(target: "stratadb::compaction", "{}", line);
        }
    }
}

impl Drop for LogBuffer {
    fn drop(&mut self) {
        self.flush();
    }
}

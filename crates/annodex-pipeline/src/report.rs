//! Per-stage outcome reporting.

use std::time::Duration;

/// Outcome of one stage-transition or rollup operation: how many rows it
/// consumed and how long it took.
#[derive(Debug, Clone, Copy)]
pub struct StageReport {
    /// Logical operation name, e.g. "isa_closure_expansion".
    pub operation: &'static str,
    /// Rows consumed from the operation's input stage.
    pub rows_processed: u64,
    /// Wall-clock time for the whole operation.
    pub duration: Duration,
}

impl StageReport {
    pub fn new(operation: &'static str, rows_processed: u64, duration: Duration) -> Self {
        Self {
            operation,
            rows_processed,
            duration,
        }
    }

    /// Duration in whole milliseconds, for logging and events.
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }
}

use serde::{Deserialize, Serialize};

/// Outcome of one `enforce_context_limits` pass, for logging/diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruncationReport {
    pub messages_before: usize,
    pub messages_after: usize,
    pub chars_before: usize,
    pub chars_after: usize,
    pub dropped_units: usize,
    pub dropped_messages: usize,
}

impl TruncationReport {
    pub fn did_truncate(&self) -> bool {
        self.dropped_messages > 0
    }
}

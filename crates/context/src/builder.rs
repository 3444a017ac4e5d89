use agentcore_domain::tool::Message;

use crate::report::TruncationReport;
use crate::truncation;

/// A configured context-window budget for one conversation (§4.4).
///
/// Pure function wrapper: accepts the current message log, returns the
/// trimmed log plus a report. Holds no state of its own -- the History
/// Store owns the actual message log.
pub struct ContextWindow {
    pub budget_chars: usize,
}

impl ContextWindow {
    pub fn new(budget_chars: usize) -> Self {
        Self { budget_chars }
    }

    /// Apply `enforceContextLimits`: trim oldest non-system entries until
    /// the log fits the budget, without ever splitting a tool-call batch
    /// from its answers (I7).
    pub fn enforce(&self, messages: &[Message]) -> (Vec<Message>, TruncationReport) {
        truncation::enforce_context_limits(messages, self.budget_chars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_conversation_is_unchanged() {
        let window = ContextWindow::new(50_000);
        let messages = vec![Message::system("sys"), Message::user("hi"), Message::assistant("hello")];
        let (kept, report) = window.enforce(&messages);
        assert_eq!(kept.len(), 3);
        assert!(!report.did_truncate());
    }
}

//! History Store (§4.4, C4): owns the in-memory transcript for one request
//! and enforces the context-window budget after every append.

use agentcore_context::{ContextWindow, TruncationReport};
use agentcore_domain::tool::Message;
use parking_lot::RwLock;

type SaveHook = dyn Fn(&[Message]) + Send + Sync;

pub struct HistoryStore {
    messages: RwLock<Vec<Message>>,
    window: ContextWindow,
    save_hook: Option<Box<SaveHook>>,
}

impl HistoryStore {
    pub fn new(budget_chars: usize) -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
            window: ContextWindow::new(budget_chars),
            save_hook: None,
        }
    }

    /// Attach a persistence callback invoked after every mutation. Best
    /// effort from the caller's point of view -- the store itself does not
    /// interpret failures, it just calls the hook.
    pub fn with_save_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&[Message]) + Send + Sync + 'static,
    {
        self.save_hook = Some(Box::new(hook));
        self
    }

    pub fn get(&self) -> Vec<Message> {
        self.messages.read().clone()
    }

    pub fn set(&self, messages: Vec<Message>) {
        *self.messages.write() = messages;
        self.save_active();
    }

    pub fn append(&self, message: Message) -> TruncationReport {
        self.messages.write().push(message);
        let report = self.enforce_context_limits();
        self.save_active();
        report
    }

    /// Re-run `enforceContextLimits` against the current log (§4.4). Called
    /// automatically by `append`, and exposed directly for callers that
    /// append multiple messages in a batch (e.g. a tool round) and want to
    /// enforce once at the end.
    pub fn enforce_context_limits(&self) -> TruncationReport {
        let mut guard = self.messages.write();
        let (kept, report) = self.window.enforce(&guard);
        *guard = kept;
        report
    }

    fn save_active(&self) {
        if let Some(hook) = &self.save_hook {
            hook(&self.messages.read());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_enforces_budget_immediately() {
        let store = HistoryStore::new(10);
        store.append(Message::system("sys"));
        store.append(Message::user(&"x".repeat(100)));
        store.append(Message::user(&"y".repeat(100)));

        let kept = store.get();
        assert!(kept.iter().any(|m| matches!(m.role, agentcore_domain::tool::Role::System)));
    }

    #[test]
    fn save_hook_invoked_on_append() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let store = HistoryStore::new(10_000).with_save_hook(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        store.append(Message::user("hi"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn set_replaces_log_wholesale() {
        let store = HistoryStore::new(10_000);
        store.append(Message::user("first"));
        store.set(vec![Message::user("replacement")]);
        assert_eq!(store.get().len(), 1);
    }
}

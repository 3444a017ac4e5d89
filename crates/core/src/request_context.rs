//! Per-request state threaded through a single actor-critic loop (§4.2).
//!
//! Everything here is touched only by the driver thread running the loop,
//! with one exception: `pending_errors`, which the Event Bus's
//! `system:error` listener writes to from whatever thread published the
//! event (§5). That field alone needs a lock.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::event_bus::BackgroundErrorKind;

#[derive(Debug, Clone)]
pub struct BackgroundError {
    pub kind: BackgroundErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Success,
    Error,
}

#[derive(Debug, Clone)]
pub struct CompletedAction {
    pub tool: String,
    pub status: ActionStatus,
    pub summary: String,
}

/// Mutable state for one actor-critic run. A retry (§4.7
/// EVALUATE_TEXT_RESPONSE -> retry) spawns a derived context via
/// [`RequestContext::derive_retry`] rather than mutating this one in place,
/// so a checkpoint taken before the retry still describes the prior attempt.
pub struct RequestContext {
    pub id: Uuid,
    pub original_input: String,
    pub current_input: String,
    pub cancel: CancelToken,
    pub retrying: bool,
    pub retry_count: u32,
    pub dry_run: bool,
    pub max_turns: u32,
    pub turn_number: u32,
    pub tool_call_count: u32,
    pub completed_actions: Vec<CompletedAction>,
    pub errors: Vec<(String, String)>,
    pub pending_errors: Arc<Mutex<Vec<BackgroundError>>>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    started_at: Instant,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl RequestContext {
    pub fn new(input: impl Into<String>, max_turns: u32, dry_run: bool) -> Self {
        let input = input.into();
        Self {
            id: Uuid::new_v4(),
            original_input: input.clone(),
            current_input: input,
            cancel: CancelToken::new(),
            retrying: false,
            retry_count: 0,
            dry_run,
            max_turns,
            turn_number: 0,
            tool_call_count: 0,
            completed_actions: Vec::new(),
            errors: Vec::new(),
            pending_errors: Arc::new(Mutex::new(Vec::new())),
            metadata: serde_json::Map::new(),
            started_at: Instant::now(),
            start_time: Utc::now(),
            end_time: None,
        }
    }

    pub fn aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn throw_if_aborted(&self) -> Result<()> {
        if self.aborted() {
            Err(Error::Domain(agentcore_domain::error::Error::Cancelled))
        } else {
            Ok(())
        }
    }

    pub fn add_error(&mut self, phase: impl Into<String>, message: impl Into<String>) {
        self.errors.push((phase.into(), message.into()));
    }

    pub fn record_action(&mut self, tool: impl Into<String>, status: ActionStatus, summary: impl Into<String>) {
        self.completed_actions.push(CompletedAction {
            tool: tool.into(),
            status,
            summary: summary.into(),
        });
    }

    pub fn complete(&mut self) {
        self.end_time = Some(Utc::now());
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started_at.elapsed().as_millis()
    }

    /// Any errors the background `system:error` listener has recorded
    /// since the last drain, removing them from the pending queue.
    pub fn drain_pending_errors(&self) -> Vec<BackgroundError> {
        std::mem::take(&mut *self.pending_errors.lock())
    }

    pub fn push_pending_error(&self, kind: BackgroundErrorKind, message: impl Into<String>) {
        self.pending_errors.lock().push(BackgroundError {
            kind,
            message: message.into(),
            at: Utc::now(),
        });
    }

    /// Builds the context for a retry attempt (§4.7 EVALUATE_TEXT_RESPONSE
    /// -> retry). Shares only the cancellation handle with the parent;
    /// loop counters reset, `retry_count` carries forward incremented.
    pub fn derive_retry(&self, new_input: impl Into<String>) -> Self {
        let new_input = new_input.into();
        Self {
            id: Uuid::new_v4(),
            original_input: self.original_input.clone(),
            current_input: new_input,
            cancel: self.cancel.clone(),
            retrying: true,
            retry_count: self.retry_count + 1,
            dry_run: self.dry_run,
            max_turns: self.max_turns,
            turn_number: 0,
            tool_call_count: 0,
            completed_actions: Vec::new(),
            errors: Vec::new(),
            pending_errors: Arc::new(Mutex::new(Vec::new())),
            metadata: self.metadata.clone(),
            started_at: Instant::now(),
            start_time: Utc::now(),
            end_time: None,
        }
    }
}

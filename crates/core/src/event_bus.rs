//! Typed publish/subscribe for cross-component lifecycle notifications
//! (§4.1). The Agent State Machine's own transitions are a tagged-variant
//! driver loop, not bus traffic (§9) -- the bus exists only for the
//! topics enumerated in §6: `system:error`, `task:*`, `schedule:*`.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    SystemError,
    TaskSpawned,
    TaskStarted,
    TaskOutput,
    TaskProgress,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    ScheduleCreated,
    ScheduleFired,
    SchedulePaused,
    ScheduleResumed,
    ScheduleDeleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundErrorKind {
    UnhandledRejection,
    UncaughtException,
}

impl std::fmt::Display for BackgroundErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnhandledRejection => write!(f, "unhandledRejection"),
            Self::UncaughtException => write!(f, "uncaughtException"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    SystemError { kind: BackgroundErrorKind, message: String },
    TaskSpawned { task_id: Uuid },
    TaskStarted { task_id: Uuid },
    TaskOutput { task_id: Uuid, line: String },
    TaskProgress { task_id: Uuid, progress: u8 },
    TaskCompleted { task_id: Uuid },
    TaskFailed { task_id: Uuid },
    TaskCancelled { task_id: Uuid },
    ScheduleCreated { schedule_id: Uuid },
    ScheduleFired { schedule_id: Uuid, run_number: u64 },
    SchedulePaused { schedule_id: Uuid },
    ScheduleResumed { schedule_id: Uuid },
    ScheduleDeleted { schedule_id: Uuid },
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::SystemError { .. } => Topic::SystemError,
            Event::TaskSpawned { .. } => Topic::TaskSpawned,
            Event::TaskStarted { .. } => Topic::TaskStarted,
            Event::TaskOutput { .. } => Topic::TaskOutput,
            Event::TaskProgress { .. } => Topic::TaskProgress,
            Event::TaskCompleted { .. } => Topic::TaskCompleted,
            Event::TaskFailed { .. } => Topic::TaskFailed,
            Event::TaskCancelled { .. } => Topic::TaskCancelled,
            Event::ScheduleCreated { .. } => Topic::ScheduleCreated,
            Event::ScheduleFired { .. } => Topic::ScheduleFired,
            Event::SchedulePaused { .. } => Topic::SchedulePaused,
            Event::ScheduleResumed { .. } => Topic::ScheduleResumed,
            Event::ScheduleDeleted { .. } => Topic::ScheduleDeleted,
        }
    }
}

pub type ListenerId = u64;
type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Synchronous, in-process pub/sub. `publish` invokes listeners in
/// registration order on the calling thread; a panicking listener is
/// caught and logged so it never takes down the rest of the batch.
pub struct EventBus {
    listeners: RwLock<HashMap<Topic, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, topic: Topic, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .entry(topic)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, topic: Topic, id: ListenerId) {
        if let Some(list) = self.listeners.write().get_mut(&topic) {
            list.retain(|(lid, _)| *lid != id);
        }
    }

    /// Number of listeners currently attached to a topic. Used to assert
    /// I3 (listener count returns to baseline after terminal completion).
    pub fn listener_count(&self, topic: Topic) -> usize {
        self.listeners.read().get(&topic).map_or(0, Vec::len)
    }

    pub fn publish(&self, event: Event) {
        let topic = event.topic();
        let snapshot: Vec<Listener> = {
            let guard = self.listeners.read();
            guard.get(&topic).map(|v| v.iter().map(|(_, l)| l.clone()).collect()).unwrap_or_default()
        };

        for listener in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| listener(&event)));
            if result.is_err() {
                tracing::error!(?topic, "event bus listener panicked");
            }
        }
    }
}

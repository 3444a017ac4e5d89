//! Task Manager (§4.8, C8): background work spawned off the main request
//! path (e.g. a scheduled job, or a user asking for something long-running).
//! Each task races an assistant factory future against its own cancellation
//! handle (§5) so a cancelled task stops promptly instead of running to
//! completion unseen.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::Instrument;
use uuid::Uuid;

use crate::cancel::{CancelMap, CancelToken};
use crate::event_bus::{Event, EventBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// I6: once a task reaches a terminal state it never leaves it.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: Uuid,
    pub description: String,
    pub query: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub read: bool,
    pub output: VecDeque<String>,
    pub progress: u8,
    pub schedule_id: Option<Uuid>,
    pub run_number: Option<u64>,
}

impl TaskRecord {
    fn new(description: String, query: String, schedule_id: Option<Uuid>, run_number: Option<u64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            description,
            query,
            status: TaskStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            read: false,
            output: VecDeque::new(),
            progress: 0,
            schedule_id,
            run_number,
        }
    }
}

pub struct TaskManager {
    tasks: RwLock<HashMap<Uuid, TaskRecord>>,
    cancel: CancelMap,
    events: Arc<EventBus>,
    soft_cap: usize,
    output_cap: usize,
    in_flight: AtomicUsize,
}

impl TaskManager {
    pub fn new(events: Arc<EventBus>, soft_cap: usize, output_cap: usize) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            cancel: CancelMap::new(),
            events,
            soft_cap,
            output_cap,
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn soft_cap(&self) -> usize {
        self.soft_cap
    }

    /// Spawn `factory` as a background task. `factory` is given the task's
    /// cancellation token so it can check cooperative cancellation itself,
    /// on top of the race this method performs against the same token.
    ///
    /// The soft concurrency cap is advisory only (§12 open question): it is
    /// never enforced by rejecting the spawn, only logged when exceeded.
    /// Requires the manager be held as `Arc<TaskManager>` so the spawned
    /// task can write results back without borrowing `self`.
    pub fn spawn<F, Fut>(
        self: &Arc<Self>,
        description: impl Into<String>,
        query: impl Into<String>,
        schedule_id: Option<Uuid>,
        run_number: Option<u64>,
        factory: F,
    ) -> Uuid
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        let record = TaskRecord::new(description.into(), query.into(), schedule_id, run_number);
        let id = record.id;
        self.tasks.write().insert(id, record);

        let token = self.cancel.register(&id.to_string());
        self.events.publish(Event::TaskSpawned { task_id: id });

        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        if in_flight > self.soft_cap {
            tracing::warn!(task_id = %id, in_flight, soft_cap = self.soft_cap, "task concurrency above soft cap");
        }

        let manager = self.clone();
        let run_token = token.clone();
        tokio::spawn(
            async move {
                manager.mark_started(id);
                manager.events.publish(Event::TaskStarted { task_id: id });

                let result = tokio::select! {
                    biased;
                    _ = run_token.cancelled() => Err("cancelled".to_string()),
                    r = factory(run_token.clone()) => r,
                };

                match result {
                    Ok(output) if !run_token.is_cancelled() => {
                        manager.finish(id, TaskStatus::Completed, Some(output), None);
                        manager.events.publish(Event::TaskCompleted { task_id: id });
                    }
                    _ if run_token.is_cancelled() => {
                        manager.finish(id, TaskStatus::Cancelled, None, None);
                        manager.events.publish(Event::TaskCancelled { task_id: id });
                    }
                    Err(msg) => {
                        manager.finish(id, TaskStatus::Failed, None, Some(msg));
                        manager.events.publish(Event::TaskFailed { task_id: id });
                    }
                }
            }
            .instrument(tracing::info_span!("task.run", task_id = %id)),
        );

        id
    }

    fn mark_started(&self, id: Uuid) {
        if let Some(t) = self.tasks.write().get_mut(&id) {
            t.status = TaskStatus::Running;
            t.started_at = Some(Utc::now());
        }
    }

    fn finish(&self, id: Uuid, status: TaskStatus, result: Option<String>, error: Option<String>) {
        if let Some(t) = self.tasks.write().get_mut(&id) {
            if t.status.is_terminal() {
                return;
            }
            t.status = status;
            t.result = result;
            t.error = error;
            t.finished_at = Some(Utc::now());
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn get(&self, id: Uuid) -> Option<TaskRecord> {
        self.tasks.read().get(&id).cloned()
    }

    pub fn cancel(&self, id: Uuid) -> bool {
        self.cancel.cancel(&id.to_string())
    }

    pub fn append_output(&self, id: Uuid, line: impl Into<String>) {
        let line = line.into();
        if let Some(task) = self.tasks.write().get_mut(&id) {
            task.output.push_back(line.clone());
            while task.output.len() > self.output_cap {
                task.output.pop_front();
            }
        }
        self.events.publish(Event::TaskOutput { task_id: id, line });
    }

    pub fn update_progress(&self, id: Uuid, progress: u8) {
        let clamped = progress.min(100);
        if let Some(task) = self.tasks.write().get_mut(&id) {
            task.progress = clamped;
        }
        self.events.publish(Event::TaskProgress { task_id: id, progress: clamped });
    }

    pub fn completed_unread(&self) -> Vec<TaskRecord> {
        self.tasks
            .read()
            .values()
            .filter(|t| t.status.is_terminal() && !t.read)
            .cloned()
            .collect()
    }

    pub fn mark_read(&self, id: Uuid) {
        if let Some(task) = self.tasks.write().get_mut(&id) {
            task.read = true;
        }
    }

    /// Remove terminal tasks older than `max_age`.
    pub fn cleanup_old(&self, max_age: chrono::Duration) {
        let cutoff = Utc::now() - max_age;
        self.tasks.write().retain(|id, t| {
            let keep = !(t.status.is_terminal() && t.finished_at.map(|f| f < cutoff).unwrap_or(false));
            if !keep {
                self.cancel.remove(&id.to_string());
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<TaskManager> {
        Arc::new(TaskManager::new(Arc::new(EventBus::new()), 3, 1000))
    }

    #[tokio::test]
    async fn spawn_runs_to_completion() {
        let mgr = manager();
        let id = mgr.spawn("demo", "do it", None, None, |_token| async move {
            Ok("done".to_string())
        });

        for _ in 0..50 {
            if mgr.get(id).unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let task = mgr.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn cancel_before_factory_resolves_wins() {
        let mgr = manager();
        let id = mgr.spawn("demo", "do it", None, None, |token| async move {
            token.cancelled().await;
            Err("should not reach".to_string())
        });

        mgr.cancel(id);

        for _ in 0..50 {
            if mgr.get(id).unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert_eq!(mgr.get(id).unwrap().status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn output_buffer_caps_at_configured_length() {
        let mgr = Arc::new(TaskManager::new(Arc::new(EventBus::new()), 3, 2));
        let id = mgr.spawn("demo", "q", None, None, |_| async move { Ok("x".into()) });
        mgr.append_output(id, "a");
        mgr.append_output(id, "b");
        mgr.append_output(id, "c");
        let task = mgr.get(id).unwrap();
        assert_eq!(task.output.len(), 2);
        assert_eq!(task.output.front().unwrap(), "b");
    }

    #[test]
    fn progress_is_clamped_to_100() {
        let mgr = manager();
        let id = Uuid::new_v4();
        mgr.tasks.write().insert(id, TaskRecord::new("d".into(), "q".into(), None, None));
        mgr.update_progress(id, 150);
        assert_eq!(mgr.get(id).unwrap().progress, 100);
    }

    #[test]
    fn soft_cap_is_advisory_not_enforced() {
        let mgr = TaskManager::new(Arc::new(EventBus::new()), 1, 100);
        assert_eq!(mgr.soft_cap(), 1);
        // in_flight can legitimately exceed soft_cap; spawn never rejects.
    }
}

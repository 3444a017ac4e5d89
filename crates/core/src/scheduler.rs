//! Scheduler (§4.9, C9): interval-based recurring tasks, diverging from
//! the teacher's cron expressions per the redesign toward a simpler
//! `intervalMs` model. Persists to `.{app}/schedules.json` with an atomic
//! temp-file-plus-rename write, mirroring the Checkpoint Store's approach.
//!
//! Supplements the distilled spec with consecutive-failure cooldown
//! backoff (§11): each failed run doubles the cooldown window, capped at
//! `cooldown_cap_minutes`, reset to zero on the next success. This is pure
//! bookkeeping layered on top of the schedule record; it never changes
//! `status`, `run_count`, or the persistence contract.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::event_bus::{Event, EventBus, Topic};
use crate::task_manager::TaskManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Active,
    Paused,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub id: Uuid,
    pub description: String,
    pub query: String,
    pub interval_ms: u64,
    pub status: ScheduleStatus,
    pub skip_if_running: bool,
    pub max_runs: Option<u64>,
    pub run_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: DateTime<Utc>,
    pub last_task_id: Option<Uuid>,

    /// Supplemented bookkeeping (§11), not part of the distilled record shape.
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub cooldown_until: Option<DateTime<Utc>>,
}

pub struct Scheduler {
    schedules: RwLock<HashMap<Uuid, ScheduleRecord>>,
    tasks: Arc<TaskManager>,
    events: Arc<EventBus>,
    app_name: String,
    persist_path: RwLock<Option<PathBuf>>,
    cooldown_cap: Duration,
}

impl Scheduler {
    pub fn new(
        tasks: Arc<TaskManager>,
        events: Arc<EventBus>,
        app_name: impl Into<String>,
        persist_path: Option<PathBuf>,
        cooldown_cap_minutes: u64,
    ) -> Self {
        Self {
            schedules: RwLock::new(HashMap::new()),
            tasks,
            events,
            app_name: app_name.into(),
            persist_path: RwLock::new(persist_path),
            cooldown_cap: Duration::minutes(cooldown_cap_minutes as i64),
        }
    }

    /// Subscribes this scheduler to task completion/failure events so it
    /// can update consecutive-failure cooldowns. Returns a listener id the
    /// caller is responsible for unsubscribing if the scheduler is torn down.
    pub fn attach_cooldown_tracking(self: &Arc<Self>) {
        let completed = self.clone();
        self.events.subscribe(Topic::TaskCompleted, move |event| {
            if let Event::TaskCompleted { task_id } = event {
                completed.note_task_outcome(*task_id, true);
            }
        });
        let failed = self.clone();
        self.events.subscribe(Topic::TaskFailed, move |event| {
            if let Event::TaskFailed { task_id } = event {
                failed.note_task_outcome(*task_id, false);
            }
        });
    }

    fn note_task_outcome(&self, task_id: Uuid, success: bool) {
        let mut schedules = self.schedules.write();
        let Some(schedule) = schedules.values_mut().find(|s| s.last_task_id == Some(task_id)) else {
            return;
        };
        if success {
            schedule.consecutive_failures = 0;
            schedule.cooldown_until = None;
        } else {
            schedule.consecutive_failures += 1;
            let minutes = 2u64.saturating_pow(schedule.consecutive_failures.min(20));
            let cooldown = Duration::minutes(minutes as i64).min(self.cooldown_cap);
            schedule.cooldown_until = Some(Utc::now() + cooldown);
        }
        let snapshot = schedule.clone();
        drop(schedules);
        self.persist(&snapshot);
    }

    pub fn create(
        &self,
        description: impl Into<String>,
        query: impl Into<String>,
        interval_ms: u64,
        skip_if_running: bool,
        max_runs: Option<u64>,
    ) -> Result<Uuid> {
        if interval_ms < 1000 {
            return Err(Error::Validation("intervalMs must be >= 1000".into()));
        }

        let now = Utc::now();
        let record = ScheduleRecord {
            id: Uuid::new_v4(),
            description: description.into(),
            query: query.into(),
            interval_ms,
            status: ScheduleStatus::Active,
            skip_if_running,
            max_runs,
            run_count: 0,
            created_at: now,
            last_run_at: None,
            next_run_at: now + Duration::milliseconds(interval_ms as i64),
            last_task_id: None,
            consecutive_failures: 0,
            cooldown_until: None,
        };
        let id = record.id;
        self.schedules.write().insert(id, record.clone());
        self.events.publish(Event::ScheduleCreated { schedule_id: id });
        self.persist(&record);
        Ok(id)
    }

    pub fn get(&self, id: Uuid) -> Option<ScheduleRecord> {
        self.schedules.read().get(&id).cloned()
    }

    pub fn pause(&self, id: Uuid) -> bool {
        self.set_status(id, ScheduleStatus::Paused, Event::SchedulePaused { schedule_id: id })
    }

    /// Recomputes `next_run_at` from now rather than reusing whatever was
    /// last scheduled -- a schedule paused longer than its interval would
    /// otherwise look overdue and fire immediately on resume.
    pub fn resume(&self, id: Uuid) -> bool {
        let snapshot = {
            let mut schedules = self.schedules.write();
            let Some(schedule) = schedules.get_mut(&id) else { return false };
            schedule.status = ScheduleStatus::Active;
            schedule.next_run_at = Utc::now() + Duration::milliseconds(schedule.interval_ms as i64);
            schedule.clone()
        };
        self.events.publish(Event::ScheduleResumed { schedule_id: id });
        self.persist(&snapshot);
        true
    }

    /// Fires `id` immediately, bypassing the `next_run_at`/cooldown gate
    /// that `tick` applies. Returns `false` if the schedule doesn't exist.
    pub fn trigger_now<F, Fut>(self: &Arc<Self>, id: Uuid, spawn_factory: F) -> bool
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String, String>> + Send + 'static,
    {
        if self.schedules.read().get(&id).is_none() {
            return false;
        }
        self.fire_one(id, spawn_factory);
        true
    }

    /// Persists current schedules, clears in-memory state, repoints
    /// persistence at `.{app_name}/schedules.json` under `new_workspace_dir`,
    /// and restores from whatever is there.
    pub fn switch_workspace(&self, new_workspace_dir: impl AsRef<std::path::Path>) -> std::io::Result<()> {
        self.persist_all();
        self.schedules.write().clear();

        let new_path = new_workspace_dir.as_ref().join(format!(".{}", self.app_name)).join("schedules.json");
        let restored = Self::load_from_disk(&new_path)?;
        *self.persist_path.write() = Some(new_path);

        let mut schedules = self.schedules.write();
        for record in restored {
            schedules.insert(record.id, record);
        }
        Ok(())
    }

    fn set_status(&self, id: Uuid, status: ScheduleStatus, event: Event) -> bool {
        let snapshot = {
            let mut schedules = self.schedules.write();
            let Some(schedule) = schedules.get_mut(&id) else { return false };
            schedule.status = status;
            schedule.clone()
        };
        self.events.publish(event);
        self.persist(&snapshot);
        true
    }

    pub fn delete(&self, id: Uuid) -> bool {
        let removed = self.schedules.write().remove(&id).is_some();
        if removed {
            self.events.publish(Event::ScheduleDeleted { schedule_id: id });
            self.persist_all();
        }
        removed
    }

    /// Fire every schedule whose `next_run_at` has passed. Intended to be
    /// driven by an external interval driver (a `tokio::time::interval`
    /// loop), kept separate here so firing logic is independently testable.
    pub fn tick<F, Fut>(self: &Arc<Self>, now: DateTime<Utc>, spawn_factory: F)
    where
        F: Fn(String) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = Result<String, String>> + Send + 'static,
    {
        let due: Vec<Uuid> = self
            .schedules
            .read()
            .values()
            .filter(|s| s.status == ScheduleStatus::Active && s.next_run_at <= now)
            .filter(|s| s.cooldown_until.map(|c| c <= now).unwrap_or(true))
            .map(|s| s.id)
            .collect();

        for id in due {
            self.fire_one(id, spawn_factory.clone());
        }
    }

    fn fire_one<F, Fut>(self: &Arc<Self>, id: Uuid, spawn_factory: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String, String>> + Send + 'static,
    {
        let (query, skip_if_running, description, last_task_id) = {
            let schedules = self.schedules.read();
            let Some(s) = schedules.get(&id) else { return };
            (s.query.clone(), s.skip_if_running, s.description.clone(), s.last_task_id)
        };

        if skip_if_running {
            let still_running = last_task_id
                .and_then(|tid| self.tasks.get(tid))
                .map(|t| !t.status.is_terminal())
                .unwrap_or(false);
            if still_running {
                return;
            }
        }

        let run_number = {
            let mut schedules = self.schedules.write();
            let Some(s) = schedules.get_mut(&id) else { return };
            s.run_count += 1;
            s.last_run_at = Some(Utc::now());
            s.next_run_at = Utc::now() + Duration::milliseconds(s.interval_ms as i64);
            let run_number = s.run_count;
            if s.max_runs.map(|max| s.run_count >= max).unwrap_or(false) {
                s.status = ScheduleStatus::Paused;
            }
            run_number
        };

        let task_id = self.tasks.spawn(description, query.clone(), Some(id), Some(run_number), move |_token| {
            spawn_factory(query)
        });

        let snapshot = {
            let mut schedules = self.schedules.write();
            let Some(s) = schedules.get_mut(&id) else { return };
            s.last_task_id = Some(task_id);
            s.clone()
        };

        self.events.publish(Event::ScheduleFired { schedule_id: id, run_number });
        if snapshot.status == ScheduleStatus::Paused {
            self.events.publish(Event::SchedulePaused { schedule_id: id });
        }
        self.persist(&snapshot);
    }

    fn persist(&self, record: &ScheduleRecord) {
        self.schedules.write().insert(record.id, record.clone());
        self.persist_all();
    }

    fn persist_all(&self) {
        let Some(path) = self.persist_path.read().clone() else { return };
        let all: Vec<ScheduleRecord> = self.schedules.read().values().cloned().collect();
        if let Err(err) = write_atomic(&path, &all) {
            tracing::warn!(error = %err, "schedule persistence failed");
        }
    }

    pub fn load_from_disk(path: &std::path::Path) -> std::io::Result<Vec<ScheduleRecord>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

fn write_atomic(path: &std::path::Path, records: &[ScheduleRecord]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(records).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

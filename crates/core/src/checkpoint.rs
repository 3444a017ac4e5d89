//! Checkpoint Store (§4.5, C5): best-effort crash-recovery snapshots keyed
//! by request id. A write failure is logged and swallowed -- checkpointing
//! must never fail the request it's trying to protect.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use agentcore_domain::tool::Message;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    pub request_id: Uuid,
    pub turn_number: u32,
    pub tool_call_count: u32,
    pub original_input: String,
    pub model_id: String,
    pub retry_count: u32,
    pub max_turns: u32,
    pub status: String,
    pub history: Vec<Message>,
    pub taken_at: DateTime<Utc>,
}

pub struct CheckpointStore {
    enabled: bool,
    dir: PathBuf,
    snapshots: RwLock<HashMap<Uuid, CheckpointSnapshot>>,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            enabled,
            dir: dir.into(),
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(PathBuf::new(), false)
    }

    /// Record a snapshot and attempt to persist it. Returns immediately
    /// when disabled.
    pub fn checkpoint_request(&self, snapshot: CheckpointSnapshot) {
        if !self.enabled {
            return;
        }
        let id = snapshot.request_id;
        self.snapshots.write().insert(id, snapshot.clone());
        if let Err(err) = self.persist(&snapshot) {
            tracing::warn!(request_id = %id, error = %err, "checkpoint write failed");
        }
    }

    pub fn get(&self, request_id: Uuid) -> Option<CheckpointSnapshot> {
        self.snapshots.read().get(&request_id).cloned()
    }

    /// A request reached a terminal state; its checkpoint is no longer
    /// needed for recovery.
    pub fn complete_request(&self, request_id: Uuid) {
        if !self.enabled {
            return;
        }
        self.snapshots.write().remove(&request_id);
        let path = self.path_for(request_id);
        if path.exists() {
            if let Err(err) = std::fs::remove_file(&path) {
                tracing::warn!(request_id = %request_id, error = %err, "checkpoint cleanup failed");
            }
        }
    }

    fn path_for(&self, request_id: Uuid) -> PathBuf {
        self.dir.join(format!("{request_id}.json"))
    }

    fn persist(&self, snapshot: &CheckpointSnapshot) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let final_path = self.path_for(snapshot.request_id);
        let tmp_path = final_path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&tmp_path, body)?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    pub fn load_from_disk(&self, request_id: Uuid) -> Option<CheckpointSnapshot> {
        let path = self.path_for(request_id);
        read_snapshot(&path)
    }
}

fn read_snapshot(path: &Path) -> Option<CheckpointSnapshot> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: Uuid) -> CheckpointSnapshot {
        CheckpointSnapshot {
            request_id: id,
            turn_number: 3,
            tool_call_count: 1,
            original_input: "do the thing".into(),
            model_id: "gpt-test".into(),
            retry_count: 0,
            max_turns: 30,
            status: "running".into(),
            history: vec![Message::user("do the thing")],
            taken_at: Utc::now(),
        }
    }

    #[test]
    fn disabled_store_never_writes() {
        let store = CheckpointStore::disabled();
        let id = Uuid::new_v4();
        store.checkpoint_request(sample(id));
        assert!(store.get(id).is_none());
    }

    #[test]
    fn enabled_store_persists_and_loads() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), true);
        let id = Uuid::new_v4();
        store.checkpoint_request(sample(id));

        assert!(store.get(id).is_some());
        let loaded = store.load_from_disk(id).expect("checkpoint file should exist");
        assert_eq!(loaded.turn_number, 3);
    }

    #[test]
    fn complete_request_removes_snapshot_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), true);
        let id = Uuid::new_v4();
        store.checkpoint_request(sample(id));
        store.complete_request(id);

        assert!(store.get(id).is_none());
        assert!(store.load_from_disk(id).is_none());
    }
}

//! Runtime policy constants, exposed as configuration rather than
//! hardcoded (§9 design note). `RuntimeConfig::default()` reproduces every
//! constant the specification names; override via TOML for anything else.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Fixed set of tool names whose successful completion likely finishes
/// the task (Glossary: Completion tools).
pub fn default_completion_tools() -> Vec<String> {
    [
        "speak_text",
        "evaluate_math",
        "web_search",
        "generate_image",
        "update_surface_component",
        "create_surface",
        "attempt_completion",
        "write_file",
        "create_file",
        "execute_command",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// App name used in the schedule persistence path `.{app}/schedules.json`.
    pub app_name: String,

    // ── Text-response critic thresholds (§4.7) ──────────────────────
    pub fast_path_input_chars: usize,
    pub fast_path_response_chars: usize,
    pub brief_input_chars: usize,
    pub brief_response_chars: usize,

    // ── Tool critic thresholds ───────────────────────────────────────
    pub max_tool_calls_soft_limit: u32,
    pub turns_remaining_for_correction: u32,

    // ── Loop bounds ───────────────────────────────────────────────────
    pub max_retries: u32,
    pub max_turns: u32,
    pub completion_tools: Vec<String>,

    // ── Model Client defaults ────────────────────────────────────────
    pub default_timeout_secs: u64,
    pub default_temperature: f32,

    // ── History Store ─────────────────────────────────────────────────
    pub context_window_budget_chars: usize,

    // ── Task Manager ──────────────────────────────────────────────────
    pub soft_task_concurrency: usize,
    pub task_output_log_cap: usize,

    // ── Scheduler ───────────────────────────────────────────────────────
    pub min_schedule_interval_ms: u64,
    pub cooldown_cap_minutes: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            app_name: "agentcore".into(),
            fast_path_input_chars: 50,
            fast_path_response_chars: 20,
            brief_input_chars: 200,
            brief_response_chars: 30,
            max_tool_calls_soft_limit: 25,
            turns_remaining_for_correction: 2,
            max_retries: 2,
            max_turns: 30,
            completion_tools: default_completion_tools(),
            default_timeout_secs: 120,
            default_temperature: 0.7,
            context_window_budget_chars: 32_000,
            soft_task_concurrency: 3,
            task_output_log_cap: 1000,
            min_schedule_interval_ms: 1000,
            cooldown_cap_minutes: 24 * 60,
        }
    }
}

impl RuntimeConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(agentcore_domain::error::Error::from)?;
        toml::from_str(&contents).map_err(|e| Error::Validation(e.to_string()))
    }

    /// Load from `path` if it exists, falling back to defaults otherwise.
    /// A malformed file is still an error -- only a missing one is not.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.fast_path_input_chars, 50);
        assert_eq!(cfg.fast_path_response_chars, 20);
        assert_eq!(cfg.brief_input_chars, 200);
        assert_eq!(cfg.brief_response_chars, 30);
        assert_eq!(cfg.max_tool_calls_soft_limit, 25);
        assert_eq!(cfg.max_retries, 2);
        assert_eq!(cfg.max_turns, 30);
        assert_eq!(cfg.soft_task_concurrency, 3);
        assert_eq!(cfg.task_output_log_cap, 1000);
        assert_eq!(cfg.default_timeout_secs, 120);
        assert!((cfg.default_temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(cfg.completion_tools.len(), 10);
    }

    #[test]
    fn load_or_default_missing_file_is_default() {
        let cfg = RuntimeConfig::load_or_default(Path::new("/nonexistent/agentcore.toml")).unwrap();
        assert_eq!(cfg.max_turns, 30);
    }

    #[test]
    fn from_file_parses_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agentcore.toml");
        std::fs::write(&path, "max_turns = 10\n").unwrap();
        let cfg = RuntimeConfig::from_file(&path).unwrap();
        assert_eq!(cfg.max_turns, 10);
        // Unset fields keep their defaults via #[serde(default)].
        assert_eq!(cfg.fast_path_input_chars, 50);
    }
}

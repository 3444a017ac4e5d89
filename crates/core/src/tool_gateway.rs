//! Tool Gateway (§4.6, C6): a generic name-indexed registry of tool
//! handlers. The tool catalog itself (which tools exist, what they do) is
//! out of scope here -- this module only dispatches.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::cancel::CancelToken;

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value) -> Result<Value, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOutcome {
    Success,
    Error,
}

#[derive(Debug, Clone)]
pub struct ToolExecution {
    pub outcome: ToolOutcome,
    pub output: String,
}

/// Classify a tool result by a structured `error:` prefix, not by a
/// substring match on words like "failed" -- free-text tool output that
/// happens to mention failure elsewhere must not be misclassified.
fn classify(text: &str) -> ToolOutcome {
    if text.trim_start().to_lowercase().starts_with("error:") {
        ToolOutcome::Error
    } else {
        ToolOutcome::Success
    }
}

pub struct ToolGateway {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl Default for ToolGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolGateway {
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Invoke a tool by name. Checks cancellation before doing anything
    /// else, then parses string arguments as JSON if needed, then
    /// stringifies non-text return values for the transcript.
    pub async fn execute(&self, cancel: &CancelToken, name: &str, args: Value) -> ToolExecution {
        if cancel.is_cancelled() {
            return ToolExecution {
                outcome: ToolOutcome::Error,
                output: "Error: Tool execution cancelled by user.".into(),
            };
        }

        let Some(handler) = self.handlers.get(name) else {
            return ToolExecution {
                outcome: ToolOutcome::Error,
                output: format!("Error: unknown tool \"{name}\"."),
            };
        };

        let args = match args {
            Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
            other => other,
        };

        match handler.call(args).await {
            Ok(value) => {
                let text = value_to_text(&value);
                let outcome = classify(&text);
                ToolExecution { outcome, output: text }
            }
            Err(message) => {
                let text = if message.to_lowercase().starts_with("error:") {
                    message
                } else {
                    format!("Error: {message}")
                };
                ToolExecution { outcome: ToolOutcome::Error, output: text }
            }
        }
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

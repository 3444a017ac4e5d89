//! Model Client (§4.3, C3): a provider-agnostic layer on top of
//! `agentcore_providers::traits::LlmProvider` that owns prompt assembly,
//! JSON coaxing, deadline/cancellation racing, the empty-response
//! fallback, and history updates. The Agent State Machine calls through
//! here rather than the raw transport trait directly.

use std::sync::Arc;
use std::time::Duration;

use agentcore_domain::tool::{Message, ToolCall, ToolDefinition};
use agentcore_providers::traits::{ChatRequest, ChatResponse, LlmProvider};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::history::HistoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AskFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    pub format: AskFormat,
    pub json_schema: Option<serde_json::Value>,
    pub tools: Vec<ToolDefinition>,
    pub system_prompt_override: Option<String>,
    pub temperature: Option<f32>,
    /// Only honored by [`ModelClient::ask`]; `ask_with_messages` always
    /// forces this off (§4.3: it never touches the History Store).
    pub record_history: bool,
}

#[derive(Debug, Clone)]
pub enum Answer {
    Text(String),
    Json(serde_json::Value),
    ToolCall { content: String, tool_calls: Vec<ToolCall> },
}

/// Wraps a transport adapter with the assembly/coaxing/timeout/history
/// contract of §4.3. Holds no mutable state of its own.
pub struct ModelClient {
    provider: Arc<dyn LlmProvider>,
    timeout: Duration,
}

impl ModelClient {
    pub fn new(provider: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Assembles `[optional system] + stored history + {user, prompt}`,
    /// calls the provider, and on success (when `options.record_history`
    /// is set) appends the user prompt then the assistant reply to
    /// `history`. This is the only `ask*` variant that ever mutates history.
    pub async fn ask(
        &self,
        history: &HistoryStore,
        prompt: impl Into<String>,
        cancel: &CancelToken,
        options: AskOptions,
    ) -> Result<Answer> {
        let prompt = self.coax_prompt(prompt.into(), &options);

        let mut messages = history.get();
        if let Some(system) = &options.system_prompt_override {
            messages.insert(0, Message::system(system.clone()));
        }
        messages.push(Message::user(prompt.clone()));

        let response = self.call(messages, cancel, &options).await?;

        if options.record_history {
            history.append(Message::user(prompt));
            self.append_assistant(history, &response);
        }

        Ok(self.to_answer(response, &options))
    }

    /// Calls with a caller-assembled message array, bypassing the History
    /// Store entirely (§4.3 `askWithMessages`). `options.record_history` is
    /// forced to `false` regardless of what the caller passed in.
    pub async fn ask_with_messages(
        &self,
        mut messages: Vec<Message>,
        cancel: &CancelToken,
        mut options: AskOptions,
    ) -> Result<Answer> {
        options.record_history = false;
        if let Some(system) = &options.system_prompt_override {
            messages.insert(0, Message::system(system.clone()));
        }
        let response = self.call(messages, cancel, &options).await?;
        Ok(self.to_answer(response, &options))
    }

    /// Races the provider call against the configured deadline and the
    /// caller's cancellation handle; either aborts the underlying
    /// transport future without waiting for it to resolve.
    async fn call(&self, messages: Vec<Message>, cancel: &CancelToken, options: &AskOptions) -> Result<ChatResponse> {
        let req = ChatRequest {
            messages,
            tools: options.tools.clone(),
            temperature: options.temperature,
            max_tokens: None,
            json_mode: matches!(options.format, AskFormat::Json) && options.json_schema.is_none(),
            json_schema: options.json_schema.clone(),
            model: None,
        };

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::Domain(agentcore_domain::error::Error::Cancelled));
            }
            _ = tokio::time::sleep(self.timeout) => {
                return Err(Error::Domain(agentcore_domain::error::Error::Timeout(
                    format!("model request exceeded {:?}", self.timeout),
                )));
            }
            result = self.provider.chat(&req) => result.map_err(Error::Domain)?,
        };

        Ok(empty_response_fallback(response))
    }

    /// §4.3: "if `format=json` and no schema, append a terse 'return valid
    /// JSON only' suffix to the user prompt." A schema is attached as a
    /// structured field on the request instead, so it needs no textual nudge.
    fn coax_prompt(&self, prompt: String, options: &AskOptions) -> String {
        if matches!(options.format, AskFormat::Json) && options.json_schema.is_none() {
            format!("{prompt}\n\nReturn valid JSON only.")
        } else {
            prompt
        }
    }

    fn append_assistant(&self, history: &HistoryStore, response: &ChatResponse) {
        if response.tool_calls.is_empty() {
            history.append(Message::assistant(response.content.clone()));
        } else {
            history.append(Message::assistant_with_tool_calls(&response.content, &response.tool_calls));
        }
    }

    fn to_answer(&self, response: ChatResponse, options: &AskOptions) -> Answer {
        if !response.tool_calls.is_empty() {
            return Answer::ToolCall { content: response.content, tool_calls: response.tool_calls };
        }
        match options.format {
            AskFormat::Json => Answer::Json(strip_fences_and_parse(&response.content)),
            AskFormat::Text => Answer::Text(response.content),
        }
    }
}

/// §4.3: "if the provider returns neither content nor tool-calls,
/// substitute a placeholder so history is always well-formed."
fn empty_response_fallback(mut response: ChatResponse) -> ChatResponse {
    if response.content.trim().is_empty() && response.tool_calls.is_empty() {
        response.content = "no response generated".to_string();
    }
    response
}

/// Strips fenced code markers before parsing; on failure returns a
/// `{error, raw}` value rather than raising, so a malformed classifier or
/// JSON-mode reply never aborts the caller (§4.3).
pub fn strip_fences_and_parse(content: &str) -> serde_json::Value {
    let cleaned = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    serde_json::from_str(cleaned).unwrap_or_else(|_| {
        serde_json::json!({ "error": "JSON parse failed", "raw": content })
    })
}

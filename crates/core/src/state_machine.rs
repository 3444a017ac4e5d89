//! Agent State Machine (§4.7, C7): the actor-critic loop. A one-shot
//! classifier runs before the loop, then turns alternate between the actor
//! (one LLM call, optionally proposing tool calls) and a critic that
//! decides whether tool results warrant another round and whether a text
//! answer is good enough to return.

use std::sync::Arc;
use std::time::Duration;

use agentcore_domain::tool::{Message, ToolCall, ToolDefinition};
use agentcore_providers::traits::LlmProvider;
use serde::Deserialize;
use tracing::Instrument;

use crate::checkpoint::{CheckpointSnapshot, CheckpointStore};
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::event_bus::{Event, EventBus, Topic};
use crate::history::HistoryStore;
use crate::model_client::{Answer, AskFormat, AskOptions, ModelClient};
use crate::request_context::{ActionStatus, RequestContext};
use crate::tool_gateway::{ToolGateway, ToolOutcome};

#[derive(Debug, Clone)]
pub enum AgentOutcome {
    Completed { response: String },
    Clarify { question: String },
    Cancelled,
}

/// Detaches the `system:error` listener on drop so every exit path --
/// including early returns and cancellation -- leaves the Event Bus's
/// listener count at its pre-run baseline (I3).
struct BackgroundErrorGuard<'a> {
    events: &'a EventBus,
    id: crate::event_bus::ListenerId,
}

impl Drop for BackgroundErrorGuard<'_> {
    fn drop(&mut self) {
        self.events.unsubscribe(Topic::SystemError, self.id);
    }
}

pub struct AgentStateMachine {
    provider: Arc<dyn LlmProvider>,
    model_client: ModelClient,
    events: Arc<EventBus>,
    checkpoints: Arc<CheckpointStore>,
    config: RuntimeConfig,
}

/// The precheck's fixed classifier prompt (§4.7 "Pre-check (critic)").
/// Kept as a constant rather than built per-call since it never varies
/// with the request.
const PRECHECK_SYSTEM_PROMPT: &str = r#"You are the pre-check classifier for an autonomous agent. \
Given the user's message, decide one of three outcomes:
- FAST_PATH: the message can be answered directly, in full, with no tools and no clarification. Put the complete answer in `response`.
- CLARIFY: the message is too ambiguous or incomplete to act on. Put the question to ask the user in `question`.
- PROCEED: the message needs the full actor-critic loop (tools, multiple turns, or careful reasoning).
Respond with JSON only, matching the schema you were given. When in doubt, choose PROCEED."#;

fn precheck_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "status": { "type": "string", "enum": ["FAST_PATH", "CLARIFY", "PROCEED"] },
            "response": { "type": "string" },
            "question": { "type": "string" },
            "reasoning": { "type": "string" },
        },
        "required": ["status"],
    })
}

#[derive(Debug, Deserialize)]
struct PrecheckResult {
    status: String,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    question: Option<String>,
}

enum Precheck {
    FastPath(String),
    Clarify(String),
    Proceed,
}

impl AgentStateMachine {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        events: Arc<EventBus>,
        checkpoints: Arc<CheckpointStore>,
        config: RuntimeConfig,
    ) -> Self {
        let model_client = ModelClient::new(provider.clone(), Duration::from_secs(config.default_timeout_secs));
        Self { provider, model_client, events, checkpoints, config }
    }

    pub async fn run(
        &self,
        history: &HistoryStore,
        tools: &ToolGateway,
        tool_defs: &[ToolDefinition],
        ctx: &mut RequestContext,
    ) -> Result<AgentOutcome> {
        let pending = ctx.pending_errors.clone();
        let listener_id = self.events.subscribe(Topic::SystemError, move |event| {
            if let Event::SystemError { kind, message } = event {
                pending.lock().push(crate::request_context::BackgroundError {
                    kind: *kind,
                    message: message.clone(),
                    at: chrono::Utc::now(),
                });
            }
        });
        let _guard = BackgroundErrorGuard { events: &self.events, id: listener_id };

        if ctx.current_input.trim().is_empty() {
            return Ok(AgentOutcome::Clarify {
                question: "Could you say a bit more about what you'd like done?".into(),
            });
        }

        history.append(Message::user(ctx.current_input.clone()));

        ctx.throw_if_aborted()?;
        match self.precheck(ctx).await {
            Precheck::FastPath(response) => {
                history.append(Message::assistant(response.clone()));
                ctx.complete();
                self.checkpoint(history, ctx, "completed");
                return Ok(AgentOutcome::Completed { response });
            }
            Precheck::Clarify(question) => {
                ctx.complete();
                return Ok(AgentOutcome::Clarify { question });
            }
            Precheck::Proceed => {}
        }

        let mut guidance: Option<String> = None;

        loop {
            if ctx.aborted() {
                self.checkpoint(history, ctx, "cancelled");
                return Ok(AgentOutcome::Cancelled);
            }

            if ctx.turn_number >= ctx.max_turns {
                self.checkpoint(history, ctx, "max_turns");
                ctx.complete();
                return Ok(AgentOutcome::Completed {
                    response: "Could not complete within allowed turns.".into(),
                });
            }

            // Turn 0's user input is already in history (appended above), so
            // that turn goes through `ask_with_messages` and this function
            // appends the assistant reply itself. Turn >= 1 introduces a
            // fresh continuation-block prompt each round, which `ask`
            // appends to history together with the reply on success.
            let is_first_turn = ctx.turn_number == 0;
            let ask_options = AskOptions {
                format: AskFormat::Text,
                tools: tool_defs.to_vec(),
                temperature: Some(self.config.default_temperature),
                system_prompt_override: self.assemble_system_block(ctx),
                record_history: !is_first_turn,
                ..Default::default()
            };

            let span = tracing::info_span!("agent.turn", request_id = %ctx.id, turn = ctx.turn_number);
            let answer = if is_first_turn {
                self.model_client
                    .ask_with_messages(history.get(), &ctx.cancel, ask_options)
                    .instrument(span)
                    .await?
            } else {
                let prompt = self.build_continuation_block(ctx, guidance.take());
                self.model_client.ask(history, prompt, &ctx.cancel, ask_options).instrument(span).await?
            };

            ctx.turn_number += 1;

            let (content, tool_calls) = match answer {
                Answer::Text(content) => (content, Vec::new()),
                Answer::Json(_) => unreachable!("the agent loop never requests AskFormat::Json"),
                Answer::ToolCall { content, tool_calls } => (content, tool_calls),
            };

            if tool_calls.is_empty() {
                match self.evaluate_text_response(ctx, &content) {
                    TextVerdict::Accept => {
                        if is_first_turn {
                            history.append(Message::assistant(content.clone()));
                        }
                        ctx.complete();
                        self.checkpoint(history, ctx, "completed");
                        return Ok(AgentOutcome::Completed { response: content });
                    }
                    TextVerdict::Retry(reason) => {
                        if ctx.retry_count >= self.config.max_retries {
                            if is_first_turn {
                                history.append(Message::assistant(content.clone()));
                            }
                            ctx.complete();
                            self.checkpoint(history, ctx, "completed");
                            return Ok(AgentOutcome::Completed { response: content });
                        }
                        if is_first_turn {
                            history.append(Message::assistant(content));
                        }
                        *ctx = ctx.derive_retry(ctx.current_input.clone());
                        guidance = Some(format!("[QUALITY CHECK FAILED] {reason}"));
                        continue;
                    }
                }
            }

            if is_first_turn {
                history.append(Message::assistant_with_tool_calls(&content, &tool_calls));
            }

            for call in &tool_calls {
                if ctx.aborted() {
                    self.checkpoint(history, ctx, "cancelled");
                    return Ok(AgentOutcome::Cancelled);
                }

                let exec = tools.execute(&ctx.cancel, &call.tool_name, call.arguments.clone()).await;
                ctx.tool_call_count += 1;

                let status = match exec.outcome {
                    ToolOutcome::Success => ActionStatus::Success,
                    ToolOutcome::Error => {
                        ctx.add_error(call.tool_name.clone(), exec.output.clone());
                        ActionStatus::Error
                    }
                };
                let summary = summarize_tool_output(&exec.output);
                ctx.record_action(call.tool_name.clone(), status, summary);
                history.append(Message::tool_result(call.call_id.clone(), exec.output));
            }

            self.checkpoint(history, ctx, "post_tools");

            guidance = match self.evaluate_tools(ctx, &tool_calls) {
                ToolVerdict::Correct => Some("finalize".to_string()),
                ToolVerdict::Wrapup => Some("summarize".to_string()),
                ToolVerdict::Continue => None,
            };
        }
    }

    /// Runs the one-shot classifier described in §4.7 "Pre-check (critic)".
    /// This call never touches the History Store (`recordHistory=false`):
    /// its own messages are local to this function. On PROCEED, or on any
    /// transport/parse failure, falls through to the full loop.
    async fn precheck(&self, ctx: &RequestContext) -> Precheck {
        let span = tracing::info_span!("agent.precheck", request_id = %ctx.id);
        let messages = vec![Message::system(PRECHECK_SYSTEM_PROMPT), Message::user(ctx.current_input.clone())];
        let options = AskOptions {
            format: AskFormat::Json,
            json_schema: Some(precheck_schema()),
            temperature: Some(0.0),
            record_history: false,
            ..Default::default()
        };

        let answer = self
            .model_client
            .ask_with_messages(messages, &ctx.cancel, options)
            .instrument(span)
            .await;

        let value = match answer {
            Ok(Answer::Json(value)) => value,
            Ok(Answer::Text(_)) | Ok(Answer::ToolCall { .. }) | Err(_) => return Precheck::Proceed,
        };

        let parsed: std::result::Result<PrecheckResult, _> = serde_json::from_value(value);
        match parsed {
            Ok(PrecheckResult { status, response: Some(response), .. }) if status == "FAST_PATH" => {
                Precheck::FastPath(response)
            }
            Ok(PrecheckResult { status, question: Some(question), .. }) if status == "CLARIFY" => {
                Precheck::Clarify(question)
            }
            _ => Precheck::Proceed,
        }
    }

    /// Composes the turn ≥ 2 continuation block (§4.7 "Prompt assembly
    /// inside the loop"): original task, turn counter, pending tool errors
    /// (cleared once presented), a bounded tail of completed actions, the
    /// continue instruction, and a `[GUIDANCE]: ...` prefix when a critic
    /// has steered the next turn.
    fn build_continuation_block(&self, ctx: &mut RequestContext, guidance: Option<String>) -> String {
        let mut parts = Vec::new();

        if let Some(g) = guidance {
            parts.push(format!("[GUIDANCE]: {g}"));
        }

        parts.push(format!("Original task: {}", ctx.original_input));
        parts.push(format!("Turn: {}", ctx.turn_number + 1));

        let errors = std::mem::take(&mut ctx.errors);
        if !errors.is_empty() {
            let lines: Vec<String> = errors.iter().map(|(tool, msg)| format!("- {tool}: {msg}")).collect();
            parts.push(format!("ERRORS YOU MUST ADDRESS:\n{}", lines.join("\n")));
        }

        let tail_len = ctx.completed_actions.len().saturating_sub(5);
        let tail = &ctx.completed_actions[tail_len..];
        if !tail.is_empty() {
            let lines: Vec<String> = tail
                .iter()
                .map(|a| format!("- {} ({:?}): {}", a.tool, a.status, a.summary))
                .collect();
            parts.push(format!("Recent actions:\n{}", lines.join("\n")));
        }

        parts.push("Review the tool results above and continue.".to_string());
        parts.join("\n\n")
    }

    /// Deduplicated `[SYSTEM WARNING]` block for background `system:error`
    /// events recorded since the last turn (§4.7 "Background error
    /// injection").
    fn assemble_system_block(&self, ctx: &RequestContext) -> Option<String> {
        let errors = ctx.drain_pending_errors();
        if errors.is_empty() {
            return None;
        }
        let mut seen = std::collections::HashSet::new();
        let mut lines = Vec::new();
        for e in errors {
            if seen.insert((e.kind as u8, e.message.clone())) {
                lines.push(format!("[SYSTEM WARNING] {}: {}", e.kind, e.message));
            }
        }
        Some(lines.join("\n"))
    }

    fn evaluate_text_response(&self, ctx: &RequestContext, content: &str) -> TextVerdict {
        let input_chars = ctx.original_input.chars().count();
        let response_chars = content.chars().count();

        if input_chars < self.config.fast_path_input_chars && response_chars > self.config.fast_path_response_chars {
            return TextVerdict::Accept;
        }

        if input_chars > self.config.brief_input_chars && response_chars < self.config.brief_response_chars {
            return TextVerdict::Retry("that answer is too brief for the detail requested".into());
        }

        let lower = content.to_lowercase();
        let refuses = lower.contains("i can't") || lower.contains("i cannot");
        let justified = lower.contains("because") || lower.contains("however");
        if refuses && !justified {
            return TextVerdict::Retry("explain why, or propose an alternative".into());
        }

        TextVerdict::Accept
    }

    fn evaluate_tools(&self, ctx: &RequestContext, tool_calls: &[ToolCall]) -> ToolVerdict {
        if ctx.tool_call_count > self.config.max_tool_calls_soft_limit
            || ctx.turn_number + self.config.turns_remaining_for_correction >= ctx.max_turns
        {
            return ToolVerdict::Correct;
        }

        let completed_a_completion_tool =
            tool_calls.iter().any(|c| self.config.completion_tools.iter().any(|name| name == &c.tool_name));

        if completed_a_completion_tool {
            ToolVerdict::Wrapup
        } else {
            ToolVerdict::Continue
        }
    }

    fn checkpoint(&self, history: &HistoryStore, ctx: &RequestContext, status: &str) {
        self.checkpoints.checkpoint_request(CheckpointSnapshot {
            request_id: ctx.id,
            turn_number: ctx.turn_number,
            tool_call_count: ctx.tool_call_count,
            original_input: ctx.original_input.clone(),
            model_id: self.provider.provider_id().to_string(),
            retry_count: ctx.retry_count,
            max_turns: ctx.max_turns,
            status: status.to_string(),
            history: history.get(),
            taken_at: chrono::Utc::now(),
        });
    }
}

enum TextVerdict {
    Accept,
    Retry(String),
}

enum ToolVerdict {
    Continue,
    Wrapup,
    Correct,
}

/// Tool output summaries stay verbatim up to 150 chars; beyond that, the
/// first 149 chars plus an ellipsis (150 chars total).
pub fn summarize_tool_output(output: &str) -> String {
    let chars: Vec<char> = output.chars().collect();
    if chars.len() <= 150 {
        output.to_string()
    } else {
        let mut s: String = chars[..149].iter().collect();
        s.push('…');
        s
    }
}


#[cfg(test)]
mod end_to_end {
    use super::*;
    use agentcore_domain::error::Result as DomainResult;
    use agentcore_domain::stream::{BoxStream, StreamEvent};
    use agentcore_providers::traits::{ChatRequest, ChatResponse};
    use async_trait::async_trait;
    use parking_lot::Mutex as PMutex;
    use std::collections::VecDeque;

    use crate::cancel::CancelToken;

    /// A scripted `LlmProvider` double: each call to `chat` pops the next
    /// queued response. Panics if the script runs dry, so a test's turn
    /// count must match what it scripts.
    struct ScriptedProvider {
        script: PMutex<VecDeque<ChatResponse>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<ChatResponse>) -> Self {
            Self { script: PMutex::new(responses.into()) }
        }
    }

    fn text_response(content: &str) -> ChatResponse {
        ChatResponse {
            content: content.to_string(),
            tool_calls: Vec::new(),
            usage: None,
            model: "scripted".into(),
            finish_reason: Some("stop".into()),
        }
    }

    fn tool_call_response(tool_name: &str, call_id: &str) -> ChatResponse {
        ChatResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                call_id: call_id.into(),
                tool_name: tool_name.into(),
                arguments: serde_json::json!({}),
            }],
            usage: None,
            model: "scripted".into(),
            finish_reason: Some("tool_calls".into()),
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat(&self, _req: &ChatRequest) -> DomainResult<ChatResponse> {
            Ok(self.script.lock().pop_front().expect("scripted provider ran out of responses"))
        }

        async fn chat_stream(&self, _req: &ChatRequest) -> DomainResult<BoxStream<'static, DomainResult<StreamEvent>>> {
            unimplemented!("not exercised by these tests")
        }

        fn provider_id(&self) -> &str {
            "scripted"
        }
    }

    struct EchoTool;

    #[async_trait]
    impl crate::tool_gateway::ToolHandler for EchoTool {
        async fn call(&self, _args: serde_json::Value) -> std::result::Result<serde_json::Value, String> {
            Ok(serde_json::json!("ok"))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl crate::tool_gateway::ToolHandler for FailingTool {
        async fn call(&self, _args: serde_json::Value) -> std::result::Result<serde_json::Value, String> {
            Ok(serde_json::json!("error: the widget jammed"))
        }
    }

    fn machine(provider: ScriptedProvider, config: RuntimeConfig) -> AgentStateMachine {
        AgentStateMachine::new(Arc::new(provider), Arc::new(EventBus::new()), Arc::new(CheckpointStore::disabled()), config)
    }

    #[tokio::test]
    async fn precheck_fast_path_skips_the_loop() {
        let precheck = serde_json::json!({ "status": "FAST_PATH", "response": "Paris." }).to_string();
        let sm = machine(ScriptedProvider::new(vec![text_response(&precheck)]), RuntimeConfig::default());
        let history = HistoryStore::new(32_000);
        let tools = ToolGateway::new();
        let mut ctx = RequestContext::new("What is the capital of France?", 30, false);

        let outcome = sm.run(&history, &tools, &[], &mut ctx).await.unwrap();
        match outcome {
            AgentOutcome::Completed { response } => assert_eq!(response, "Paris."),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn precheck_clarify_returns_a_question_without_entering_the_loop() {
        let precheck = serde_json::json!({ "status": "CLARIFY", "question": "Which file?" }).to_string();
        let sm = machine(ScriptedProvider::new(vec![text_response(&precheck)]), RuntimeConfig::default());
        let history = HistoryStore::new(32_000);
        let tools = ToolGateway::new();
        let mut ctx = RequestContext::new("fix it", 30, false);

        let outcome = sm.run(&history, &tools, &[], &mut ctx).await.unwrap();
        match outcome {
            AgentOutcome::Clarify { question } => assert_eq!(question, "Which file?"),
            other => panic!("expected Clarify, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn precheck_proceed_falls_through_to_one_tool_round_then_an_answer() {
        let precheck = serde_json::json!({ "status": "PROCEED" }).to_string();
        let sm = machine(
            ScriptedProvider::new(vec![
                text_response(&precheck),
                tool_call_response("attempt_completion", "call-1"),
                text_response("Here is the final answer, with enough detail to pass review."),
            ]),
            RuntimeConfig::default(),
        );
        let history = HistoryStore::new(32_000);
        let mut tools = ToolGateway::new();
        tools.register("attempt_completion", Arc::new(EchoTool));
        let mut ctx = RequestContext::new(
            "Please write a thorough explanation of how the scheduler's cooldown backoff works.",
            30,
            false,
        );

        let outcome = sm.run(&history, &tools, &[], &mut ctx).await.unwrap();
        match outcome {
            AgentOutcome::Completed { response } => assert!(response.starts_with("Here is the final answer")),
            other => panic!("expected Completed, got {other:?}"),
        }
        assert_eq!(ctx.completed_actions.len(), 1);
        assert_eq!(ctx.completed_actions[0].status, ActionStatus::Success);
    }

    #[tokio::test]
    async fn tool_error_is_recorded_and_surfaced_in_next_turn_prompt() {
        let precheck = serde_json::json!({ "status": "PROCEED" }).to_string();
        let sm = machine(
            ScriptedProvider::new(vec![
                text_response(&precheck),
                tool_call_response("broken_tool", "call-1"),
                text_response("Done, despite the earlier error, because the fallback path handled it."),
            ]),
            RuntimeConfig::default(),
        );
        let history = HistoryStore::new(32_000);
        let mut tools = ToolGateway::new();
        tools.register("broken_tool", Arc::new(FailingTool));
        let mut ctx = RequestContext::new("run the broken tool please", 30, false);

        let outcome = sm.run(&history, &tools, &[], &mut ctx).await.unwrap();
        assert!(matches!(outcome, AgentOutcome::Completed { .. }));
        assert_eq!(ctx.completed_actions[0].status, ActionStatus::Error);
        // Errors are drained into the continuation block and cleared, not
        // accumulated forever.
        assert!(ctx.errors.is_empty());
    }

    #[tokio::test]
    async fn max_turns_exceeded_completes_with_the_fixed_message() {
        let precheck = serde_json::json!({ "status": "PROCEED" }).to_string();
        let mut responses = vec![text_response(&precheck)];
        for i in 0..2 {
            responses.push(tool_call_response("noop", &format!("call-{i}")));
        }
        let sm = machine(ScriptedProvider::new(responses), RuntimeConfig { max_turns: 2, ..RuntimeConfig::default() });
        let history = HistoryStore::new(32_000);
        let mut tools = ToolGateway::new();
        tools.register("noop", Arc::new(EchoTool));
        let mut ctx = RequestContext::new("loop forever please", 2, false);

        let outcome = sm.run(&history, &tools, &[], &mut ctx).await.unwrap();
        match outcome {
            AgentOutcome::Completed { response } => {
                assert_eq!(response, "Could not complete within allowed turns.");
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    struct CancellingTool {
        token: CancelToken,
    }

    #[async_trait]
    impl crate::tool_gateway::ToolHandler for CancellingTool {
        async fn call(&self, _args: serde_json::Value) -> std::result::Result<serde_json::Value, String> {
            self.token.cancel();
            Ok(serde_json::json!("ok"))
        }
    }

    #[tokio::test]
    async fn cancellation_mid_tool_round_stops_the_run() {
        let precheck = serde_json::json!({ "status": "PROCEED" }).to_string();
        let sm = machine(
            ScriptedProvider::new(vec![
                text_response(&precheck),
                ChatResponse {
                    content: String::new(),
                    tool_calls: vec![
                        ToolCall { call_id: "call-1".into(), tool_name: "trigger_cancel".into(), arguments: serde_json::json!({}) },
                        ToolCall { call_id: "call-2".into(), tool_name: "should_not_run".into(), arguments: serde_json::json!({}) },
                    ],
                    usage: None,
                    model: "scripted".into(),
                    finish_reason: Some("tool_calls".into()),
                },
            ]),
            RuntimeConfig::default(),
        );
        let history = HistoryStore::new(32_000);
        let mut tools = ToolGateway::new();
        let mut ctx = RequestContext::new("do a two-step thing", 30, false);
        tools.register("trigger_cancel", Arc::new(CancellingTool { token: ctx.cancel.clone() }));
        tools.register("should_not_run", Arc::new(EchoTool));

        let outcome = sm.run(&history, &tools, &[], &mut ctx).await.unwrap();
        assert!(matches!(outcome, AgentOutcome::Cancelled));
        // Only the first tool call in the round ran before the cancellation
        // check ahead of the second call stopped the round.
        assert_eq!(ctx.completed_actions.len(), 1);
    }
}

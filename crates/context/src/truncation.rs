use agentcore_domain::tool::{Message, Role};

/// A contiguous run of messages that must be dropped (or kept) as a single
/// unit. An assistant tool-call batch and every tool message answering it
/// form one unit; anything else is a unit of one. Splitting a unit would
/// leave a tool message without its originating assistant call, or vice
/// versa.
struct Unit {
    messages: Vec<Message>,
    chars: usize,
    /// System messages are never dropped regardless of budget pressure.
    protected: bool,
}

fn message_chars(m: &Message) -> usize {
    serde_json::to_string(m).map(|s| s.len()).unwrap_or(0)
}

/// Group an ordered message log into trim units.
///
/// Walks forward; whenever an assistant message declares tool-call ids, the
/// unit absorbs messages until every declared id has been answered by a
/// tool message (or the log ends, in which case the dangling batch still
/// stays together — it has no answers yet to separate it from).
fn group_into_units(messages: &[Message]) -> Vec<Unit> {
    let mut units = Vec::new();
    let mut i = 0;

    while i < messages.len() {
        let msg = &messages[i];
        let declared = msg.declared_tool_call_ids();

        if msg.role == Role::Assistant && !declared.is_empty() {
            let mut pending: std::collections::HashSet<&str> = declared.into_iter().collect();
            let mut batch = vec![msg.clone()];
            let mut j = i + 1;

            while j < messages.len() && !pending.is_empty() {
                if let Some(answered) = messages[j].answers_tool_call_id() {
                    if pending.remove(answered) {
                        batch.push(messages[j].clone());
                        j += 1;
                        continue;
                    }
                }
                break;
            }

            let chars = batch.iter().map(message_chars).sum();
            units.push(Unit { messages: batch, chars, protected: false });
            i = j;
        } else {
            let protected = msg.role == Role::System;
            units.push(Unit { messages: vec![msg.clone()], chars: message_chars(msg), protected });
            i += 1;
        }
    }

    units
}

/// Drop oldest unprotected units until the total fits `budget_chars`, then
/// flatten back into an ordered message log. Mirrors §4.4's
/// `enforceContextLimits`: system entries are exempt, and a tool-call batch
/// with its answers is never split across the cut.
pub fn enforce_context_limits(messages: &[Message], budget_chars: usize) -> (Vec<Message>, super::report::TruncationReport) {
    let mut units = group_into_units(messages);
    let total_before: usize = units.iter().map(|u| u.chars).sum();
    let messages_before = messages.len();

    let mut total = total_before;
    let mut dropped_units = 0usize;
    let mut dropped_messages = 0usize;

    let mut idx = 0;
    while total > budget_chars && idx < units.len() {
        if units[idx].protected {
            idx += 1;
            continue;
        }
        total -= units[idx].chars;
        dropped_units += 1;
        dropped_messages += units[idx].messages.len();
        units.remove(idx);
        // Don't advance idx: the next unit has slid into this slot.
    }

    let kept: Vec<Message> = units.into_iter().flat_map(|u| u.messages).collect();

    let report = super::report::TruncationReport {
        messages_before,
        messages_after: kept.len(),
        chars_before: total_before,
        chars_after: total,
        dropped_units,
        dropped_messages,
    };

    (kept, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentcore_domain::tool::ToolCall;

    fn tool_call(id: &str) -> ToolCall {
        ToolCall { call_id: id.into(), tool_name: "list_dir".into(), arguments: serde_json::json!({}) }
    }

    #[test]
    fn keeps_everything_under_budget() {
        let messages = vec![Message::system("sys"), Message::user("hi"), Message::assistant("hello")];
        let (kept, report) = enforce_context_limits(&messages, 10_000);
        assert_eq!(kept.len(), 3);
        assert_eq!(report.dropped_units, 0);
    }

    #[test]
    fn never_splits_tool_call_batch() {
        let messages = vec![
            Message::system("sys"),
            Message::user("old question"),
            Message::assistant("ok"),
            Message::assistant_with_tool_calls("", &[tool_call("c1")]),
            Message::tool_result("c1", "result"),
            Message::user("new question"),
        ];
        // Budget tiny enough to force dropping, but large enough that only
        // the oldest non-system unit should go.
        let (kept, report) = enforce_context_limits(&messages, 10_000);
        assert_eq!(kept.len(), messages.len());
        assert_eq!(report.dropped_units, 0);

        let (kept, report) = enforce_context_limits(&messages, 1);
        // Every non-system unit drops, but the tool-call/answer pair drops
        // together (2 messages) or not at all -- never 1.
        assert!(report.dropped_units > 0);
        for msg in &kept {
            if msg.role == Role::Tool {
                let answered = msg.answers_tool_call_id().unwrap();
                assert!(kept.iter().any(|m| m.declared_tool_call_ids().contains(&answered)));
            }
        }
    }

    #[test]
    fn system_messages_survive_any_budget() {
        let messages = vec![Message::system("must stay"), Message::user("drop me")];
        let (kept, _) = enforce_context_limits(&messages, 0);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].role, Role::System);
    }

    #[test]
    fn drops_oldest_first() {
        let messages = vec![
            Message::user("oldest"),
            Message::user("middle"),
            Message::user("newest"),
        ];
        let budget = message_chars(&messages[1]) + message_chars(&messages[2]);
        let (kept, _) = enforce_context_limits(&messages, budget);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].content.text(), Some("middle"));
    }
}

//! Conversation message types shared by the session store, agent loop, and LLM clients.

use serde::{Deserialize, Serialize};

/// A single function/tool call requested by the model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One entry in a session's ordered message list.
///
/// `role` is implicit in the variant tag (system/user/assistant/tool), matching
/// §3's invariant that tool-call results (role=tool) must immediately follow the
/// assistant message carrying the matching `tool_call_ids`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        content: String,
        tool_call_id: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Message::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
            is_error,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::System { content }
            | Message::User { content }
            | Message::Assistant { content, .. }
            | Message::Tool { content, .. } => content,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::Tool { .. } => "tool",
        }
    }

    /// Approximate char-based length used by truncation/compaction budgets.
    pub fn char_len(&self) -> usize {
        self.content().chars().count()
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_pairing_can_be_checked_by_id() {
        let calls = vec![
            ToolCall { id: "a".into(), name: "read_file".into(), arguments: serde_json::json!({}) },
            ToolCall { id: "b".into(), name: "write_file".into(), arguments: serde_json::json!({}) },
        ];
        let assistant = Message::assistant_with_tool_calls("", calls.clone());
        let results = [
            Message::tool_result("a", "ok", false),
            Message::tool_result("b", "ok", false),
        ];
        let ids: Vec<&str> = assistant.tool_calls().iter().map(|c| c.id.as_str()).collect();
        for call in &calls {
            assert!(ids.contains(&call.id.as_str()));
            assert!(results.iter().any(|m| matches!(m, Message::Tool { tool_call_id, .. } if tool_call_id == &call.id)));
        }
    }

    #[test]
    fn serde_round_trips_every_variant() {
        let msgs = vec![
            Message::system("sys"),
            Message::user("hi"),
            Message::assistant("hello"),
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCall { id: "1".into(), name: "x".into(), arguments: serde_json::json!({"a":1}) }],
            ),
            Message::tool_result("1", "result", false),
            Message::tool_result("1", "boom", true),
        ];
        for m in msgs {
            let s = serde_json::to_string(&m).unwrap();
            let back: Message = serde_json::from_str(&s).unwrap();
            assert_eq!(m, back);
        }
    }

    #[test]
    fn role_and_content_accessors() {
        let m = Message::user("hello world");
        assert_eq!(m.role(), "user");
        assert_eq!(m.content(), "hello world");
        assert_eq!(m.char_len(), 11);
    }
}

//! Transcript and tool-call types shared by every model backend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ToolErrorKind;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// Tool invocation requested by the model, arguments not yet validated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Outcome of one tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { data: Value },
    Error { kind: ToolErrorKind, message: String },
}

/// Tool execution result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub outcome: ToolOutcome,
    /// Controller attempts made; 0 when the call never reached the controller
    pub attempts: u32,
}

impl ToolResult {
    /// Create a successful tool result
    pub fn success(call_id: impl Into<String>, data: Value) -> Self {
        Self {
            call_id: call_id.into(),
            outcome: ToolOutcome::Success { data },
            attempts: 1,
        }
    }

    /// Create an error tool result
    pub fn error(call_id: impl Into<String>, kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            outcome: ToolOutcome::Error {
                kind,
                message: message.into(),
            },
            attempts: 0,
        }
    }

    pub fn cancelled(call_id: impl Into<String>) -> Self {
        Self::error(call_id, ToolErrorKind::Cancelled, "cancelled before completion")
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Error { .. })
    }

    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        match &self.outcome {
            ToolOutcome::Error { kind, .. } => Some(*kind),
            ToolOutcome::Success { .. } => None,
        }
    }

    /// JSON text handed back to the model
    pub fn to_content(&self) -> String {
        let value = match &self.outcome {
            ToolOutcome::Success { data } => json!({ "ok": true, "data": data }),
            ToolOutcome::Error { kind, message } => json!({
                "ok": false,
                "error": { "kind": kind, "message": message }
            }),
        };
        value.to_string()
    }
}

/// A message in the conversation; never mutated once appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResult>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role) -> Self {
        Self {
            role,
            content: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            result: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a user message with text content
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::new(Role::User)
        }
    }

    /// Create an assistant message with a final answer
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::new(Role::Assistant)
        }
    }

    /// Create an assistant message carrying tool calls
    pub fn tool_request(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::new(Role::Assistant)
        }
    }

    /// Create a tool message resolving one call
    pub fn tool_result(result: ToolResult) -> Self {
        Self {
            content: Some(result.to_content()),
            tool_call_id: Some(result.call_id.clone()),
            result: Some(result),
            ..Self::new(Role::Tool)
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// What the model asked for
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    FinalAnswer(String),
    ToolCallRequest(Vec<ToolCall>),
}

/// Tool name for every call id issued in `transcript`
///
/// Backends whose wire format names the tool on result messages use this.
pub fn call_names(transcript: &[Message]) -> std::collections::HashMap<&str, &str> {
    transcript
        .iter()
        .flat_map(|m| m.tool_calls.iter())
        .map(|c| (c.id.as_str(), c.name.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "Hello");
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn test_tool_result() {
        let result = ToolResult::success("id1", json!({"uuid": "pool-1"}));
        assert!(!result.is_error());
        assert_eq!(result.attempts, 1);

        let error = ToolResult::error("id2", ToolErrorKind::NotFound, "no such pool").with_attempts(1);
        assert!(error.is_error());
        assert_eq!(error.error_kind(), Some(ToolErrorKind::NotFound));
    }

    #[test]
    fn test_tool_result_content() {
        let ok = ToolResult::success("a", json!({"name": "web-pool"}));
        let parsed: Value = serde_json::from_str(&ok.to_content()).unwrap();
        assert_eq!(parsed, json!({"ok": true, "data": {"name": "web-pool"}}));

        let err = ToolResult::cancelled("b");
        let parsed: Value = serde_json::from_str(&err.to_content()).unwrap();
        assert_eq!(
            parsed,
            json!({"ok": false, "error": {"kind": "cancelled", "message": "cancelled before completion"}})
        );
    }

    #[test]
    fn test_tool_result_message_links_call() {
        let msg = Message::tool_result(ToolResult::success("call_1", json!(null)));
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert!(msg.text().contains("\"ok\":true"));
    }

    #[test]
    fn test_call_names() {
        let transcript = vec![
            Message::user("hi"),
            Message::tool_request(vec![
                ToolCall::new("c1", "list_pools", json!({})),
                ToolCall::new("c2", "get_pool", json!({"uuid": "p"})),
            ]),
        ];
        let names = call_names(&transcript);
        assert_eq!(names.get("c2"), Some(&"get_pool"));
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn test_message_serialization_skips_empty() {
        let json = serde_json::to_value(Message::user("x")).unwrap();
        assert!(json.get("tool_calls").is_none());
        assert_eq!(json["role"], "user");
    }
}

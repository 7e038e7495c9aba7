use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::providers::ProviderKind;

/// Conversation role for plain chat turns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A non-tool conversational turn
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Vendor-agnostic tool definition.
///
/// `input_schema` is a JSON Schema object describing the tool arguments. Adapters
/// rename it to whatever their wire format expects; it is never rewritten.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A single tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Map<String, Value>,
}

/// Vendor-native assistant message carried between tool rounds.
///
/// The wrapped JSON is exactly what the vendor returned. It can be stored and
/// replayed, but only the adapter for the producing provider reads it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VendorPayload {
    provider: ProviderKind,
    message: Value,
}

impl VendorPayload {
    pub(crate) fn new(provider: ProviderKind, message: Value) -> Self {
        Self { provider, message }
    }

    /// Provider kind that produced this payload
    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub(crate) fn message(&self) -> &Value {
        &self.message
    }
}

/// One turn of a tool-use conversation
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ToolUseMessage {
    User {
        content: String,
    },
    Assistant {
        raw_message: VendorPayload,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl ToolUseMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ToolUseMessage::User {
            content: content.into(),
        }
    }

    /// Re-insert a previous response as the assistant turn of the next round
    pub fn assistant(response: &ToolUseResponse) -> Self {
        ToolUseMessage::Assistant {
            raw_message: response.raw_assistant_message.clone(),
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ToolUseMessage::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }
}

/// Input for a single non-streaming tool-enabled round
#[derive(Debug, Clone, Default)]
pub struct ToolUseRequest {
    pub messages: Vec<ToolUseMessage>,
    pub system_prompt: String,
    pub tools: Vec<ToolDefinition>,
}

/// Normalized reason a model turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

impl StopReason {
    /// Map an OpenAI-style `finish_reason`
    pub fn from_finish_reason(reason: Option<&str>) -> Self {
        match reason {
            Some("tool_calls") => StopReason::ToolUse,
            Some("length") => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::EndTurn => "end_turn",
            StopReason::ToolUse => "tool_use",
            StopReason::MaxTokens => "max_tokens",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized result of a tool-enabled round.
///
/// `tool_calls` is non-empty exactly when `stop_reason` is [`StopReason::ToolUse`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolUseResponse {
    pub stop_reason: StopReason,
    pub text_content: String,
    pub tool_calls: Vec<ToolCall>,
    pub raw_assistant_message: VendorPayload,
}

impl ToolUseResponse {
    /// Build a response, reconciling the vendor stop reason with the tool calls
    /// actually present.
    pub fn new(
        stop_reason: StopReason,
        text_content: String,
        tool_calls: Vec<ToolCall>,
        raw_assistant_message: VendorPayload,
    ) -> Self {
        let stop_reason = match (stop_reason, tool_calls.is_empty()) {
            (_, false) => StopReason::ToolUse,
            (StopReason::ToolUse, true) => {
                tracing::warn!("Vendor reported tool_calls finish without any tool call");
                StopReason::EndTurn
            }
            (other, true) => other,
        };

        Self {
            stop_reason,
            text_content,
            tool_calls,
            raw_assistant_message,
        }
    }

    pub fn wants_tools(&self) -> bool {
        self.stop_reason == StopReason::ToolUse
    }
}

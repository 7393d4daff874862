use serde::{Deserialize, Serialize};

/// One role-tagged turn in the conversation sent to the completion API.
/// Conversations here are text-only; tool results are fed back as synthetic
/// user turns, so no block structure is needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// JSON-schema description of one action exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A tool invocation requested by the model. `arguments` is the raw
/// JSON-encoded argument string as returned by the API; parsing is
/// deferred to dispatch so a malformed payload fails that tool alone.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: String,
}

/// Normalized result of one completion call.
#[derive(Debug, Default)]
pub struct Completion {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

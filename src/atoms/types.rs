// ── Paw Atoms: Pure Data Types ────────────────────────────────────────────────
// All plain struct/enum definitions with no logic beyond constructors.
// Atoms layer rule: no I/O, no side effects, no imports from engine/.
//
// These types are re-exported from engine/types.rs via
//   pub use crate::atoms::types::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ── Messages ───────────────────────────────────────────────────────────

/// One immutable conversation message. Owned by the conversation history;
/// topic threads hold `Arc` references to it, never copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl Message {
    /// Create a message with a fresh id and the current timestamp.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// The assistant's request to call a tool. Arguments travel in metadata
    /// so the call can be replayed next to its result.
    pub fn tool_call(call: &ToolCall) -> Self {
        let mut msg = Self::new(Role::Assistant, format!("Calling tool {}", call.name));
        msg.metadata = Some(serde_json::json!({
            "tool_call": {
                "id": call.id,
                "name": call.name,
                "arguments": call.arguments,
            }
        }));
        msg
    }

    /// A tool result message, linked to the call that produced it.
    pub fn tool_result(call: &ToolCall, output: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::Tool, output);
        msg.metadata = Some(serde_json::json!({
            "tool_call_id": call.id,
            "name": call.name,
        }));
        msg
    }

    /// Builder-style id override (tests, replayed transcripts).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Shared, immutable handle to a history message.
pub type MessageRef = Arc<Message>;

// ── Tool Calling ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        ToolCall {
            id: format!("call_{}", uuid::Uuid::new_v4()),
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        ToolDefinition {
            tool_type: "function".into(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

// ── Usage & Pricing ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_create_tokens: u64,
}

/// USD price per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
}

// ── Task Result ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Complete,
    FatalError,
    Incomplete,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Complete => "complete",
            TaskStatus::FatalError => "fatal_error",
            TaskStatus::Incomplete => "incomplete",
        }
    }
}

/// Terminal outcome of one orchestrated run. Immutable once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub history: Vec<MessageRef>,
    pub elapsed_secs: f64,
    pub cost_usd: f64,
    pub turns: u32,
}

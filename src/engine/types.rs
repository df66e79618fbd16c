// Paw Taskmind — Core engine types
// Data structures that flow between the orchestrator and the model service.
// They are independent of any specific AI provider.

use crate::engine::config::OrchestratorConfig;
use serde::{Deserialize, Serialize};

pub use crate::atoms::types::*;

// ── Agent descriptor ───────────────────────────────────────────────────

/// Sampling knobs forwarded to the model service untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

/// Everything the model service needs besides the message list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Purpose of the call: `task`, `meta-cognition`, `tagger`, `summarizer`.
    pub name: String,
    /// Concrete model id chosen for this call.
    pub model: String,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub settings: AgentSettings,
}

impl AgentDescriptor {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        AgentDescriptor {
            name: name.into(),
            model: model.into(),
            tools: Vec::new(),
            instructions: None,
            settings: AgentSettings::default(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }
}

// ── Task request ───────────────────────────────────────────────────────

/// One task handed to the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequest {
    pub system_prompt: String,
    pub input: String,
    /// Caller tools, merged alongside the orchestrator-owned tools.
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    /// Model id or class. Falls back to the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub settings: AgentSettings,
    /// Per-run overrides of the orchestrator configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<OrchestratorConfig>,
}

impl TaskRequest {
    pub fn new(system_prompt: impl Into<String>, input: impl Into<String>) -> Self {
        TaskRequest {
            system_prompt: system_prompt.into(),
            input: input.into(),
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_options(mut self, options: OrchestratorConfig) -> Self {
        self.options = Some(options);
        self
    }
}

// ── Tool decisions ─────────────────────────────────────────────────────

/// Terminal outcome requested by an orchestrator-owned tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HaltOutcome {
    Complete { result: String },
    Fatal { error: String },
}

/// What the orchestrator wants done with one tool call. Returned through the
/// `ToolCallStart` gate; the service performs (or skips) the call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolDecision {
    Execute,
    Skip { reason: String },
    Halt(HaltOutcome),
    Retry { reason: String },
    Replace { output: String },
}

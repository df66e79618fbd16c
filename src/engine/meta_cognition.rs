// ── Paw Taskmind: Meta-Cognition ────────────────────────────────────────────
//
// Every `meta_frequency` turns the orchestrator pauses for one reflective
// turn. The reflective agent sees recent history plus the run's routing
// state and may act through three tools:
//
//   adjust_model_score(model, score)   score clamped to 0–100
//   set_model_enabled(model, enabled)
//   set_thought_delay(seconds)         must be one of THOUGHT_DELAYS_SECS
//
// The reflective turn never writes to task history, never halts the task,
// and never fails the run: errors are logged and folded into the report.

use crate::atoms::constants::{
    ADJUST_MODEL_SCORE_TOOL, AGENT_META, META_HISTORY_WINDOW, SET_MODEL_ENABLED_TOOL,
    SET_THOUGHT_DELAY_TOOL, THOUGHT_DELAYS_SECS,
};
use crate::engine::config::ModelCatalog;
use crate::engine::providers::{ModelService, StreamEvent};
use crate::engine::routing::select_model;
use crate::engine::state::OrchestrationState;
use crate::engine::types::*;
use futures::StreamExt;
use log::{info, warn};
use rand::Rng;
use serde_json::json;

/// Max characters of a single message shown in the reflective digest.
const DIGEST_MESSAGE_CHARS: usize = 400;

// ═════════════════════════════════════════════════════════════════════════════
// Report
// ═════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub enum MetaAdjustment {
    Score { model: String, score: u8 },
    Enabled { model: String, enabled: bool },
    ThoughtDelay { seconds: u64 },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaReport {
    /// Turn at which the reflection ran.
    pub turn: u32,
    pub model: Option<String>,
    pub adjustments: Vec<MetaAdjustment>,
    /// Tool calls that were rejected, with the reason.
    pub ignored: Vec<String>,
    pub error: Option<String>,
}

// ═════════════════════════════════════════════════════════════════════════════
// Tools
// ═════════════════════════════════════════════════════════════════════════════

pub fn meta_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::function(
            ADJUST_MODEL_SCORE_TOOL,
            "Set a model's selection score (0-100). Higher scores are chosen more often.",
            json!({
                "type": "object",
                "properties": {
                    "model": {"type": "string"},
                    "score": {"type": "integer", "minimum": 0, "maximum": 100}
                },
                "required": ["model", "score"]
            }),
        ),
        ToolDefinition::function(
            SET_MODEL_ENABLED_TOOL,
            "Enable or disable a model for the rest of this task.",
            json!({
                "type": "object",
                "properties": {
                    "model": {"type": "string"},
                    "enabled": {"type": "boolean"}
                },
                "required": ["model", "enabled"]
            }),
        ),
        ToolDefinition::function(
            SET_THOUGHT_DELAY_TOOL,
            "Set the pause before each model call, in seconds.",
            json!({
                "type": "object",
                "properties": {
                    "seconds": {"type": "integer", "enum": THOUGHT_DELAYS_SECS}
                },
                "required": ["seconds"]
            }),
        ),
    ]
}

/// Apply one reflective tool call to the run state.
pub fn apply_meta_call(
    state: &mut OrchestrationState,
    call: &ToolCall,
) -> Result<MetaAdjustment, String> {
    let args = &call.arguments;
    match call.name.as_str() {
        ADJUST_MODEL_SCORE_TOOL => {
            let model = args["model"].as_str().ok_or("missing 'model'")?;
            let score = args["score"]
                .as_i64()
                .or_else(|| args["score"].as_f64().map(|f| f.round() as i64))
                .ok_or("missing numeric 'score'")?;
            let score = state.set_score(model, score);
            Ok(MetaAdjustment::Score {
                model: model.to_string(),
                score,
            })
        }
        SET_MODEL_ENABLED_TOOL => {
            let model = args["model"].as_str().ok_or("missing 'model'")?;
            let enabled = args["enabled"].as_bool().ok_or("missing boolean 'enabled'")?;
            state.set_enabled(model, enabled);
            Ok(MetaAdjustment::Enabled {
                model: model.to_string(),
                enabled,
            })
        }
        SET_THOUGHT_DELAY_TOOL => {
            let seconds = args["seconds"].as_u64().ok_or("missing integer 'seconds'")?;
            if !THOUGHT_DELAYS_SECS.contains(&seconds) {
                return Err(format!(
                    "{}s is not one of {:?}",
                    seconds, THOUGHT_DELAYS_SECS
                ));
            }
            state.thought_delay_secs = seconds;
            Ok(MetaAdjustment::ThoughtDelay { seconds })
        }
        other => Err(format!("unknown tool '{}'", other)),
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Reflective turn
// ═════════════════════════════════════════════════════════════════════════════

fn reflection_prompt(state: &OrchestrationState) -> String {
    let mut scores: Vec<_> = state.model_scores.iter().collect();
    scores.sort();
    let mut disabled: Vec<_> = state.disabled_models.iter().collect();
    disabled.sort();
    format!(
        "You are reviewing an ongoing task after turn {}. Judge how well the recent \
         turns progressed and tune the run if needed. Current model scores: {:?}. \
         Disabled models: {:?}. Current pause before each call: {}s. Use the tools \
         to make changes; reply briefly if nothing needs to change.",
        state.turn, scores, disabled, state.thought_delay_secs
    )
}

fn history_digest(history: &[MessageRef]) -> String {
    let start = history.len().saturating_sub(META_HISTORY_WINDOW);
    history[start..]
        .iter()
        .map(|m| {
            let text: String = m.content.chars().take(DIGEST_MESSAGE_CHARS).collect();
            format!("[{}] {}", m.role.as_str(), text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Run one reflective turn. Never fails; problems land in `MetaReport::error`.
pub async fn run_meta_cognition<R: Rng + ?Sized>(
    service: &dyn ModelService,
    catalog: &ModelCatalog,
    model_request: &str,
    state: &mut OrchestrationState,
    history: &[MessageRef],
    rng: &mut R,
) -> MetaReport {
    state.meta_runs += 1;
    let mut report = MetaReport {
        turn: state.turn,
        ..Default::default()
    };

    let selection = match select_model(catalog, model_request, state, &[], rng) {
        Ok(s) => s,
        Err(e) => {
            warn!("[meta] Skipping reflection at turn {}: {}", state.turn, e);
            report.error = Some(e.to_string());
            return report;
        }
    };
    report.model = Some(selection.model.clone());

    let agent = AgentDescriptor::new(AGENT_META, selection.model.clone())
        .with_tools(meta_tools())
        .with_instructions(reflection_prompt(state));
    let messages = vec![
        Message::system(reflection_prompt(state)),
        Message::user(format!("Recent history:\n{}", history_digest(history))),
    ];

    let mut stream = match service.stream(&messages, &agent).await {
        Ok(s) => s,
        Err(e) => {
            warn!("[meta] Reflection call failed at turn {}: {}", state.turn, e);
            report.error = Some(e.to_string());
            return report;
        }
    };

    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::ToolCallStart { call, gate } => {
                let decision = match apply_meta_call(state, &call) {
                    Ok(adjustment) => {
                        info!("[meta] Turn {}: applied {:?}", state.turn, adjustment);
                        report.adjustments.push(adjustment);
                        ToolDecision::Execute
                    }
                    Err(reason) => {
                        warn!("[meta] Ignoring {} call: {}", call.name, reason);
                        report.ignored.push(format!("{}: {}", call.name, reason));
                        ToolDecision::Skip { reason }
                    }
                };
                if let Some(gate) = gate {
                    let _ = gate.send(decision);
                }
            }
            StreamEvent::Response {
                model,
                usage,
                cost_usd,
            } => {
                state.usage.record(&model, &usage, cost_usd);
            }
            StreamEvent::Error { message } => {
                warn!("[meta] Reflection stream error at turn {}: {}", state.turn, message);
                report.error = Some(message);
            }
            // Reflective text is never shown or kept.
            StreamEvent::MessageStart { .. }
            | StreamEvent::MessageDelta { .. }
            | StreamEvent::MessageDone { .. }
            | StreamEvent::ToolCallDone { .. } => {}
        }
    }

    report
}

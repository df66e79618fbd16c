// Paw Taskmind — Orchestrator Turn Execution
//
// One turn = one model-service call drained to its end. Every tool call is
// routed through `decide_tool_call` and the decision is handed back through
// the call's gate. After a halt the stream is still drained so the history
// stays consistent with what the service actually did.

use super::handlers::decide_tool_call;
use crate::atoms::error::EngineResult;
use crate::engine::providers::{ModelService, StreamEvent};
use crate::engine::state::RunUsage;
use crate::engine::types::*;
use futures::StreamExt;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// What one turn produced besides the history it appended.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct TurnOutcome {
    pub halt: Option<HaltOutcome>,
    /// Terminal stream failure. Set when the stream reported an error or
    /// ended without a response.
    pub error: Option<String>,
    /// Model the service reported in its terminal response.
    pub model: Option<String>,
    pub tool_calls: usize,
    /// Text of the last assistant message of the turn.
    pub last_text: Option<String>,
}

/// Run one turn and append its messages to `history`.
///
/// Fails only when the service refuses the call outright; stream-level
/// problems are reported in `TurnOutcome::error`.
pub(crate) async fn run_turn(
    service: &dyn ModelService,
    messages: &[Message],
    agent: &AgentDescriptor,
    known_tools: &HashSet<String>,
    history: &mut Vec<MessageRef>,
    usage: &mut RunUsage,
) -> EngineResult<TurnOutcome> {
    let mut stream = service.stream(messages, agent).await?;

    let mut outcome = TurnOutcome::default();
    let mut resolved: HashMap<String, String> = HashMap::new();
    let mut pending_text = String::new();
    let mut responded = false;

    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::MessageStart { id } => {
                debug!("[orchestrator] Message start id={}", id);
                pending_text.clear();
            }
            StreamEvent::MessageDelta { text } => pending_text.push_str(&text),
            StreamEvent::MessageDone { message } => {
                pending_text.clear();
                outcome.last_text = Some(message.content.clone());
                history.push(Arc::new(message));
            }
            StreamEvent::ToolCallStart { call, gate } => {
                outcome.tool_calls += 1;
                history.push(Arc::new(Message::tool_call(&call)));
                let decision =
                    decide_tool_call(&call, known_tools, &resolved, outcome.halt.is_some());
                info!(
                    "[orchestrator] Tool call {} id={} → {:?}",
                    call.name, call.id, decision
                );
                if let ToolDecision::Halt(halt) = &decision {
                    outcome.halt = Some(halt.clone());
                }
                if let Some(gate) = gate {
                    if gate.send(decision).is_err() {
                        warn!("[orchestrator] Service dropped the gate for {}", call.id);
                    }
                }
            }
            StreamEvent::ToolCallDone { call, output } => {
                history.push(Arc::new(Message::tool_result(&call, output.clone())));
                resolved.insert(call.id, output);
            }
            StreamEvent::Response {
                model,
                usage: tokens,
                cost_usd,
            } => {
                let cost = usage.record(&model, &tokens, cost_usd);
                debug!(
                    "[orchestrator] Response model={} in={} out={} cost=${:.6}",
                    model, tokens.input_tokens, tokens.output_tokens, cost
                );
                outcome.model = Some(model);
                responded = true;
            }
            StreamEvent::Error { message } => {
                warn!("[orchestrator] Stream error: {}", message);
                outcome.error = Some(message);
            }
        }
    }

    // Deltas never closed by a MessageDone still happened.
    if !pending_text.is_empty() {
        outcome.last_text = Some(pending_text.clone());
        history.push(Arc::new(Message::assistant(pending_text)));
    }
    if !responded && outcome.error.is_none() {
        outcome.error = Some(format!(
            "{}: stream ended without a response",
            service.name()
        ));
    }
    Ok(outcome)
}

// Paw Taskmind — Scripted model service
// Replays pre-recorded turns per agent name. Used by the test-suite and by
// `taskmind replay` to run a task against a saved transcript offline.
// Every request is recorded so callers can assert on what was sent.

use super::{EventStream, ModelService, StreamEvent};
use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::types::{AgentDescriptor, Message, TokenUsage, ToolCall, ToolDecision};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;
use tokio::sync::oneshot;

// ── Script format ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptEvent {
    /// A complete assistant message (start, one delta, done).
    Text { content: String },
    /// A tool call. `output` is returned when the caller says `Execute`.
    ToolCall {
        name: String,
        #[serde(default)]
        arguments: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },
    /// Terminal stream error; nothing after it is played.
    Error { message: String },
}

/// One recorded call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptedTurn {
    #[serde(default)]
    pub events: Vec<ScriptEvent>,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Fail the call itself before any event is produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<String>,
    /// Wait this long before the first event.
    #[serde(default)]
    pub delay_ms: u64,
}

impl ScriptedTurn {
    pub fn new(events: Vec<ScriptEvent>) -> Self {
        ScriptedTurn {
            events,
            ..Default::default()
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(vec![ScriptEvent::Text {
            content: content.into(),
        }])
    }

    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self::new(vec![ScriptEvent::ToolCall {
            name: name.into(),
            arguments,
            id: None,
            output: None,
        }])
    }

    pub fn failing(message: impl Into<String>) -> Self {
        ScriptedTurn {
            fail: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = TokenUsage {
            input_tokens,
            output_tokens,
            ..Default::default()
        };
        self
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = Some(cost_usd);
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

/// A whole transcript: queued turns per agent name, plus an optional turn
/// replayed whenever an agent's queue is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub turns: BTreeMap<String, Vec<ScriptedTurn>>,
    #[serde(default)]
    pub fallback: BTreeMap<String, ScriptedTurn>,
}

impl Script {
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

// ── Service ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub agent: AgentDescriptor,
    pub messages: Vec<Message>,
}

#[derive(Default)]
pub struct ScriptedService {
    queues: Mutex<HashMap<String, VecDeque<ScriptedTurn>>>,
    fallback: Mutex<HashMap<String, ScriptedTurn>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_script(script: Script) -> Self {
        let service = Self::new();
        {
            let mut queues = service.queues.lock();
            for (agent, turns) in script.turns {
                queues.insert(agent, turns.into_iter().collect());
            }
        }
        service.fallback.lock().extend(script.fallback);
        service
    }

    pub fn push_turn(&self, agent: &str, turn: ScriptedTurn) {
        self.queues
            .lock()
            .entry(agent.to_string())
            .or_default()
            .push_back(turn);
    }

    pub fn push_text(&self, agent: &str, content: impl Into<String>) {
        self.push_turn(agent, ScriptedTurn::text(content));
    }

    pub fn set_fallback(&self, agent: &str, turn: ScriptedTurn) {
        self.fallback.lock().insert(agent.to_string(), turn);
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, agent: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.agent.name == agent)
            .count()
    }

    /// Queued turns not yet played for an agent.
    pub fn remaining(&self, agent: &str) -> usize {
        self.queues.lock().get(agent).map(|q| q.len()).unwrap_or(0)
    }

    fn next_turn(&self, agent: &str) -> Option<ScriptedTurn> {
        if let Some(turn) = self.queues.lock().get_mut(agent).and_then(|q| q.pop_front()) {
            return Some(turn);
        }
        self.fallback.lock().get(agent).cloned()
    }
}

#[async_trait]
impl ModelService for ScriptedService {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(
        &self,
        messages: &[Message],
        agent: &AgentDescriptor,
    ) -> EngineResult<EventStream> {
        self.calls.lock().push(RecordedCall {
            agent: agent.clone(),
            messages: messages.to_vec(),
        });

        let turn = self.next_turn(&agent.name).ok_or_else(|| {
            EngineError::provider(
                self.name(),
                format!("script exhausted for agent '{}'", agent.name),
            )
        })?;
        if let Some(message) = turn.fail {
            return Err(EngineError::provider(self.name(), message));
        }

        debug!(
            "[scripted] Playing {} event(s) for agent={} model={}",
            turn.events.len(),
            agent.name,
            agent.model
        );
        let (tx, rx) = mpsc::unbounded();
        let model = agent.model.clone();
        tokio::spawn(play(turn, model, tx));
        Ok(rx.boxed())
    }
}

/// Emit one turn's events. Stops quietly once the receiver is gone.
async fn play(turn: ScriptedTurn, model: String, tx: mpsc::UnboundedSender<StreamEvent>) {
    if turn.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(turn.delay_ms)).await;
    }
    for event in turn.events {
        match event {
            ScriptEvent::Text { content } => {
                let message = Message::assistant(content.clone());
                let events = [
                    StreamEvent::MessageStart {
                        id: message.id.clone(),
                    },
                    StreamEvent::MessageDelta { text: content },
                    StreamEvent::MessageDone { message },
                ];
                for e in events {
                    if tx.unbounded_send(e).is_err() {
                        return;
                    }
                }
            }
            ScriptEvent::ToolCall {
                name,
                arguments,
                id,
                output,
            } => {
                let mut call = ToolCall::new(name, arguments);
                if let Some(id) = id {
                    call.id = id;
                }
                let (gate, decision) = oneshot::channel();
                let start = StreamEvent::ToolCallStart {
                    call: call.clone(),
                    gate: Some(gate),
                };
                if tx.unbounded_send(start).is_err() {
                    return;
                }
                let decision = decision.await.unwrap_or(ToolDecision::Skip {
                    reason: "no decision received".into(),
                });
                let output = tool_output(decision, output);
                if tx.unbounded_send(StreamEvent::ToolCallDone { call, output }).is_err() {
                    return;
                }
            }
            ScriptEvent::Error { message } => {
                let _ = tx.unbounded_send(StreamEvent::Error { message });
                return;
            }
        }
    }
    let _ = tx.unbounded_send(StreamEvent::Response {
        model,
        usage: turn.usage,
        cost_usd: turn.cost_usd,
    });
}

fn tool_output(decision: ToolDecision, scripted: Option<String>) -> String {
    match decision {
        ToolDecision::Execute => scripted.unwrap_or_else(|| "ok".to_string()),
        ToolDecision::Skip { reason } => format!("Tool call skipped: {}", reason),
        ToolDecision::Halt(_) => "Acknowledged.".to_string(),
        ToolDecision::Retry { reason } => format!("Invalid call: {}. Please try again.", reason),
        ToolDecision::Replace { output } => output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::constants::AGENT_TASK;
    use serde_json::json;

    #[tokio::test]
    async fn tool_call_waits_for_gate() {
        let service = ScriptedService::new();
        let mut turn = ScriptedTurn::tool_call("search", json!({"q": "rust"}));
        if let ScriptEvent::ToolCall { output, .. } = &mut turn.events[0] {
            *output = Some("3 hits".into());
        }
        service.push_turn(AGENT_TASK, turn);

        let agent = AgentDescriptor::new(AGENT_TASK, "m");
        let mut stream = service.stream(&[], &agent).await.unwrap();
        let mut outputs = Vec::new();
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::ToolCallStart { gate, .. } => {
                    gate.unwrap().send(ToolDecision::Execute).unwrap();
                }
                StreamEvent::ToolCallDone { output, .. } => outputs.push(output),
                _ => {}
            }
        }
        assert_eq!(outputs, vec!["3 hits".to_string()]);
    }

    #[tokio::test]
    async fn fallback_replays_when_queue_empty() {
        let service = ScriptedService::new();
        service.push_text(AGENT_TASK, "first");
        service.set_fallback(AGENT_TASK, ScriptedTurn::text("again"));
        let agent = AgentDescriptor::new(AGENT_TASK, "m");
        for _ in 0..3 {
            assert!(service.stream(&[], &agent).await.is_ok());
        }
        assert_eq!(service.call_count(AGENT_TASK), 3);
        assert_eq!(service.remaining(AGENT_TASK), 0);
    }

    #[tokio::test]
    async fn failing_turn_fails_the_call() {
        let service = ScriptedService::new();
        service.push_turn(AGENT_TASK, ScriptedTurn::failing("quota exceeded"));
        let agent = AgentDescriptor::new(AGENT_TASK, "m");
        assert!(service.stream(&[], &agent).await.is_err());
    }

    #[test]
    fn script_parses_from_json() {
        let script: Script = serde_json::from_value(json!({
            "turns": {
                "task": [
                    {"events": [{"type": "text", "content": "thinking"}]},
                    {"events": [{"type": "tool_call", "name": "task_complete",
                                 "arguments": {"result": "done"}}],
                     "usage": {"input_tokens": 10, "output_tokens": 5}}
                ]
            },
            "fallback": {"meta-cognition": {"events": []}}
        }))
        .unwrap();
        let service = ScriptedService::from_script(script);
        assert_eq!(service.remaining("task"), 2);
    }
}

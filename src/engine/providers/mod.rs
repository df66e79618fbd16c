// Paw Taskmind — Language-model service boundary
// The orchestrator and the metamemory engine talk to models only through
// `ModelService`. A call returns a lazy event stream that the caller drains
// once; tool calls are resolved through a one-shot gate on each
// `ToolCallStart` so side effects stay with whoever owns the tool runtime.

pub mod scripted;

pub use scripted::{Script, ScriptEvent, ScriptedService, ScriptedTurn};

use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::types::{AgentDescriptor, Message, TokenUsage, ToolCall, ToolDecision};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use log::warn;
use tokio::sync::oneshot;

/// Lazy, single-pass sequence of events for one call.
pub type EventStream = BoxStream<'static, StreamEvent>;

#[derive(Debug)]
pub enum StreamEvent {
    MessageStart {
        id: String,
    },
    MessageDelta {
        text: String,
    },
    MessageDone {
        message: Message,
    },
    /// The model asked for a tool. If `gate` is present the service waits for
    /// the caller's decision before running (or skipping) the call.
    ToolCallStart {
        call: ToolCall,
        gate: Option<oneshot::Sender<ToolDecision>>,
    },
    ToolCallDone {
        call: ToolCall,
        output: String,
    },
    /// Terminal success. `cost_usd` is estimated from `usage` when absent.
    Response {
        model: String,
        usage: TokenUsage,
        cost_usd: Option<f64>,
    },
    /// Terminal failure.
    Error {
        message: String,
    },
}

#[async_trait]
pub trait ModelService: Send + Sync {
    /// Short name used in error messages and logs.
    fn name(&self) -> &str;

    async fn stream(
        &self,
        messages: &[Message],
        agent: &AgentDescriptor,
    ) -> EngineResult<EventStream>;
}

/// Drain a call into its text. Used by the tagger and summarizer, which offer
/// no tools: any tool call is declined.
pub async fn collect_text(
    service: &dyn ModelService,
    messages: &[Message],
    agent: &AgentDescriptor,
) -> EngineResult<String> {
    let mut stream = service.stream(messages, agent).await?;
    let mut done = String::new();
    let mut deltas = String::new();
    let mut finished = false;

    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::MessageDelta { text } => deltas.push_str(&text),
            StreamEvent::MessageDone { message } => {
                done.push_str(&message.content);
                deltas.clear();
            }
            StreamEvent::ToolCallStart { call, gate } => {
                warn!(
                    "[{}] Declining tool call '{}' on a text-only call",
                    agent.name, call.name
                );
                if let Some(gate) = gate {
                    let _ = gate.send(ToolDecision::Skip {
                        reason: "no tools are available on this call".into(),
                    });
                }
            }
            StreamEvent::Response { .. } => finished = true,
            StreamEvent::Error { message } => {
                return Err(EngineError::provider(service.name(), message));
            }
            StreamEvent::MessageStart { .. } | StreamEvent::ToolCallDone { .. } => {}
        }
    }

    if !finished {
        return Err(EngineError::provider(
            service.name(),
            "stream ended without a response",
        ));
    }
    done.push_str(&deltas);
    Ok(done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::constants::AGENT_SUMMARIZER;

    #[tokio::test]
    async fn collect_text_joins_message() {
        let service = ScriptedService::new();
        service.push_text(AGENT_SUMMARIZER, "short summary");
        let agent = AgentDescriptor::new(AGENT_SUMMARIZER, "m");
        let text = collect_text(&service, &[Message::user("hi")], &agent)
            .await
            .unwrap();
        assert_eq!(text, "short summary");
    }

    #[tokio::test]
    async fn collect_text_surfaces_stream_error() {
        let service = ScriptedService::new();
        service.push_turn(
            AGENT_SUMMARIZER,
            ScriptedTurn::new(vec![ScriptEvent::Error {
                message: "overloaded".into(),
            }]),
        );
        let agent = AgentDescriptor::new(AGENT_SUMMARIZER, "m");
        let err = collect_text(&service, &[], &agent).await.unwrap_err();
        assert!(matches!(err, EngineError::Provider { .. }));
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn exhausted_script_is_an_error() {
        let service = ScriptedService::new();
        let agent = AgentDescriptor::new(AGENT_SUMMARIZER, "m");
        assert!(collect_text(&service, &[], &agent).await.is_err());
    }
}

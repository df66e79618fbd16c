// ── Metamemory: Message Tagger ──────────────────────────────────────────────
//
// One model call per batch: messages + known topic names in, a JSON map of
// message id → topic names out. The tagger never creates threads; the engine
// files results lazily. On failure the whole batch errors out and stays
// queued; there is no inline retry.

use crate::atoms::constants::{AGENT_TAGGER, EPHEMERAL_TOPIC};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::memory_types::MessageMetadata;
use crate::engine::providers::{collect_text, ModelService};
use crate::engine::types::{AgentDescriptor, AgentSettings, Message, MessageRef};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Max characters of one message shown to the tagger.
const TAGGER_MESSAGE_CHARS: usize = 1000;

#[async_trait]
pub trait Tagger: Send + Sync {
    /// Assign topics to every message in `batch`. Results only reference ids
    /// from the batch.
    async fn tag(
        &self,
        batch: &[MessageRef],
        known_topics: &[String],
    ) -> EngineResult<Vec<MessageMetadata>>;
}

/// Canonical topic key: trimmed, inner whitespace collapsed, lowercase.
pub fn normalize_topic(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ═════════════════════════════════════════════════════════════════════════════
// Output contract
// ═════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct TaggedEntry {
    id: String,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    summary: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TaggerOutput {
    Wrapped { messages: Vec<TaggedEntry> },
    Bare(Vec<TaggedEntry>),
}

/// Pull the JSON payload out of a reply that may wrap it in prose or fences.
fn extract_json(reply: &str) -> Option<&str> {
    let obj = reply.find('{').zip(reply.rfind('}'));
    let arr = reply.find('[').zip(reply.rfind(']'));
    let (start, end) = match (obj, arr) {
        (Some(o), Some(a)) => {
            if a.0 < o.0 {
                a
            } else {
                o
            }
        }
        (Some(o), None) => o,
        (None, Some(a)) => a,
        (None, None) => return None,
    };
    (start < end).then(|| &reply[start..=end])
}

/// Parse a tagger reply against the batch it was asked about.
/// Unknown ids are dropped; messages the model skipped become ephemeral.
pub fn parse_tagger_reply(reply: &str, batch: &[MessageRef]) -> EngineResult<Vec<MessageMetadata>> {
    let payload = extract_json(reply)
        .ok_or_else(|| EngineError::Memory("tagger reply contains no JSON".into()))?;
    let entries = match serde_json::from_str::<TaggerOutput>(payload)
        .map_err(|e| EngineError::Memory(format!("tagger reply is not valid: {}", e)))?
    {
        TaggerOutput::Wrapped { messages } => messages,
        TaggerOutput::Bare(entries) => entries,
    };

    let batch_ids: HashSet<&str> = batch.iter().map(|m| m.id.as_str()).collect();
    let now = Utc::now();
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(batch.len());

    for entry in entries {
        if !batch_ids.contains(entry.id.as_str()) {
            warn!("[tagger] Dropping tags for unknown message id {}", entry.id);
            continue;
        }
        if !seen.insert(entry.id.clone()) {
            continue;
        }
        let mut topics: Vec<String> = Vec::new();
        for t in entry.topics.iter().map(|t| normalize_topic(t)) {
            if !t.is_empty() && !topics.contains(&t) {
                topics.push(t);
            }
        }
        if topics.is_empty() {
            topics.push(EPHEMERAL_TOPIC.to_string());
        }
        out.push(MessageMetadata {
            message_id: entry.id,
            topics,
            summary: entry.summary.trim().to_string(),
            last_update: now,
        });
    }

    for m in batch {
        if !seen.contains(&m.id) {
            debug!("[tagger] Message {} left untagged, filing as ephemeral", m.id);
            out.push(MessageMetadata {
                message_id: m.id.clone(),
                topics: vec![EPHEMERAL_TOPIC.to_string()],
                summary: String::new(),
                last_update: now,
            });
        }
    }
    Ok(out)
}

// ═════════════════════════════════════════════════════════════════════════════
// Model-backed tagger
// ═════════════════════════════════════════════════════════════════════════════

pub struct LlmTagger {
    service: Arc<dyn ModelService>,
    model: String,
}

impl LlmTagger {
    pub fn new(service: Arc<dyn ModelService>, model: impl Into<String>) -> Self {
        LlmTagger {
            service,
            model: model.into(),
        }
    }

    fn instructions() -> String {
        format!(
            "You file conversation messages under topics. Reuse a known topic whenever \
             it fits; otherwise coin a short lowercase topic name. A message may have \
             several topics. Use \"{}\" for small talk or anything not worth keeping. \
             Reply with JSON only: {{\"messages\": [{{\"id\": \"<message id>\", \
             \"topics\": [\"<topic>\"], \"summary\": \"<one sentence>\"}}]}}",
            EPHEMERAL_TOPIC
        )
    }

    fn request(batch: &[MessageRef], known_topics: &[String]) -> String {
        let mut body = String::new();
        body.push_str("Known topics: ");
        if known_topics.is_empty() {
            body.push_str("(none)");
        } else {
            body.push_str(&known_topics.join(", "));
        }
        body.push_str("\n\nMessages:\n");
        for m in batch {
            let text: String = m.content.chars().take(TAGGER_MESSAGE_CHARS).collect();
            body.push_str(&format!("- id={} role={}: {}\n", m.id, m.role.as_str(), text));
        }
        body
    }
}

#[async_trait]
impl Tagger for LlmTagger {
    async fn tag(
        &self,
        batch: &[MessageRef],
        known_topics: &[String],
    ) -> EngineResult<Vec<MessageMetadata>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let agent = AgentDescriptor::new(AGENT_TAGGER, self.model.clone())
            .with_instructions(Self::instructions())
            .with_settings(AgentSettings {
                temperature: Some(0.0),
                max_output_tokens: None,
            });
        let messages = vec![
            Message::system(Self::instructions()),
            Message::user(Self::request(batch, known_topics)),
        ];
        let reply = collect_text(self.service.as_ref(), &messages, &agent).await?;
        parse_tagger_reply(&reply, batch)
    }
}

// ── Metamemory: Thread Compactor ────────────────────────────────────────────
//
// Periodic cycle over every thread except core, archived and ephemeral:
//
//   transition  active idle > active_to_idle    → idle + heavy compaction
//               idle idle > idle_to_archived    → archived + archival
//                                                  compaction + indexed
//   budget      active over its token budget     → light compaction
//               idle over its token budget       → heavy compaction
//
// A compaction pass summarises the oldest (total − preserve) members, appends
// the summary to the thread's running summary and drops those members from
// the thread. They stay in canonical history.

use super::thread_store::{is_inactive, ThreadStore};
use super::vector_index::VectorIndex;
use crate::atoms::constants::{AGENT_SUMMARIZER, SUMMARY_SEPARATOR};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::memory_types::{CompactionLevel, CompactionRecord, ThreadState};
use crate::engine::config::MetamemoryConfig;
use crate::engine::providers::{collect_text, ModelService};
use crate::engine::types::{AgentDescriptor, AgentSettings, Message, MessageRef, Role};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

// ═════════════════════════════════════════════════════════════════════════════
// Summarizer
// ═════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        topic: &str,
        messages: &[MessageRef],
        max_tokens: usize,
    ) -> EngineResult<String>;
}

pub struct LlmSummarizer {
    service: Arc<dyn ModelService>,
    model: String,
}

impl LlmSummarizer {
    pub fn new(service: Arc<dyn ModelService>, model: impl Into<String>) -> Self {
        LlmSummarizer {
            service,
            model: model.into(),
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}… (truncated)", head)
    } else {
        text.to_string()
    }
}

/// Build the prompt that asks the model to summarise one topic's oldest run.
fn build_summary_prompt(topic: &str, messages: &[MessageRef], max_tokens: usize) -> Vec<Message> {
    let mut transcript = String::new();
    for msg in messages {
        let role_label = match msg.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
            Role::System => "System",
        };
        let limit = if msg.role == Role::Tool { 200 } else { 500 };
        transcript.push_str(&format!("{}: {}\n", role_label, preview(&msg.content, limit)));
    }

    let system = Message::system(format!(
        "You are a conversation summarizer. Summarise the messages about the topic \
         \"{}\" so the conversation can continue without them. Keep key decisions, \
         stated preferences, open tasks and technical details. Stay under {} tokens.",
        topic, max_tokens
    ));
    let user = Message::user(format!("Please summarize these messages:\n\n{}", transcript));
    vec![system, user]
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(
        &self,
        topic: &str,
        messages: &[MessageRef],
        max_tokens: usize,
    ) -> EngineResult<String> {
        let agent = AgentDescriptor::new(AGENT_SUMMARIZER, self.model.clone()).with_settings(
            AgentSettings {
                temperature: Some(0.3),
                max_output_tokens: u32::try_from(max_tokens).ok(),
            },
        );
        let prompt = build_summary_prompt(topic, messages, max_tokens);
        let summary = collect_text(self.service.as_ref(), &prompt, &agent).await?;
        let summary = summary.trim().to_string();
        if summary.is_empty() {
            return Err(EngineError::Memory(format!(
                "summarizer produced an empty summary for '{}'",
                topic
            )));
        }
        Ok(summary)
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Cycle report
// ═════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub topic: String,
    pub from: ThreadState,
    pub to: ThreadState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompactionOutcome {
    pub topic: String,
    pub level: CompactionLevel,
    pub messages_compacted: usize,
    pub tokens_compacted: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub transitions: Vec<Transition>,
    pub compactions: Vec<CompactionOutcome>,
    /// Threads added to the archived index this cycle.
    pub indexed: Vec<String>,
    /// (topic, error) for every pass that failed.
    pub failures: Vec<(String, String)>,
}

// ═════════════════════════════════════════════════════════════════════════════
// Compactor
// ═════════════════════════════════════════════════════════════════════════════

pub struct Compactor {
    config: MetamemoryConfig,
    summarizer: Arc<dyn Summarizer>,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

impl Compactor {
    pub fn new(config: MetamemoryConfig, summarizer: Arc<dyn Summarizer>) -> Self {
        Compactor {
            config,
            summarizer,
            last_run: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MetamemoryConfig {
        &self.config
    }

    /// True when no cycle has run yet or the minimum interval has elapsed.
    pub fn should_run_compaction(&self, now: DateTime<Utc>) -> bool {
        match *self.last_run.lock() {
            None => true,
            Some(last) => Duration::try_seconds(self.config.min_compaction_interval_secs)
                .is_some_and(|interval| now - last >= interval),
        }
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        *self.last_run.lock()
    }

    /// Move a thread to `next`, refusing illegal lifecycle moves.
    pub fn transition(
        &self,
        store: &mut ThreadStore,
        name: &str,
        next: ThreadState,
    ) -> EngineResult<ThreadState> {
        let current = store
            .get(name)
            .ok_or_else(|| EngineError::Memory(format!("unknown topic thread '{}'", name)))?
            .state;
        if !current.can_transition_to(next) {
            return Err(EngineError::Memory(format!(
                "illegal transition {} → {} for '{}'",
                current.as_str(),
                next.as_str(),
                name
            )));
        }
        store.update_state(name, next)?;
        Ok(current)
    }

    /// One compaction pass. Returns `None` when nothing needed folding.
    pub async fn compact_thread(
        &self,
        store: &mut ThreadStore,
        name: &str,
        level: CompactionLevel,
    ) -> EngineResult<Option<CompactionRecord>> {
        let thread = store
            .get(name)
            .ok_or_else(|| EngineError::Memory(format!("unknown topic thread '{}'", name)))?;
        if thread.state == ThreadState::Ephemeral {
            return Err(EngineError::Memory(format!(
                "'{}' is ephemeral and is never summarized",
                name
            )));
        }

        let params = self.config.level(level);
        let total = thread.messages().len();
        let to_compact = total.saturating_sub(params.preserve_latest_messages);
        if to_compact == 0 {
            return Ok(None);
        }

        let batch: Vec<MessageRef> = thread.messages()[..to_compact].to_vec();
        let tokenizer = *store.tokenizer();
        let tokens_compacted: usize = batch.iter().map(|m| tokenizer.count_message(m)).sum();
        let boundary_message_id = batch
            .last()
            .map(|m| m.id.clone())
            .unwrap_or_default();

        let summary = self
            .summarizer
            .summarize(name, &batch, params.max_summary_tokens)
            .await?;
        let (summary, _) = tokenizer.truncate_to_budget(&summary, params.max_summary_tokens);

        let record = CompactionRecord {
            messages_compacted: to_compact,
            tokens_compacted,
            boundary_message_id,
            summary: summary.to_string(),
            level,
            compacted_at: Utc::now(),
        };
        store.apply_compaction(name, to_compact, record.clone(), SUMMARY_SEPARATOR)?;

        info!(
            "[compactor] {} compaction of '{}': {} message(s), ~{} tokens folded",
            level.as_str(),
            name,
            to_compact,
            tokens_compacted
        );
        Ok(Some(record))
    }

    /// Run one full cycle and stamp `last_run`.
    pub async fn run_cycle(
        &self,
        store: &mut ThreadStore,
        index: &mut VectorIndex,
        now: DateTime<Utc>,
    ) -> CycleReport {
        *self.last_run.lock() = Some(now);
        let mut report = CycleReport::default();

        for name in store.names() {
            let Some(thread) = store.get(&name) else {
                continue;
            };
            let state = thread.state;
            let tokens = thread.token_estimate();

            let (next, level) = match state {
                ThreadState::Core | ThreadState::Archived | ThreadState::Ephemeral => continue,
                ThreadState::Active
                    if is_inactive(thread, self.config.active_to_idle_minutes, now) =>
                {
                    (Some(ThreadState::Idle), CompactionLevel::Heavy)
                }
                ThreadState::Idle
                    if is_inactive(thread, self.config.idle_to_archived_minutes, now) =>
                {
                    (Some(ThreadState::Archived), CompactionLevel::Archival)
                }
                ThreadState::Active if tokens > self.config.max_tokens_per_active_thread => {
                    (None, CompactionLevel::Light)
                }
                ThreadState::Idle if tokens > self.config.max_tokens_per_idle_thread => {
                    (None, CompactionLevel::Heavy)
                }
                _ => continue,
            };

            if let Some(next) = next {
                match self.transition(store, &name, next) {
                    Ok(from) => {
                        info!(
                            "[compactor] '{}' {} → {}",
                            name,
                            from.as_str(),
                            next.as_str()
                        );
                        report.transitions.push(Transition {
                            topic: name.clone(),
                            from,
                            to: next,
                        });
                    }
                    Err(e) => {
                        warn!("[compactor] {}", e);
                        report.failures.push((name.clone(), e.to_string()));
                        continue;
                    }
                }
            }

            match self.compact_thread(store, &name, level).await {
                Ok(Some(record)) => report.compactions.push(CompactionOutcome {
                    topic: name.clone(),
                    level,
                    messages_compacted: record.messages_compacted,
                    tokens_compacted: record.tokens_compacted,
                }),
                Ok(None) => {}
                Err(e) => {
                    warn!("[compactor] Compaction of '{}' failed: {}", name, e);
                    report.failures.push((name.clone(), e.to_string()));
                }
            }

            if next == Some(ThreadState::Archived) {
                if let Some(thread) = store.get(&name) {
                    index.add_thread(thread);
                    report.indexed.push(name.clone());
                }
            }
        }

        report
    }
}

// ── Metamemory: Context Builder ─────────────────────────────────────────────
//
// Budget-aware assembly of the history sent on the next turn.
//
// Items are admitted in priority order until the budget runs out:
//
//   1. core threads       summary + members, always admitted
//   2. recent messages    newest first, verbatim
//   3. related summaries  threads referenced by admitted recent messages,
//                         plus their one-hop relations
//   4. archived hits      similarity search keyed on recent-message text
//
// Items are admitted whole or dropped whole, never truncated. The output is
// ordered for reading: core, related, archived, then recent (chronological).

use super::thread_store::ThreadStore;
use super::tokenizer::Tokenizer;
use super::vector_index::VectorIndex;
use crate::atoms::constants::{compacted_summary_content, ARCHIVED_QUERY_MAX_CHARS};
use crate::atoms::memory_types::{MessageMetadata, ThreadState};
use crate::engine::types::{Message, MessageRef};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

// ═════════════════════════════════════════════════════════════════════════════
// Public Types
// ═════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct ContextOptions {
    pub max_tokens: usize,
    pub include_idle_summaries: bool,
    pub include_archived_search: bool,
    pub recent_message_count: usize,
    pub archived_top_k: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        ContextOptions {
            max_tokens: 8000,
            include_idle_summaries: true,
            include_archived_search: true,
            recent_message_count: 20,
            archived_top_k: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSource {
    Core,
    Recent,
    Related,
    Archived,
}

#[derive(Debug, Clone)]
pub struct ContextItem {
    pub source: ContextSource,
    /// Topic the item stands for; `None` for raw recent messages.
    pub topic: Option<String>,
    pub message: MessageRef,
    pub tokens: usize,
}

/// Token accounting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BudgetReport {
    pub max_tokens: usize,
    pub used_tokens: usize,
    pub core_items: usize,
    pub recent_included: usize,
    pub recent_dropped: usize,
    pub related_included: usize,
    pub archived_included: usize,
    /// Optional items (related/archived) that did not fit.
    pub optional_dropped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    pub items: Vec<ContextItem>,
    pub budget: BudgetReport,
}

impl AssembledContext {
    /// Messages in send order.
    pub fn messages(&self) -> Vec<MessageRef> {
        self.items.iter().map(|i| i.message.clone()).collect()
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Builder
// ═════════════════════════════════════════════════════════════════════════════

/// Synthetic non-user message standing in for a topic's compacted run.
pub fn summary_message(topic: &str, summary: &str) -> MessageRef {
    Arc::new(
        Message::system(compacted_summary_content(topic, summary))
            .with_id(format!("compacted:{}", topic)),
    )
}

struct Budget {
    max: usize,
    used: usize,
}

impl Budget {
    fn admit(&mut self, cost: usize) -> bool {
        if self.used + cost <= self.max {
            self.used += cost;
            true
        } else {
            false
        }
    }
}

pub fn build_context(
    store: &ThreadStore,
    index: &VectorIndex,
    tagged: &BTreeMap<String, MessageMetadata>,
    history: &[MessageRef],
    options: &ContextOptions,
) -> AssembledContext {
    let tokenizer: Tokenizer = *store.tokenizer();
    let mut budget = Budget {
        max: options.max_tokens,
        used: 0,
    };
    let mut report = BudgetReport {
        max_tokens: options.max_tokens,
        ..Default::default()
    };
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut summarised: HashSet<String> = HashSet::new();

    // ── 1. Core ─────────────────────────────────────────────────────────
    let mut core_items = Vec::new();
    for thread in store.in_state(ThreadState::Core) {
        if !thread.summary().is_empty() {
            let msg = summary_message(&thread.name, thread.summary());
            let tokens = tokenizer.count_message(&msg);
            budget.used += tokens;
            summarised.insert(thread.name.clone());
            core_items.push(ContextItem {
                source: ContextSource::Core,
                topic: Some(thread.name.clone()),
                message: msg,
                tokens,
            });
        }
        for m in thread.messages() {
            if !seen_ids.insert(m.id.clone()) {
                continue;
            }
            let tokens = tokenizer.count_message(m);
            budget.used += tokens;
            core_items.push(ContextItem {
                source: ContextSource::Core,
                topic: Some(thread.name.clone()),
                message: m.clone(),
                tokens,
            });
        }
    }
    report.core_items = core_items.len();

    // ── 2. Recent ───────────────────────────────────────────────────────
    let start = history.len().saturating_sub(options.recent_message_count);
    let mut recent_items: Vec<ContextItem> = Vec::new();
    let mut out_of_budget = false;
    for m in history[start..].iter().rev() {
        if seen_ids.contains(&m.id) {
            continue;
        }
        let tokens = tokenizer.count_message(m);
        if out_of_budget || !budget.admit(tokens) {
            out_of_budget = true;
            report.recent_dropped += 1;
            continue;
        }
        seen_ids.insert(m.id.clone());
        recent_items.push(ContextItem {
            source: ContextSource::Recent,
            topic: None,
            message: m.clone(),
            tokens,
        });
    }
    recent_items.reverse();
    report.recent_included = recent_items.len();

    // ── 3. Related summaries ────────────────────────────────────────────
    let mut related_items = Vec::new();
    if options.include_idle_summaries {
        let mut candidates: Vec<String> = Vec::new();
        for item in recent_items.iter().rev() {
            let Some(meta) = tagged.get(&item.message.id) else {
                continue;
            };
            for topic in &meta.topics {
                if !candidates.contains(topic) {
                    candidates.push(topic.clone());
                }
                if let Some(thread) = store.get(topic) {
                    for rel in &thread.related {
                        if !candidates.contains(rel) {
                            candidates.push(rel.clone());
                        }
                    }
                }
            }
        }
        for name in candidates {
            let Some(thread) = store.get(&name) else {
                continue;
            };
            if thread.summary().is_empty()
                || matches!(thread.state, ThreadState::Core | ThreadState::Ephemeral)
                || summarised.contains(&name)
            {
                continue;
            }
            let msg = summary_message(&name, thread.summary());
            let tokens = tokenizer.count_message(&msg);
            if budget.admit(tokens) {
                summarised.insert(name.clone());
                related_items.push(ContextItem {
                    source: ContextSource::Related,
                    topic: Some(name),
                    message: msg,
                    tokens,
                });
            } else {
                report.optional_dropped += 1;
            }
        }
    }
    report.related_included = related_items.len();

    // ── 4. Archived search ──────────────────────────────────────────────
    let mut archived_items = Vec::new();
    if options.include_archived_search && index.size() > 0 && !recent_items.is_empty() {
        let mut query = String::new();
        for item in &recent_items {
            if !query.is_empty() {
                query.push('\n');
            }
            query.push_str(&item.message.content);
        }
        let query: String = query.chars().take(ARCHIVED_QUERY_MAX_CHARS).collect();
        for hit in index.search(&query, options.archived_top_k) {
            if summarised.contains(&hit.name) || hit.summary.is_empty() {
                continue;
            }
            let msg = summary_message(&hit.name, &hit.summary);
            let tokens = tokenizer.count_message(&msg);
            if budget.admit(tokens) {
                summarised.insert(hit.name.clone());
                archived_items.push(ContextItem {
                    source: ContextSource::Archived,
                    topic: Some(hit.name),
                    message: msg,
                    tokens,
                });
            } else {
                report.optional_dropped += 1;
            }
        }
    }
    report.archived_included = archived_items.len();
    report.used_tokens = budget.used;

    let mut items = core_items;
    items.extend(related_items);
    items.extend(archived_items);
    items.extend(recent_items);
    AssembledContext {
        items,
        budget: report,
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn msg(text: &str) -> MessageRef {
        Arc::new(Message::user(text))
    }

    fn tag(tagged: &mut BTreeMap<String, MessageMetadata>, m: &MessageRef, topics: &[&str]) {
        tagged.insert(
            m.id.clone(),
            MessageMetadata {
                message_id: m.id.clone(),
                topics: topics.iter().map(|t| t.to_string()).collect(),
                summary: String::new(),
                last_update: Utc::now(),
            },
        );
    }

    #[test]
    fn core_always_included_even_over_budget() {
        let mut store = ThreadStore::new();
        store.create("identity", ThreadState::Core);
        store.update_summary("identity", "the user is a rust dev".repeat(20)).unwrap();
        let history = vec![msg("hello")];
        let opts = ContextOptions {
            max_tokens: 10,
            ..Default::default()
        };
        let ctx = build_context(&store, &VectorIndex::default(), &BTreeMap::new(), &history, &opts);
        assert_eq!(ctx.items[0].source, ContextSource::Core);
        assert!(ctx.items[0].message.content.starts_with("[Compacted summary for topic \"identity\"]: "));
        assert_eq!(ctx.budget.recent_dropped, 1);
    }

    #[test]
    fn recent_kept_newest_first_and_returned_in_order() {
        let store = ThreadStore::new();
        let history: Vec<MessageRef> = (0..10).map(|i| msg(&format!("message {}", i))).collect();
        let per = store.tokenizer().count_message(&history[0]);
        let opts = ContextOptions {
            max_tokens: per * 3,
            ..Default::default()
        };
        let ctx = build_context(&store, &VectorIndex::default(), &BTreeMap::new(), &history, &opts);
        let texts: Vec<&str> = ctx.items.iter().map(|i| i.message.content.as_str()).collect();
        assert_eq!(texts, vec!["message 7", "message 8", "message 9"]);
        assert_eq!(ctx.budget.recent_dropped, 7);
    }

    #[test]
    fn related_summaries_follow_one_hop() {
        let mut store = ThreadStore::new();
        store.create("db", ThreadState::Active);
        store.create("perf", ThreadState::Idle);
        store.create("far", ThreadState::Idle);
        store.update_summary("db", "tables").unwrap();
        store.update_summary("perf", "indexes").unwrap();
        store.update_summary("far", "unrelated").unwrap();
        store.relate("db", "perf").unwrap();
        store.relate("perf", "far").unwrap();

        let m = msg("add an orders table");
        let mut tagged = BTreeMap::new();
        tag(&mut tagged, &m, &["db"]);
        let ctx = build_context(
            &store,
            &VectorIndex::default(),
            &tagged,
            &[m],
            &ContextOptions::default(),
        );
        let topics: Vec<_> = ctx
            .items
            .iter()
            .filter(|i| i.source == ContextSource::Related)
            .filter_map(|i| i.topic.clone())
            .collect();
        assert_eq!(topics, vec!["db".to_string(), "perf".to_string()]);
        assert_eq!(ctx.items.last().unwrap().source, ContextSource::Recent);
    }

    #[test]
    fn archived_hits_included_when_enabled() {
        let store = ThreadStore::new();
        let mut index = VectorIndex::default();
        index.add("database", "database schema design");
        let history = vec![msg("how do we speed up the database")];
        let ctx = build_context(&store, &index, &BTreeMap::new(), &history, &ContextOptions::default());
        assert_eq!(ctx.budget.archived_included, 1);

        let opts = ContextOptions {
            include_archived_search: false,
            ..Default::default()
        };
        let ctx = build_context(&store, &index, &BTreeMap::new(), &history, &opts);
        assert_eq!(ctx.budget.archived_included, 0);
    }
}

// ── Metamemory: Topic Thread Store ──────────────────────────────────────────
//
// Per-topic state keyed by normalised topic name. Threads hold `Arc`
// references to history messages, never copies. The token estimate is
// recomputed on every mutation of members or summary, so it always equals
// `Tokenizer::count_thread(messages, summary)`.
//
// The store does not police lifecycle legality; the compactor does.

use super::tokenizer::Tokenizer;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::memory_types::{CompactionRecord, ThreadState};
use crate::engine::types::MessageRef;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};

// ═════════════════════════════════════════════════════════════════════════════
// Topic thread
// ═════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct TopicThread {
    pub name: String,
    pub state: ThreadState,
    messages: Vec<MessageRef>,
    summary: String,
    token_estimate: usize,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub related: BTreeSet<String>,
    pub description: String,
    pub target_compaction_percent: u8,
    /// Every compaction applied to this thread, oldest first.
    pub compactions: Vec<CompactionRecord>,
}

impl TopicThread {
    fn new(name: &str, state: ThreadState) -> Self {
        let now = Utc::now();
        TopicThread {
            name: name.to_string(),
            state,
            messages: Vec::new(),
            summary: String::new(),
            token_estimate: 0,
            created_at: now,
            last_active: now,
            related: BTreeSet::new(),
            description: String::new(),
            target_compaction_percent: state.default_target_compaction_percent(),
            compactions: Vec::new(),
        }
    }

    pub fn messages(&self) -> &[MessageRef] {
        &self.messages
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn token_estimate(&self) -> usize {
        self.token_estimate
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.messages.iter().any(|m| m.id == message_id)
    }

    /// Id of the newest message folded into a summary, if any.
    pub fn last_boundary(&self) -> Option<&str> {
        self.compactions
            .last()
            .map(|c| c.boundary_message_id.as_str())
    }

    fn recompute(&mut self, tokenizer: &Tokenizer) {
        self.token_estimate =
            tokenizer.count_thread(self.messages.iter().map(|m| m.as_ref()), &self.summary);
    }
}

/// now − last_active > threshold.
pub fn is_inactive(thread: &TopicThread, threshold_minutes: i64, now: DateTime<Utc>) -> bool {
    // Out-of-range thresholds never elapse.
    Duration::try_minutes(threshold_minutes).is_some_and(|limit| now - thread.last_active > limit)
}

// ═════════════════════════════════════════════════════════════════════════════
// Store
// ═════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct ThreadStore {
    threads: BTreeMap<String, TopicThread>,
    tokenizer: Tokenizer,
}

impl ThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a thread, or return the existing one untouched.
    pub fn create(&mut self, name: &str, state: ThreadState) -> &mut TopicThread {
        self.threads
            .entry(name.to_string())
            .or_insert_with(|| TopicThread::new(name, state))
    }

    pub fn get(&self, name: &str) -> Option<&TopicThread> {
        self.threads.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.threads.contains_key(name)
    }

    fn thread_mut(&mut self, name: &str) -> EngineResult<&mut TopicThread> {
        self.threads
            .get_mut(name)
            .ok_or_else(|| EngineError::Memory(format!("unknown topic thread '{}'", name)))
    }

    /// Add a message and mark the thread active now. Returns false (and
    /// changes nothing) if the message is already a member.
    pub fn add_message(&mut self, name: &str, message: MessageRef) -> EngineResult<bool> {
        let added = self.attach_message(name, message)?;
        if added {
            self.thread_mut(name)?.last_active = Utc::now();
        }
        Ok(added)
    }

    /// Add a message without touching `last_active` (restores, replays).
    pub fn attach_message(&mut self, name: &str, message: MessageRef) -> EngineResult<bool> {
        let tokenizer = self.tokenizer;
        let thread = self.thread_mut(name)?;
        if thread.contains(&message.id) {
            return Ok(false);
        }
        thread.messages.push(message);
        thread.recompute(&tokenizer);
        Ok(true)
    }

    pub fn update_state(&mut self, name: &str, state: ThreadState) -> EngineResult<()> {
        let thread = self.thread_mut(name)?;
        thread.state = state;
        thread.target_compaction_percent = state.default_target_compaction_percent();
        Ok(())
    }

    pub fn update_summary(&mut self, name: &str, summary: impl Into<String>) -> EngineResult<()> {
        let tokenizer = self.tokenizer;
        let thread = self.thread_mut(name)?;
        thread.summary = summary.into();
        thread.recompute(&tokenizer);
        Ok(())
    }

    /// Fold a compaction into the thread: drop the oldest `count` members,
    /// append the summary and record the pass.
    pub fn apply_compaction(
        &mut self,
        name: &str,
        count: usize,
        record: CompactionRecord,
        separator: &str,
    ) -> EngineResult<()> {
        let tokenizer = self.tokenizer;
        let thread = self.thread_mut(name)?;
        let count = count.min(thread.messages.len());
        thread.messages.drain(..count);
        if !record.summary.is_empty() {
            if thread.summary.is_empty() {
                thread.summary = record.summary.clone();
            } else {
                thread.summary = format!("{}{}{}", thread.summary, separator, record.summary);
            }
        }
        thread.compactions.push(record);
        thread.recompute(&tokenizer);
        Ok(())
    }

    /// Restore path: install records and derived summary wholesale.
    pub fn set_compactions(
        &mut self,
        name: &str,
        records: Vec<CompactionRecord>,
        separator: &str,
    ) -> EngineResult<()> {
        let summary = records
            .iter()
            .map(|r| r.summary.as_str())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(separator);
        self.thread_mut(name)?.compactions = records;
        self.update_summary(name, summary)
    }

    /// Record a symmetric relationship. Self-relations are ignored.
    pub fn relate(&mut self, a: &str, b: &str) -> EngineResult<()> {
        if a == b {
            return Ok(());
        }
        self.thread_mut(a)?.related.insert(b.to_string());
        self.thread_mut(b)?.related.insert(a.to_string());
        Ok(())
    }

    pub fn set_last_active(&mut self, name: &str, at: DateTime<Utc>) -> EngineResult<()> {
        self.thread_mut(name)?.last_active = at;
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<TopicThread> {
        let removed = self.threads.remove(name)?;
        for other in self.threads.values_mut() {
            other.related.remove(name);
        }
        Some(removed)
    }

    pub fn names(&self) -> Vec<String> {
        self.threads.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TopicThread> {
        self.threads.values()
    }

    pub fn in_state(&self, state: ThreadState) -> impl Iterator<Item = &TopicThread> {
        self.threads.values().filter(move |t| t.state == state)
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn clear(&mut self) {
        self.threads.clear();
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::memory_types::CompactionLevel;
    use crate::engine::types::Message;
    use std::sync::Arc;

    fn msg(text: &str) -> MessageRef {
        Arc::new(Message::user(text))
    }

    fn assert_estimate(store: &ThreadStore, name: &str) {
        let t = store.get(name).unwrap();
        let expected = store
            .tokenizer()
            .count_thread(t.messages().iter().map(|m| m.as_ref()), t.summary());
        assert_eq!(t.token_estimate(), expected);
    }

    #[test]
    fn create_is_idempotent() {
        let mut store = ThreadStore::new();
        store.create("db", ThreadState::Active);
        store.add_message("db", msg("hello")).unwrap();
        store.create("db", ThreadState::Idle);
        let t = store.get("db").unwrap();
        assert_eq!(t.state, ThreadState::Active);
        assert_eq!(t.messages().len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn duplicate_message_is_noop() {
        let mut store = ThreadStore::new();
        store.create("db", ThreadState::Active);
        let m = msg("same");
        assert!(store.add_message("db", m.clone()).unwrap());
        assert!(!store.add_message("db", m).unwrap());
        assert_eq!(store.get("db").unwrap().messages().len(), 1);
    }

    #[test]
    fn estimate_tracks_every_mutation() {
        let mut store = ThreadStore::new();
        store.create("db", ThreadState::Active);
        for i in 0..5 {
            store.add_message("db", msg(&format!("message number {}", i))).unwrap();
            assert_estimate(&store, "db");
        }
        store.update_summary("db", "a summary").unwrap();
        assert_estimate(&store, "db");
        let record = CompactionRecord {
            messages_compacted: 3,
            tokens_compacted: 10,
            boundary_message_id: "x".into(),
            summary: "more".into(),
            level: CompactionLevel::Light,
            compacted_at: Utc::now(),
        };
        store.apply_compaction("db", 3, record, "\n\n").unwrap();
        assert_estimate(&store, "db");
        let t = store.get("db").unwrap();
        assert_eq!(t.messages().len(), 2);
        assert_eq!(t.summary(), "a summary\n\nmore");
    }

    #[test]
    fn inactivity_is_strictly_greater() {
        let mut store = ThreadStore::new();
        store.create("db", ThreadState::Active);
        let now = Utc::now();
        store.set_last_active("db", now - Duration::minutes(60)).unwrap();
        assert!(!is_inactive(store.get("db").unwrap(), 60, now));
        store.set_last_active("db", now - Duration::minutes(65)).unwrap();
        assert!(is_inactive(store.get("db").unwrap(), 60, now));
        assert!(!is_inactive(store.get("db").unwrap(), i64::MAX / 2, now));
    }

    #[test]
    fn relations_are_symmetric_and_cleaned_on_remove() {
        let mut store = ThreadStore::new();
        store.create("a", ThreadState::Active);
        store.create("b", ThreadState::Active);
        store.relate("a", "b").unwrap();
        assert!(store.get("b").unwrap().related.contains("a"));
        store.remove("b");
        assert!(store.get("a").unwrap().related.is_empty());
    }

    #[test]
    fn unknown_thread_is_memory_error() {
        let mut store = ThreadStore::new();
        assert!(matches!(
            store.add_message("nope", msg("x")),
            Err(EngineError::Memory(_))
        ));
    }
}

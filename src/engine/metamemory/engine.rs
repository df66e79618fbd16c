// ── Metamemory: Engine ──────────────────────────────────────────────────────
//
// Composes the thread store, tagger, compactor, context builder and archived
// index behind `process_messages` / `build_context`.
//
// At most one processing pass runs at a time. A call that finds a pass in
// flight appends its messages to the queue and returns `Queued`; the next
// pass drains them. A pass works on a private copy of the memory state and
// publishes it when done, so `build_context` keeps serving the previous
// state meanwhile. Operations that rewrite state outside a pass (manual
// compaction, promotion, restore, reattach) take the same guard and fail
// with `Busy` instead of waiting.

use super::compactor::{Compactor, CycleReport, LlmSummarizer, Summarizer};
use super::context_builder::{self, AssembledContext, ContextOptions};
use super::tagger::{normalize_topic, LlmTagger, Tagger};
use super::thread_store::{ThreadStore, TopicThread};
use super::vector_index::{Embedder, HashEmbedder, SearchHit, VectorIndex};
use crate::atoms::constants::{EPHEMERAL_TOPIC, SUMMARY_SEPARATOR};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::memory_types::{
    CompactionLevel, CompactionRecord, MessageMetadata, MetamemorySnapshot, TaggedMessageRecord,
    ThreadState, TopicRecord,
};
use crate::engine::config::{MetamemoryConfig, ModelCatalog};
use crate::engine::providers::ModelService;
use crate::engine::types::MessageRef;
use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ═════════════════════════════════════════════════════════════════════════════
// State & reports
// ═════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct MemoryState {
    store: ThreadStore,
    index: VectorIndex,
    tagged: BTreeMap<String, MessageMetadata>,
    last_processed_index: usize,
}

impl MemoryState {
    fn empty(embedder: Arc<dyn Embedder>) -> Self {
        MemoryState {
            store: ThreadStore::new(),
            index: VectorIndex::new(embedder),
            tagged: BTreeMap::new(),
            last_processed_index: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub tagged: usize,
    pub batches: usize,
    /// Topics that did not exist before this pass.
    pub new_topics: Vec<String>,
    /// Tagging failures; the failed batch is still queued.
    pub failures: Vec<String>,
    pub cycle: Option<CycleReport>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// Another pass is running; messages were queued for it or the next one.
    Queued { queued: usize },
    /// Fewer than `processing_threshold` messages are waiting.
    Deferred { queued: usize },
    Processed(PassReport),
}

/// Clears the in-flight flag when dropped.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Engine
// ═════════════════════════════════════════════════════════════════════════════

pub struct MetamemoryEngine {
    config: MetamemoryConfig,
    tagger: Arc<dyn Tagger>,
    compactor: Compactor,
    embedder: Arc<dyn Embedder>,
    state: RwLock<MemoryState>,
    queue: Mutex<VecDeque<MessageRef>>,
    /// Ids taken off the queue by the running pass but not yet published.
    in_flight: Mutex<HashSet<String>>,
    processing: AtomicBool,
}

impl MetamemoryEngine {
    pub fn new(
        config: MetamemoryConfig,
        tagger: Arc<dyn Tagger>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
        MetamemoryEngine {
            compactor: Compactor::new(config.clone(), summarizer),
            config,
            tagger,
            state: RwLock::new(MemoryState::empty(embedder.clone())),
            embedder,
            queue: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(HashSet::new()),
            processing: AtomicBool::new(false),
        }
    }

    /// Model-backed tagger and summarizer over one service. Classes in the
    /// config resolve to the first model the catalog lists.
    pub fn with_service(
        config: MetamemoryConfig,
        service: Arc<dyn ModelService>,
        catalog: &ModelCatalog,
    ) -> Self {
        let first = |request: &str| {
            catalog
                .candidates(request)
                .into_iter()
                .next()
                .unwrap_or_else(|| request.to_string())
        };
        let tagger = Arc::new(LlmTagger::new(service.clone(), first(&config.tagger_model)));
        let summarizer = Arc::new(LlmSummarizer::new(service, first(&config.summarizer_model)));
        Self::new(config, tagger, summarizer)
    }

    /// Replace the embedding function. Call before any data is indexed.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.state = RwLock::new(MemoryState::empty(embedder.clone()));
        self.embedder = embedder;
        self
    }

    pub fn config(&self) -> &MetamemoryConfig {
        &self.config
    }

    fn try_guard(&self) -> Option<PassGuard<'_>> {
        self.processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PassGuard(&self.processing))
    }

    fn exclusive(&self, what: &str) -> EngineResult<PassGuard<'_>> {
        self.try_guard()
            .ok_or_else(|| EngineError::Busy(format!("{}: a processing pass is in flight", what)))
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub fn queued_len(&self) -> usize {
        self.queue.lock().len()
    }

    // ── Ingestion ──────────────────────────────────────────────────────

    /// Queue messages not yet tagged, queued or in flight. Returns how many
    /// were added.
    ///
    /// Lock order is queue, then in-flight set, then state. A pass publishes
    /// its state before it clears the in-flight set, so an id is always
    /// visible in at least one of the three.
    fn enqueue(&self, messages: &[MessageRef]) -> usize {
        let mut queue = self.queue.lock();
        let in_flight = self.in_flight.lock();
        let state = self.state.read();
        let mut added = 0;
        for m in messages {
            if state.tagged.contains_key(&m.id)
                || in_flight.contains(&m.id)
                || queue.iter().any(|q| q.id == m.id)
            {
                continue;
            }
            queue.push_back(m.clone());
            added += 1;
        }
        added
    }

    pub async fn process_messages(&self, messages: &[MessageRef]) -> PassOutcome {
        self.enqueue(messages);

        let Some(_guard) = self.try_guard() else {
            let queued = self.queued_len();
            debug!("[metamemory] Pass in flight, {} message(s) queued", queued);
            return PassOutcome::Queued { queued };
        };

        let queued = self.queued_len();
        if queued < self.config.processing_threshold {
            return PassOutcome::Deferred { queued };
        }

        let mut working = self.state.read().clone();
        let mut report = PassReport::default();

        loop {
            let batch: Vec<MessageRef> = {
                let queue = self.queue.lock();
                queue
                    .iter()
                    .take(self.config.sliding_window_size)
                    .cloned()
                    .collect()
            };
            if batch.is_empty() {
                break;
            }

            let known = known_topics(&working.store);
            match self.tagger.tag(&batch, &known).await {
                Ok(tags) => {
                    let before: HashSet<String> = working.store.names().into_iter().collect();
                    file_tags(&mut working, &batch, tags);
                    for name in working.store.names() {
                        if !before.contains(&name) && name != EPHEMERAL_TOPIC {
                            report.new_topics.push(name);
                        }
                    }
                    {
                        let mut queue = self.queue.lock();
                        let mut in_flight = self.in_flight.lock();
                        for _ in 0..batch.len() {
                            if let Some(m) = queue.pop_front() {
                                in_flight.insert(m.id.clone());
                            }
                        }
                    }
                    working.last_processed_index += batch.len();
                    report.tagged += batch.len();
                    report.batches += 1;
                }
                Err(e) => {
                    warn!(
                        "[metamemory] Tagging failed, {} message(s) stay queued: {}",
                        batch.len(),
                        e
                    );
                    report.failures.push(e.to_string());
                    break;
                }
            }
        }

        let now = Utc::now();
        if self.compactor.should_run_compaction(now) {
            let cycle = self
                .compactor
                .run_cycle(&mut working.store, &mut working.index, now)
                .await;
            report.cycle = Some(cycle);
        }

        {
            let mut in_flight = self.in_flight.lock();
            *self.state.write() = working;
            in_flight.clear();
        }
        info!(
            "[metamemory] Pass done: {} tagged in {} batch(es), {} new topic(s), {} failure(s)",
            report.tagged,
            report.batches,
            report.new_topics.len(),
            report.failures.len()
        );
        PassOutcome::Processed(report)
    }

    // ── Context ────────────────────────────────────────────────────────

    pub fn build_context(&self, history: &[MessageRef], options: &ContextOptions) -> AssembledContext {
        let state = self.state.read();
        context_builder::build_context(&state.store, &state.index, &state.tagged, history, options)
    }

    pub fn search_archived(&self, query: &str, top_k: usize) -> Vec<SearchHit> {
        self.state.read().index.search(query, top_k)
    }

    // ── Inspection ─────────────────────────────────────────────────────

    pub fn thread(&self, name: &str) -> Option<TopicThread> {
        self.state.read().store.get(&normalize_topic(name)).cloned()
    }

    pub fn topics(&self) -> Vec<String> {
        self.state.read().store.names()
    }

    pub fn metadata(&self, message_id: &str) -> Option<MessageMetadata> {
        self.state.read().tagged.get(message_id).cloned()
    }

    // ── Operator actions ───────────────────────────────────────────────

    /// Run a compaction cycle now, ignoring the minimum interval.
    pub async fn run_compaction_cycle(&self) -> EngineResult<CycleReport> {
        let _guard = self.exclusive("compaction cycle")?;
        let mut working = self.state.read().clone();
        let report = self
            .compactor
            .run_cycle(&mut working.store, &mut working.index, Utc::now())
            .await;
        *self.state.write() = working;
        Ok(report)
    }

    /// Compact one thread at `level`, bypassing the cycle.
    pub async fn compact_thread_by_name(
        &self,
        name: &str,
        level: CompactionLevel,
    ) -> EngineResult<Option<CompactionRecord>> {
        let _guard = self.exclusive("manual compaction")?;
        let name = normalize_topic(name);
        let mut working = self.state.read().clone();
        let record = self
            .compactor
            .compact_thread(&mut working.store, &name, level)
            .await?;
        if let Some(thread) = working.store.get(&name) {
            if thread.state == ThreadState::Archived {
                working.index.add_thread(thread);
            }
        }
        *self.state.write() = working;
        Ok(record)
    }

    /// Make a topic core. Legal from any state; creates the topic if needed.
    pub fn promote_to_core(&self, name: &str) -> EngineResult<()> {
        let _guard = self.exclusive("core promotion")?;
        let name = normalize_topic(name);
        if name.is_empty() || name == EPHEMERAL_TOPIC {
            return Err(EngineError::Validation(format!(
                "'{}' cannot be promoted to core",
                name
            )));
        }
        let mut state = self.state.write();
        state.store.create(&name, ThreadState::Core);
        state.store.update_state(&name, ThreadState::Core)?;
        state.index.remove_thread(&name);
        info!("[metamemory] Promoted '{}' to core", name);
        Ok(())
    }

    // ── Persistence ────────────────────────────────────────────────────

    pub fn get_state(&self) -> MetamemorySnapshot {
        let state = self.state.read();
        let mut snapshot = MetamemorySnapshot {
            last_processed_index: state.last_processed_index,
            ..Default::default()
        };
        for thread in state.store.iter() {
            if thread.state == ThreadState::Ephemeral {
                continue;
            }
            snapshot.topics.insert(
                thread.name.clone(),
                TopicRecord {
                    kind: thread.state,
                    description: thread.description.clone(),
                    last_update: thread.last_active,
                    target_compaction_percent: thread.target_compaction_percent,
                    related: thread.related.iter().cloned().collect(),
                },
            );
            if !thread.compactions.is_empty() {
                snapshot
                    .compactions
                    .insert(thread.name.clone(), thread.compactions.clone());
            }
        }
        for (id, meta) in &state.tagged {
            snapshot.tagged_messages.insert(
                id.clone(),
                TaggedMessageRecord {
                    topics: meta.topics.clone(),
                    summary: meta.summary.clone(),
                    last_update: meta.last_update,
                },
            );
        }
        snapshot
    }

    /// Replace all memory state with `snapshot`. Threads come back without
    /// member messages; use `reattach_history` to re-file them.
    ///
    /// Topic names are normalised on the way in, so a hand-edited or older
    /// snapshot spelling "Database" restores to the same thread the tagger
    /// files "database" under. Keys that collide after normalising merge.
    pub fn restore_state(&self, snapshot: &MetamemorySnapshot) -> EngineResult<()> {
        let _guard = self.exclusive("restore")?;
        let mut restored = MemoryState::empty(self.embedder.clone());

        for (raw, record) in &snapshot.topics {
            let name = normalize_topic(raw);
            if name.is_empty() {
                warn!("[metamemory] Snapshot topic '{}' has an empty name, skipped", raw);
                continue;
            }
            let thread = restored.store.create(&name, record.kind);
            thread.state = record.kind;
            thread.description = record.description.clone();
            thread.last_active = record.last_update;
            thread.target_compaction_percent = record.target_compaction_percent;
            thread.related.extend(
                record
                    .related
                    .iter()
                    .map(|r| normalize_topic(r))
                    .filter(|r| !r.is_empty() && *r != name),
            );
        }
        for (raw, records) in &snapshot.compactions {
            let name = &normalize_topic(raw);
            if !restored.store.contains(name) {
                warn!("[metamemory] Snapshot has compactions for unknown topic '{}'", name);
                continue;
            }
            restored
                .store
                .set_compactions(name, records.clone(), SUMMARY_SEPARATOR)?;
        }
        for thread in restored.store.in_state(ThreadState::Archived) {
            restored.index.add(&thread.name, thread.summary());
        }
        for (id, record) in &snapshot.tagged_messages {
            restored.tagged.insert(
                id.clone(),
                MessageMetadata {
                    message_id: id.clone(),
                    topics: dedup_normalized(&record.topics),
                    summary: record.summary.clone(),
                    last_update: record.last_update,
                },
            );
        }
        restored.last_processed_index = snapshot.last_processed_index;

        *self.state.write() = restored;
        self.queue.lock().clear();
        info!(
            "[metamemory] Restored {} topic(s), {} tagged message(s)",
            snapshot.topics.len(),
            snapshot.tagged_messages.len()
        );
        Ok(())
    }

    /// Re-file tagged history messages into their threads after a restore.
    /// Archived threads stay frozen, and messages at or before a thread's
    /// last compaction boundary are already covered by its summary.
    pub fn reattach_history(&self, history: &[MessageRef]) -> EngineResult<usize> {
        let _guard = self.exclusive("reattach")?;
        let position: HashMap<&str, usize> = history
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id.as_str(), i))
            .collect();

        let mut state = self.state.write();
        let mut attached = 0;
        for (i, message) in history.iter().enumerate() {
            let Some(meta) = state.tagged.get(&message.id).cloned() else {
                continue;
            };
            for topic in &meta.topics {
                if topic == EPHEMERAL_TOPIC {
                    state.store.create(EPHEMERAL_TOPIC, ThreadState::Ephemeral);
                    if state.store.attach_message(EPHEMERAL_TOPIC, message.clone())? {
                        attached += 1;
                    }
                    continue;
                }
                let Some(thread) = state.store.get(topic) else {
                    continue;
                };
                if thread.state == ThreadState::Archived {
                    continue;
                }
                let covered = thread
                    .last_boundary()
                    .and_then(|b| position.get(b))
                    .is_some_and(|&b| i <= b);
                if covered {
                    continue;
                }
                if state.store.attach_message(topic, message.clone())? {
                    attached += 1;
                }
            }
        }
        debug!("[metamemory] Reattached {} message reference(s)", attached);
        Ok(attached)
    }

    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        super::snapshot::save_snapshot(path, &self.get_state())
    }

    pub fn load_snapshot(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let snapshot = super::snapshot::load_snapshot(path)?;
        self.restore_state(&snapshot)
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Filing
// ═════════════════════════════════════════════════════════════════════════════

fn known_topics(store: &ThreadStore) -> Vec<String> {
    store
        .iter()
        .filter(|t| t.state != ThreadState::Ephemeral)
        .map(|t| t.name.clone())
        .collect()
}

/// Normalised, non-empty topic names in first-seen order.
fn dedup_normalized(topics: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for t in topics.iter().map(|t| normalize_topic(t)) {
        if !t.is_empty() && !out.contains(&t) {
            out.push(t);
        }
    }
    out
}

/// Apply one batch of tagger output to the working state.
fn file_tags(state: &mut MemoryState, batch: &[MessageRef], tags: Vec<MessageMetadata>) {
    let by_id: HashMap<&str, &MessageRef> = batch.iter().map(|m| (m.id.as_str(), m)).collect();

    for mut meta in tags {
        let Some(message) = by_id.get(meta.message_id.as_str()).map(|m| (*m).clone()) else {
            continue;
        };

        let topics: Vec<String> = dedup_normalized(&meta.topics)
            .into_iter()
            .filter(|t| t != EPHEMERAL_TOPIC)
            .collect();

        if topics.is_empty() {
            state.store.create(EPHEMERAL_TOPIC, ThreadState::Ephemeral);
            if let Err(e) = state.store.add_message(EPHEMERAL_TOPIC, message) {
                warn!("[metamemory] {}", e);
            }
            meta.topics = vec![EPHEMERAL_TOPIC.to_string()];
            state.tagged.insert(meta.message_id.clone(), meta);
            continue;
        }

        for topic in &topics {
            let thread = state.store.create(topic, ThreadState::Active);
            if thread.state == ThreadState::Archived {
                debug!("[metamemory] '{}' is archived; recording metadata only", topic);
                continue;
            }
            if thread.description.is_empty() && !meta.summary.is_empty() {
                thread.description = meta.summary.clone();
            }
            if let Err(e) = state.store.add_message(topic, message.clone()) {
                warn!("[metamemory] {}", e);
            }
        }
        for (i, a) in topics.iter().enumerate() {
            for b in &topics[i + 1..] {
                if let Err(e) = state.store.relate(a, b) {
                    warn!("[metamemory] {}", e);
                }
            }
        }

        meta.topics = topics;
        state.tagged.insert(meta.message_id.clone(), meta);
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════

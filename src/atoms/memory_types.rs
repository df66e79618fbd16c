// ── Paw Atoms: Metamemory Types ──────────────────────────────────────────────
// Plain data for topic threads, compaction records and the persisted
// metamemory snapshot. No I/O here; behaviour lives in engine/metamemory/.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 1: Thread lifecycle
// ═══════════════════════════════════════════════════════════════════════════

/// Retention policy of a topic thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadState {
    /// Always in context; exempt from inactivity transitions and archival.
    Core,
    /// Receiving messages; compacted lightly when over budget.
    Active,
    /// Quiet for a while; compacted heavily.
    Idle,
    /// Frozen. Only its final summary survives, in the vector index.
    Archived,
    /// Throwaway chatter. Never summarized.
    Ephemeral,
}

impl ThreadState {
    /// Whether `self → next` is a legal lifecycle move.
    /// Forward moves are active→idle→archived; core promotion is legal from
    /// anywhere. Staying put is always legal.
    pub fn can_transition_to(self, next: ThreadState) -> bool {
        if self == next || next == ThreadState::Core {
            return true;
        }
        matches!(
            (self, next),
            (ThreadState::Active, ThreadState::Idle) | (ThreadState::Idle, ThreadState::Archived)
        )
    }

    /// Share of a thread's messages the next compaction aims to fold away.
    /// Informational; persisted with the topic record.
    pub fn default_target_compaction_percent(self) -> u8 {
        match self {
            ThreadState::Core | ThreadState::Ephemeral => 0,
            ThreadState::Active => 20,
            ThreadState::Idle => 60,
            ThreadState::Archived => 100,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadState::Core => "core",
            ThreadState::Active => "active",
            ThreadState::Idle => "idle",
            ThreadState::Archived => "archived",
            ThreadState::Ephemeral => "ephemeral",
        }
    }
}

impl Default for ThreadState {
    fn default() -> Self {
        ThreadState::Active
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 2: Compaction
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompactionLevel {
    Light,
    Heavy,
    Archival,
}

impl CompactionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompactionLevel::Light => "light",
            CompactionLevel::Heavy => "heavy",
            CompactionLevel::Archival => "archival",
        }
    }
}

/// Tunables for one compaction level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionLevelParams {
    /// Upper bound on the generated summary, passed to the summarizer.
    pub max_summary_tokens: usize,
    /// Newest messages kept verbatim in the thread.
    pub preserve_latest_messages: usize,
}

impl CompactionLevelParams {
    pub const LIGHT: Self = Self {
        max_summary_tokens: 1000,
        preserve_latest_messages: 50,
    };
    pub const HEAVY: Self = Self {
        max_summary_tokens: 500,
        preserve_latest_messages: 20,
    };
    pub const ARCHIVAL: Self = Self {
        max_summary_tokens: 300,
        preserve_latest_messages: 0,
    };
}

/// One summarizing pass over the oldest run of a thread. A topic accumulates
/// several, each at a deeper boundary; older records stay valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionRecord {
    pub messages_compacted: usize,
    pub tokens_compacted: usize,
    /// Id of the last (newest) message folded into this summary.
    pub boundary_message_id: String,
    pub summary: String,
    #[serde(default = "default_level")]
    pub level: CompactionLevel,
    #[serde(default = "Utc::now")]
    pub compacted_at: DateTime<Utc>,
}

fn default_level() -> CompactionLevel {
    CompactionLevel::Light
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 3: Message metadata
// ═══════════════════════════════════════════════════════════════════════════

/// Topic assignment for one existing message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub message_id: String,
    /// A message may belong to several topics.
    pub topics: Vec<String>,
    #[serde(default)]
    pub summary: String,
    pub last_update: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 4: Persisted snapshot
// ═══════════════════════════════════════════════════════════════════════════

/// Persisted view of one topic thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicRecord {
    #[serde(rename = "type")]
    pub kind: ThreadState,
    #[serde(default)]
    pub description: String,
    pub last_update: DateTime<Utc>,
    pub target_compaction_percent: u8,
    #[serde(default)]
    pub related: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedMessageRecord {
    pub topics: Vec<String>,
    #[serde(default)]
    pub summary: String,
    pub last_update: DateTime<Utc>,
}

/// Resumable metamemory state. `restore_state(get_state())` must reproduce an
/// equal snapshot, so every map is ordered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetamemorySnapshot {
    #[serde(default)]
    pub topics: BTreeMap<String, TopicRecord>,
    #[serde(default)]
    pub tagged_messages: BTreeMap<String, TaggedMessageRecord>,
    #[serde(default)]
    pub compactions: BTreeMap<String, Vec<CompactionRecord>>,
    #[serde(default)]
    pub last_processed_index: usize,
}

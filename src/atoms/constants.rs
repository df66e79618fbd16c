// ── Paw Atoms: Constants ───────────────────────────────────────────────────
// All named constants for the crate live here.

// ── Orchestrator-owned tools ───────────────────────────────────────────────
// Always merged into the tool set of every task turn. Caller tools may not
// reuse these names.
pub const TASK_COMPLETE_TOOL: &str = "task_complete";
pub const TASK_FATAL_ERROR_TOOL: &str = "task_fatal_error";

// ── Meta-cognition tools ───────────────────────────────────────────────────
// Only offered to the reflective turn.
pub const ADJUST_MODEL_SCORE_TOOL: &str = "adjust_model_score";
pub const SET_MODEL_ENABLED_TOOL: &str = "set_model_enabled";
pub const SET_THOUGHT_DELAY_TOOL: &str = "set_thought_delay";

// ── Agent descriptor names ─────────────────────────────────────────────────
// Identify the purpose of a model-service call.
pub const AGENT_TASK: &str = "task";
pub const AGENT_META: &str = "meta-cognition";
pub const AGENT_TAGGER: &str = "tagger";
pub const AGENT_SUMMARIZER: &str = "summarizer";

// ── Enumerated configuration values ────────────────────────────────────────
pub const META_FREQUENCIES: &[u32] = &[1, 2, 3, 5, 10, 15, 20];
pub const THOUGHT_DELAYS_SECS: &[u64] = &[0, 1, 2, 3, 5, 10, 30, 60];

// ── Model scoring ──────────────────────────────────────────────────────────
pub const MIN_MODEL_SCORE: u8 = 0;
pub const MAX_MODEL_SCORE: u8 = 100;
/// Score assumed for a model missing from the score table. Mid-range so
/// unscored models stay explorable.
pub const DEFAULT_MODEL_SCORE: u8 = 50;
/// Class name used when a task names no model.
pub const DEFAULT_MODEL_CLASS: &str = "default";

// ── Metamemory ─────────────────────────────────────────────────────────────
/// Reserved topic meaning "do not file under any persisted topic".
pub const EPHEMERAL_TOPIC: &str = "ephemeral";
/// Separator between appended compaction summaries.
pub const SUMMARY_SEPARATOR: &str = "\n\n";
/// How many recent messages are shown to the reflective turn.
pub const META_HISTORY_WINDOW: usize = 12;
/// Max characters of recent-message text used as the archived-search query.
pub const ARCHIVED_QUERY_MAX_CHARS: usize = 2000;
/// Upper bound on the active→idle and idle→archived thresholds (ten years).
pub const MAX_INACTIVITY_MINUTES: i64 = 10 * 365 * 24 * 60;
/// Upper bound on the minimum interval between compaction cycles (one year).
pub const MAX_COMPACTION_INTERVAL_SECS: i64 = 365 * 24 * 60 * 60;
/// Dimensionality of the default hash embedder.
pub const HASH_EMBEDDING_DIMS: usize = 256;

/// Literal content of a synthetic message standing in for a compacted run.
/// Downstream consumers detect compacted segments by this exact prefix.
pub fn compacted_summary_content(topic: &str, summary: &str) -> String {
    format!("[Compacted summary for topic \"{}\"]: {}", topic, summary)
}

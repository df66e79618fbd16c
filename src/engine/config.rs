// Paw Taskmind — Configuration
// Serde-backed configuration for the orchestrator, the metamemory engine and
// the model catalog. Every section defaults field-by-field so partial TOML or
// JSON files load cleanly.

use crate::atoms::constants::{
    DEFAULT_MODEL_CLASS, MAX_COMPACTION_INTERVAL_SECS, MAX_INACTIVITY_MINUTES, MAX_MODEL_SCORE,
    META_FREQUENCIES, THOUGHT_DELAYS_SECS,
};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::memory_types::{CompactionLevel, CompactionLevelParams};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

// ── Top level ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskmindConfig {
    pub orchestrator: OrchestratorConfig,
    pub metamemory: MetamemoryConfig,
    pub models: ModelCatalog,
}

impl TaskmindConfig {
    /// Parse a TOML document. Does not validate.
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Parse a JSON document. Does not validate.
    pub fn from_json_str(text: &str) -> EngineResult<Self> {
        serde_json::from_str(text).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Load and validate a config file. `.json` files are read as JSON,
    /// anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text)?,
            _ => Self::from_toml_str(&text)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.orchestrator.validate()?;
        self.metamemory.validate()?;
        self.models.validate()
    }
}

// ── Orchestrator ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Run a reflective turn every N turns. One of `META_FREQUENCIES`.
    pub meta_frequency: u32,
    /// Pacing delay before each model call. One of `THOUGHT_DELAYS_SECS`.
    pub thought_delay_secs: u64,
    /// When false the loop stops after one iteration regardless of outcome.
    pub repeat: bool,
    /// Hard cap on turns; the run ends `incomplete` when reached.
    pub max_turns: u32,
    /// Model id or class used when a task names none.
    pub default_model: String,
    /// Model id or class for the reflective turn. Falls back to the task's.
    pub meta_model: Option<String>,
    /// Initial score table (0–100).
    pub model_scores: BTreeMap<String, u8>,
    pub disabled_models: BTreeSet<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            meta_frequency: 5,
            thought_delay_secs: 0,
            repeat: true,
            max_turns: 50,
            default_model: DEFAULT_MODEL_CLASS.to_string(),
            meta_model: None,
            model_scores: BTreeMap::new(),
            disabled_models: BTreeSet::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if !META_FREQUENCIES.contains(&self.meta_frequency) {
            return Err(EngineError::Config(format!(
                "meta_frequency {} is not one of {:?}",
                self.meta_frequency, META_FREQUENCIES
            )));
        }
        if !THOUGHT_DELAYS_SECS.contains(&self.thought_delay_secs) {
            return Err(EngineError::Config(format!(
                "thought_delay_secs {} is not one of {:?}",
                self.thought_delay_secs, THOUGHT_DELAYS_SECS
            )));
        }
        if self.max_turns == 0 {
            return Err(EngineError::Config("max_turns must be at least 1".into()));
        }
        if self.default_model.trim().is_empty() {
            return Err(EngineError::Config("default_model must not be empty".into()));
        }
        if let Some((model, score)) = self
            .model_scores
            .iter()
            .find(|(_, s)| **s > MAX_MODEL_SCORE)
        {
            return Err(EngineError::Config(format!(
                "score {} for model '{}' exceeds {}",
                score, model, MAX_MODEL_SCORE
            )));
        }
        Ok(())
    }
}

// ── Metamemory ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetamemoryConfig {
    /// Max messages handed to the tagger in one call.
    pub sliding_window_size: usize,
    /// Min queued messages before a pass starts tagging.
    pub processing_threshold: usize,
    pub max_tokens_per_active_thread: usize,
    pub max_tokens_per_idle_thread: usize,
    pub active_to_idle_minutes: i64,
    pub idle_to_archived_minutes: i64,
    /// Min wall-clock gap between compaction cycles.
    pub min_compaction_interval_secs: i64,
    pub light: CompactionLevelParams,
    pub heavy: CompactionLevelParams,
    pub archival: CompactionLevelParams,
    /// Model id or class for tagging calls.
    pub tagger_model: String,
    /// Model id or class for summarization calls.
    pub summarizer_model: String,
    /// Archived hits pulled into assembled context.
    pub archived_search_top_k: usize,
}

impl Default for MetamemoryConfig {
    fn default() -> Self {
        MetamemoryConfig {
            sliding_window_size: 20,
            processing_threshold: 4,
            max_tokens_per_active_thread: 4000,
            max_tokens_per_idle_thread: 2000,
            active_to_idle_minutes: 60,
            idle_to_archived_minutes: 24 * 60,
            min_compaction_interval_secs: 300,
            light: CompactionLevelParams::LIGHT,
            heavy: CompactionLevelParams::HEAVY,
            archival: CompactionLevelParams::ARCHIVAL,
            tagger_model: DEFAULT_MODEL_CLASS.to_string(),
            summarizer_model: DEFAULT_MODEL_CLASS.to_string(),
            archived_search_top_k: 3,
        }
    }
}

impl MetamemoryConfig {
    pub fn level(&self, level: CompactionLevel) -> CompactionLevelParams {
        match level {
            CompactionLevel::Light => self.light,
            CompactionLevel::Heavy => self.heavy,
            CompactionLevel::Archival => self.archival,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.sliding_window_size == 0 {
            return Err(EngineError::Config(
                "sliding_window_size must be at least 1".into(),
            ));
        }
        if self.processing_threshold == 0 {
            return Err(EngineError::Config(
                "processing_threshold must be at least 1".into(),
            ));
        }
        if self.active_to_idle_minutes < 0
            || self.idle_to_archived_minutes < 0
            || self.min_compaction_interval_secs < 0
        {
            return Err(EngineError::Config(
                "inactivity thresholds and compaction interval must be non-negative".into(),
            ));
        }
        if self.active_to_idle_minutes > MAX_INACTIVITY_MINUTES
            || self.idle_to_archived_minutes > MAX_INACTIVITY_MINUTES
        {
            return Err(EngineError::Config(format!(
                "inactivity thresholds must be at most {} minutes",
                MAX_INACTIVITY_MINUTES
            )));
        }
        if self.min_compaction_interval_secs > MAX_COMPACTION_INTERVAL_SECS {
            return Err(EngineError::Config(format!(
                "min_compaction_interval_secs must be at most {}",
                MAX_COMPACTION_INTERVAL_SECS
            )));
        }
        if self.archival.preserve_latest_messages != 0 {
            return Err(EngineError::Config(
                "archival compaction must preserve 0 messages".into(),
            ));
        }
        if self.tagger_model.trim().is_empty() || self.summarizer_model.trim().is_empty() {
            return Err(EngineError::Config(
                "tagger_model and summarizer_model must not be empty".into(),
            ));
        }
        Ok(())
    }
}

// ── Model catalog ──────────────────────────────────────────────────────

/// Named model classes. A request that names a class resolves to its
/// candidates; anything else is taken as a concrete model id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCatalog {
    pub classes: BTreeMap<String, Vec<String>>,
}

impl ModelCatalog {
    pub fn with_class(mut self, class: impl Into<String>, models: &[&str]) -> Self {
        self.classes
            .insert(class.into(), models.iter().map(|m| m.to_string()).collect());
        self
    }

    /// Candidate model ids for a request, in catalog order.
    pub fn candidates(&self, request: &str) -> Vec<String> {
        match self.classes.get(request) {
            Some(models) => models.clone(),
            None => vec![request.to_string()],
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if let Some((class, _)) = self.classes.iter().find(|(_, m)| m.is_empty()) {
            return Err(EngineError::Config(format!(
                "model class '{}' has no models",
                class
            )));
        }
        Ok(())
    }
}

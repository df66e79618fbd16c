// engine/state.rs — Per-run orchestration state and pacing.
// One `OrchestrationState` is built at the start of each run from the run's
// options and passed explicitly to the scorer, the meta-cognition trigger
// and the turn loop. Nothing here is global.

use crate::atoms::constants::{DEFAULT_MODEL_SCORE, MAX_MODEL_SCORE};
use crate::engine::config::OrchestratorConfig;
use crate::engine::pricing::estimate_cost_usd;
use crate::engine::types::TokenUsage;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Accumulated token spend for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_create_tokens: u64,
    pub cost_usd: f64,
}

impl RunUsage {
    /// Record one call. A reported cost wins over the price-table estimate.
    pub fn record(&mut self, model: &str, usage: &TokenUsage, reported_cost: Option<f64>) -> f64 {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.cache_read_tokens += usage.cache_read_tokens;
        self.cache_create_tokens += usage.cache_create_tokens;
        let cost = reported_cost.unwrap_or_else(|| estimate_cost_usd(model, usage));
        self.cost_usd += cost;
        cost
    }
}

#[derive(Debug, Clone)]
pub struct OrchestrationState {
    /// Turns started so far. Incremented at the top of each iteration.
    pub turn: u32,
    pub meta_frequency: u32,
    pub thought_delay_secs: u64,
    pub disabled_models: HashSet<String>,
    /// model id → score in 0..=100.
    pub model_scores: HashMap<String, u8>,
    pub last_model: Option<String>,
    /// Reflective turns run so far.
    pub meta_runs: u32,
    pub usage: RunUsage,
}

impl OrchestrationState {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        OrchestrationState {
            turn: 0,
            meta_frequency: config.meta_frequency,
            thought_delay_secs: config.thought_delay_secs,
            disabled_models: config.disabled_models.iter().cloned().collect(),
            model_scores: config
                .model_scores
                .iter()
                .map(|(m, s)| (m.clone(), (*s).min(MAX_MODEL_SCORE)))
                .collect(),
            last_model: None,
            meta_runs: 0,
            usage: RunUsage::default(),
        }
    }

    /// Score used for selection; unscored models sit mid-range.
    pub fn score_of(&self, model: &str) -> u8 {
        self.model_scores
            .get(model)
            .copied()
            .unwrap_or(DEFAULT_MODEL_SCORE)
    }

    pub fn set_score(&mut self, model: &str, score: i64) -> u8 {
        let clamped = score.clamp(0, MAX_MODEL_SCORE as i64) as u8;
        self.model_scores.insert(model.to_string(), clamped);
        clamped
    }

    pub fn set_enabled(&mut self, model: &str, enabled: bool) {
        if enabled {
            self.disabled_models.remove(model);
        } else {
            self.disabled_models.insert(model.to_string());
        }
    }

    pub fn is_disabled(&self, model: &str) -> bool {
        self.disabled_models.contains(model)
    }

    /// Whether the turn just started is a reflective checkpoint.
    pub fn meta_due(&self) -> bool {
        self.meta_frequency > 0 && self.turn > 0 && self.turn % self.meta_frequency == 0
    }
}

/// Sleep for the pacing delay unless cancelled first.
/// Returns `false` when the token fired during (or before) the wait.
pub async fn pace(delay_secs: u64, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    if delay_secs == 0 {
        return true;
    }
    debug!("[orchestrator] Pacing {}s before next call", delay_secs);
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(delay_secs)) => true,
        _ = cancel.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn state() -> OrchestrationState {
        let mut cfg = OrchestratorConfig::default();
        cfg.model_scores.insert("a".into(), 80);
        OrchestrationState::from_config(&cfg)
    }

    #[test]
    fn scores_clamp_to_range() {
        let mut s = state();
        assert_eq!(s.set_score("a", 140), 100);
        assert_eq!(s.set_score("a", -5), 0);
        assert_eq!(s.score_of("unknown"), DEFAULT_MODEL_SCORE);
    }

    #[test]
    fn meta_due_on_multiples_only() {
        let mut s = state();
        let due: Vec<u32> = (1..=12)
            .filter(|t| {
                s.turn = *t;
                s.meta_due()
            })
            .collect();
        assert_eq!(due, vec![5, 10]);
    }

    #[test]
    fn reported_cost_wins_over_estimate() {
        let mut usage = RunUsage::default();
        let u = TokenUsage {
            input_tokens: 1_000_000,
            ..Default::default()
        };
        assert_eq!(usage.record("gpt-4o", &u, Some(0.01)), 0.01);
        let estimated = usage.record("gpt-4o", &u, None);
        assert!((estimated - 2.5).abs() < 1e-9);
        assert_eq!(usage.input_tokens, 2_000_000);
    }

    #[tokio::test]
    async fn cancel_interrupts_pacing() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let started = Instant::now();
        assert!(!pace(60, &cancel).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn zero_delay_returns_immediately() {
        assert!(pace(0, &CancellationToken::new()).await);
    }
}

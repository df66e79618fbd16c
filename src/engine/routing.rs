// Paw Taskmind — Model Routing
// Resolves a model request (class or concrete id) to one concrete model,
// weighted by the run's score table. Disabled and excluded models never win.

use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::config::ModelCatalog;
use crate::engine::state::OrchestrationState;
use log::debug;
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::Rng;

// ── Types ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSelection {
    pub model: String,
    pub score: u8,
    /// Candidates that were eligible for this draw.
    pub eligible: Vec<String>,
}

// ── Selection ──────────────────────────────────────────────────────────────

/// Candidates for `request` after removing disabled and excluded ids.
pub fn eligible_models(
    catalog: &ModelCatalog,
    request: &str,
    state: &OrchestrationState,
    exclude: &[String],
) -> Vec<String> {
    let mut eligible: Vec<String> = Vec::new();
    for model in catalog.candidates(request) {
        if state.is_disabled(&model) || exclude.contains(&model) || eligible.contains(&model) {
            continue;
        }
        eligible.push(model);
    }
    eligible
}

/// Pick one model, probability proportional to score.
/// A zero score still carries weight 1 so a demoted model is rare, not dead;
/// disabling is the way to remove a model from rotation.
pub fn select_model<R: Rng + ?Sized>(
    catalog: &ModelCatalog,
    request: &str,
    state: &OrchestrationState,
    exclude: &[String],
    rng: &mut R,
) -> EngineResult<ModelSelection> {
    let eligible = eligible_models(catalog, request, state, exclude);
    if eligible.is_empty() {
        return Err(EngineError::NoModelAvailable(format!(
            "every candidate for '{}' is disabled or excluded",
            request
        )));
    }

    let weights: Vec<u32> = eligible
        .iter()
        .map(|m| u32::from(state.score_of(m)).max(1))
        .collect();
    let dist = WeightedIndex::new(&weights)
        .map_err(|e| EngineError::Other(format!("model weights: {}", e)))?;
    let idx = dist.sample(rng);
    let model = eligible[idx].clone();
    let score = state.score_of(&model);

    debug!(
        "[routing] Selected {} (score {}) from {} candidate(s) for '{}'",
        model,
        score,
        eligible.len(),
        request
    );
    Ok(ModelSelection {
        model,
        score,
        eligible,
    })
}

// ── Tests ──────────────────────────────────────────────────────────────────

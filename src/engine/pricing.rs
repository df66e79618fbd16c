// Paw Taskmind — Model pricing
// Per-million-token prices used to estimate cost when the model service
// reports usage but no cost. ModelPrice struct lives in crate::atoms::types.

use crate::atoms::types::*;

pub fn model_price(model: &str) -> ModelPrice {
    // Normalize: strip provider prefixes like "anthropic/"
    let m = model.split('/').next_back().unwrap_or(model);
    match m {
        // Anthropic
        s if s.starts_with("claude-3-haiku") => ModelPrice { input: 0.25, output: 1.25 },
        s if s.starts_with("claude-haiku-4") => ModelPrice { input: 1.00, output: 5.00 },
        s if s.starts_with("claude-sonnet-4") || s.starts_with("claude-3-5-sonnet") =>
            ModelPrice { input: 3.00, output: 15.00 },
        s if s.starts_with("claude-opus-4") || s.starts_with("claude-3-opus") =>
            ModelPrice { input: 15.00, output: 75.00 },
        // Google
        s if s.starts_with("gemini-2.5-flash-lite") =>
            ModelPrice { input: 0.05, output: 0.20 },
        s if s.starts_with("gemini-2.0-flash") || s.starts_with("gemini-2.5-flash") =>
            ModelPrice { input: 0.15, output: 0.60 },
        s if s.starts_with("gemini-2.5-pro") || s.starts_with("gemini-1.5-pro") =>
            ModelPrice { input: 1.25, output: 10.00 },
        // OpenAI
        s if s.starts_with("gpt-4o-mini") || s.starts_with("gpt-4.1-mini") || s.starts_with("gpt-4.1-nano") =>
            ModelPrice { input: 0.15, output: 0.60 },
        s if s.starts_with("gpt-4o") || s.starts_with("gpt-4.1") =>
            ModelPrice { input: 2.50, output: 10.00 },
        s if s.starts_with("o4-mini") || s.starts_with("o3-mini") =>
            ModelPrice { input: 1.10, output: 4.40 },
        s if s.starts_with("o3") || s.starts_with("o1") =>
            ModelPrice { input: 10.00, output: 40.00 },
        // DeepSeek
        s if s.starts_with("deepseek-chat") || s.starts_with("deepseek-v3") =>
            ModelPrice { input: 0.27, output: 1.10 },
        s if s.starts_with("deepseek-reasoner") || s.starts_with("deepseek-r1") =>
            ModelPrice { input: 0.55, output: 2.19 },
        // Fallback: assume cheap model
        _ => ModelPrice { input: 0.50, output: 2.00 },
    }
}

/// Estimate USD cost for one call's usage.
/// Cache reads are charged at 10% of input, cache creation at 25%.
pub fn estimate_cost_usd(model: &str, usage: &TokenUsage) -> f64 {
    let p = model_price(model);
    let cached = usage.cache_read_tokens + usage.cache_create_tokens;
    let regular_input = usage.input_tokens.saturating_sub(cached);
    let input_cost = (regular_input as f64 * p.input / 1_000_000.0)
        + (usage.cache_read_tokens as f64 * p.input * 0.10 / 1_000_000.0)
        + (usage.cache_create_tokens as f64 * p.input * 0.25 / 1_000_000.0);
    let output_cost = usage.output_tokens as f64 * p.output / 1_000_000.0;
    input_cost + output_cost
}

// ── Paw Atoms: Error Types ─────────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, Config, Provider, Memory…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • Validation failures are raised before any model-service call and are
//     never retried; everything after the first call is folded into a
//     `TaskResult` by the orchestrator instead of escaping as an error.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration is invalid or could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed agent, task or options. Raised before any service call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Language-model service call failed or its stream ended abnormally.
    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Tagging / summarization / thread bookkeeping failure.
    #[error("Memory error: {0}")]
    Memory(String),

    /// Every candidate model is disabled or excluded.
    #[error("No model available: {0}")]
    NoModelAvailable(String),

    /// A metamemory pass is in flight and the operation needs exclusive access.
    #[error("Busy: {0}")]
    Busy(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Create a provider error with name and message.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(e: toml::de::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}

// ── Migration bridge: String → EngineError ─────────────────────────────────

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations should return this type.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<EngineError> for String {
    fn from(e: EngineError) -> Self {
        e.to_string()
    }
}

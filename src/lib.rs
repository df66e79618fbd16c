// Paw Taskmind
//
// Runs one task as repeated turns against a language-model service and
// keeps its growing history bounded with topic-threaded memory.
//
//   atoms/   — pure types, constants, error enum
//   engine/  — orchestrator, routing, meta-cognition, metamemory, providers

pub mod atoms;
pub mod engine;

pub use atoms::error::{EngineError, EngineResult};
pub use engine::config::{MetamemoryConfig, ModelCatalog, OrchestratorConfig, TaskmindConfig};
pub use engine::metamemory::{ContextOptions, MetamemoryEngine};
pub use engine::orchestrator::TaskOrchestrator;
pub use engine::providers::{ModelService, ScriptedService, StreamEvent};
pub use engine::types::{Message, MessageRef, Role, TaskRequest, TaskResult, TaskStatus};

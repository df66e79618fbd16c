// ── Metamemory ──────────────────────────────────────────────────────────────
//
// Conversational memory for long-running tasks: topic tagging, a five-state
// thread lifecycle, budget-driven summarising compaction, bounded context
// reassembly and similarity search over archived topics.
//
// Module layout:
//   tokenizer.rs       — deterministic token estimates
//   thread_store.rs    — per-topic threads (no locks; single writer)
//   tagger.rs          — model-backed topic tagging + topic normalisation
//   compactor.rs       — lifecycle transitions + summarising compaction
//   vector_index.rs    — archived-summary similarity index, pluggable embedder
//   context_builder.rs — priority-ordered, budget-bounded context assembly
//   snapshot.rs        — JSON snapshot files
//   engine.rs          — MetamemoryEngine: queue, pass guard, persistence

pub mod compactor;
pub mod context_builder;
pub mod engine;
pub mod snapshot;
pub mod tagger;
pub mod thread_store;
pub mod tokenizer;
pub mod vector_index;

pub use compactor::{Compactor, CycleReport, LlmSummarizer, Summarizer};
pub use context_builder::{AssembledContext, ContextOptions, ContextSource};
pub use engine::{MetamemoryEngine, PassOutcome, PassReport};
pub use tagger::{normalize_topic, LlmTagger, Tagger};
pub use thread_store::{ThreadStore, TopicThread};
pub use tokenizer::Tokenizer;
pub use vector_index::{Embedder, HashEmbedder, SearchHit, VectorIndex};

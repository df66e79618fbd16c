// Paw Taskmind — Engine
// Turn orchestration (model rotation, scheduled meta-cognition, tool-driven
// halting) and the metamemory engine it feeds.

pub mod config;
pub mod meta_cognition;
pub mod metamemory;
pub mod orchestrator;
pub mod pricing;
pub mod providers;
pub mod routing;
pub mod state;
pub mod types;

// Paw Taskmind — Task Orchestrator
//
// Drives one task as repeated turns against a `ModelService`:
//
//   Idle → Running → { Completed | FatalError }   (or Incomplete when the
//   run is cancelled, hits `max_turns`, or is non-repeating)
//
// Each iteration: bump the turn counter, run meta-cognition when due, pace,
// pick a model, run the turn, hand the new messages to metamemory. Errors
// after validation never escape `run`; they become a `fatal_error` result.
//
// Module layout:
//   tools.rs      — task_complete / task_fatal_error definitions, tool merge
//   handlers.rs   — decide_tool_call (pure ToolDecision logic)
//   agent_loop.rs — run_turn: drain one service stream into history

mod agent_loop;
mod handlers;
pub mod tools;

pub use handlers::decide_tool_call;

use crate::atoms::constants::AGENT_TASK;
use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::config::{OrchestratorConfig, TaskmindConfig};
use crate::engine::meta_cognition::run_meta_cognition;
use crate::engine::metamemory::{ContextOptions, MetamemoryEngine, PassOutcome};
use crate::engine::providers::ModelService;
use crate::engine::routing::select_model;
use crate::engine::state::{pace, OrchestrationState};
use crate::engine::types::*;
use agent_loop::run_turn;
use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tools::merge_tools;

pub struct TaskOrchestrator {
    service: Arc<dyn ModelService>,
    config: TaskmindConfig,
    metamemory: Option<Arc<MetamemoryEngine>>,
    context_options: ContextOptions,
}

/// How the loop ended, before it is folded into a `TaskResult`.
enum RunEnd {
    Halted(HaltOutcome),
    Failed(String),
    Stopped { reason: String },
}

impl TaskOrchestrator {
    pub fn new(service: Arc<dyn ModelService>, config: TaskmindConfig) -> Self {
        let context_options = ContextOptions {
            archived_top_k: config.metamemory.archived_search_top_k,
            ..Default::default()
        };
        TaskOrchestrator {
            service,
            config,
            metamemory: None,
            context_options,
        }
    }

    /// Route history through a metamemory engine: new messages are tagged
    /// after every turn and each turn's context is assembled from it.
    pub fn with_metamemory(mut self, engine: Arc<MetamemoryEngine>) -> Self {
        self.metamemory = Some(engine);
        self
    }

    pub fn with_context_options(mut self, options: ContextOptions) -> Self {
        self.context_options = options;
        self
    }

    pub fn config(&self) -> &TaskmindConfig {
        &self.config
    }

    pub fn metamemory(&self) -> Option<&Arc<MetamemoryEngine>> {
        self.metamemory.as_ref()
    }

    pub async fn run(
        &self,
        request: TaskRequest,
        cancel: CancellationToken,
    ) -> EngineResult<TaskResult> {
        let mut rng = StdRng::from_entropy();
        self.run_with_rng(request, cancel, &mut rng).await
    }

    /// `run` with an injected random source for model selection.
    pub async fn run_with_rng<R: Rng + Send + ?Sized>(
        &self,
        request: TaskRequest,
        cancel: CancellationToken,
        rng: &mut R,
    ) -> EngineResult<TaskResult> {
        let options = self.validate(&request)?;
        let tools = merge_tools(&request.tools)?;
        let known_tools: HashSet<String> =
            request.tools.iter().map(|t| t.name().to_string()).collect();
        let model_request = request
            .model
            .clone()
            .unwrap_or_else(|| options.default_model.clone());
        let meta_request = options
            .meta_model
            .clone()
            .unwrap_or_else(|| model_request.clone());

        let started = Instant::now();
        let mut state = OrchestrationState::from_config(&options);
        let mut history: Vec<MessageRef> = vec![
            Arc::new(Message::system(request.system_prompt.clone())),
            Arc::new(Message::user(request.input.clone())),
        ];
        let mut handed_off = 0usize;
        let mut memory_tasks: Vec<JoinHandle<PassOutcome>> = Vec::new();
        let mut last_text: Option<String> = None;

        info!(
            "[orchestrator] Starting task: model='{}' tools={} meta_every={} repeat={}",
            model_request,
            tools.len(),
            options.meta_frequency,
            options.repeat
        );

        let end = loop {
            if cancel.is_cancelled() {
                break RunEnd::Stopped {
                    reason: "cancelled".into(),
                };
            }
            if state.turn >= options.max_turns {
                warn!("[orchestrator] Max turns ({}) reached", options.max_turns);
                break RunEnd::Stopped {
                    reason: format!("max turns ({}) reached", options.max_turns),
                };
            }

            state.turn += 1;
            info!("[orchestrator] Turn {}/{}", state.turn, options.max_turns);

            if state.meta_due() {
                let report = run_meta_cognition(
                    self.service.as_ref(),
                    &self.config.models,
                    &meta_request,
                    &mut state,
                    &history,
                    rng,
                )
                .await;
                info!(
                    "[orchestrator] Meta-cognition at turn {}: {} adjustment(s), {} ignored",
                    report.turn,
                    report.adjustments.len(),
                    report.ignored.len()
                );
            }

            if !pace(state.thought_delay_secs, &cancel).await {
                break RunEnd::Stopped {
                    reason: "cancelled".into(),
                };
            }

            let selection =
                match select_model(&self.config.models, &model_request, &state, &[], rng) {
                    Ok(s) => s,
                    Err(e) => break RunEnd::Failed(e.to_string()),
                };

            let agent = AgentDescriptor::new(AGENT_TASK, selection.model.clone())
                .with_tools(tools.clone())
                .with_instructions(request.system_prompt.clone())
                .with_settings(request.settings.clone());
            let messages = self.turn_messages(&history);

            let outcome = match run_turn(
                self.service.as_ref(),
                &messages,
                &agent,
                &known_tools,
                &mut history,
                &mut state.usage,
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(e) => break RunEnd::Failed(e.to_string()),
            };
            state.last_model = Some(outcome.model.clone().unwrap_or(selection.model));
            if outcome.last_text.is_some() {
                last_text = outcome.last_text.clone();
            }

            if let Some(engine) = &self.metamemory {
                let fresh: Vec<MessageRef> = history[handed_off..].to_vec();
                handed_off = history.len();
                let engine = engine.clone();
                memory_tasks.push(tokio::spawn(async move {
                    engine.process_messages(&fresh).await
                }));
            }

            if let Some(halt) = outcome.halt {
                break RunEnd::Halted(halt);
            }
            if let Some(message) = outcome.error {
                break RunEnd::Failed(message);
            }
            if !options.repeat {
                break RunEnd::Stopped {
                    reason: "single turn run".into(),
                };
            }
        };

        self.settle_memory(memory_tasks).await;

        let (status, result, error) = match end {
            RunEnd::Halted(HaltOutcome::Complete { result }) => {
                (TaskStatus::Complete, Some(result), None)
            }
            RunEnd::Halted(HaltOutcome::Fatal { error }) => {
                (TaskStatus::FatalError, None, Some(error))
            }
            RunEnd::Failed(message) => {
                error!("[orchestrator] Turn {} failed: {}", state.turn, message);
                (TaskStatus::FatalError, None, Some(message))
            }
            RunEnd::Stopped { reason } => (TaskStatus::Incomplete, last_text, Some(reason)),
        };

        let result = TaskResult {
            status,
            result,
            error,
            history,
            elapsed_secs: started.elapsed().as_secs_f64(),
            cost_usd: state.usage.cost_usd,
            turns: state.turn,
        };
        info!(
            "[orchestrator] Task {} after {} turn(s), {} meta run(s), ${:.4}",
            result.status.as_str(),
            result.turns,
            state.meta_runs,
            result.cost_usd
        );
        Ok(result)
    }

    /// Everything wrong with the request, reported before any service call.
    fn validate(&self, request: &TaskRequest) -> EngineResult<OrchestratorConfig> {
        let options = request
            .options
            .clone()
            .unwrap_or_else(|| self.config.orchestrator.clone());
        options
            .validate()
            .map_err(|e| EngineError::Validation(e.to_string()))?;
        self.config
            .models
            .validate()
            .map_err(|e| EngineError::Validation(e.to_string()))?;
        if request.input.trim().is_empty() {
            return Err(EngineError::Validation("task input is empty".into()));
        }
        if let Some(model) = &request.model {
            if model.trim().is_empty() {
                return Err(EngineError::Validation("model must not be empty".into()));
            }
        }
        Ok(options)
    }

    /// History to send this turn. With metamemory the system prompt leads
    /// and the rest is the assembled, budget-bounded context.
    fn turn_messages(&self, history: &[MessageRef]) -> Vec<Message> {
        let Some(engine) = &self.metamemory else {
            return history.iter().map(|m| (**m).clone()).collect();
        };
        let Some(seed) = history.first() else {
            return Vec::new();
        };
        let context = engine.build_context(history, &self.context_options);
        let mut messages = vec![(**seed).clone()];
        messages.extend(
            context
                .items
                .iter()
                .filter(|item| item.message.id != seed.id)
                .map(|item| (*item.message).clone()),
        );
        messages
    }

    /// Wait for every spawned pass, then give queued leftovers one more pass.
    async fn settle_memory(&self, tasks: Vec<JoinHandle<PassOutcome>>) {
        let Some(engine) = &self.metamemory else {
            return;
        };
        for task in tasks {
            if let Err(e) = task.await {
                warn!("[orchestrator] Metamemory pass panicked: {}", e);
            }
        }
        if engine.queued_len() > 0 {
            engine.process_messages(&[]).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::constants::{AGENT_META, TASK_COMPLETE_TOOL, TASK_FATAL_ERROR_TOOL};
    use crate::engine::providers::{ScriptedService, ScriptedTurn};
    use serde_json::json;

    fn orchestrator(service: Arc<ScriptedService>, options: OrchestratorConfig) -> TaskOrchestrator {
        let config = TaskmindConfig {
            orchestrator: options,
            ..Default::default()
        };
        TaskOrchestrator::new(service, config)
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[tokio::test]
    async fn completes_on_task_complete() {
        let service = Arc::new(ScriptedService::new());
        service.push_turn(AGENT_TASK, ScriptedTurn::text("thinking"));
        service.push_turn(
            AGENT_TASK,
            ScriptedTurn::tool_call(TASK_COMPLETE_TOOL, json!({"result": "done"})),
        );
        let orch = orchestrator(service.clone(), OrchestratorConfig::default());
        let result = orch
            .run_with_rng(TaskRequest::new("sys", "go"), CancellationToken::new(), &mut rng())
            .await
            .unwrap();
        assert_eq!(result.status, TaskStatus::Complete);
        assert_eq!(result.result.as_deref(), Some("done"));
        assert_eq!(result.turns, 2);
        assert_eq!(service.remaining(AGENT_TASK), 0);
    }

    #[tokio::test]
    async fn fatal_tool_sets_fatal_error() {
        let service = Arc::new(ScriptedService::new());
        service.push_turn(
            AGENT_TASK,
            ScriptedTurn::tool_call(TASK_FATAL_ERROR_TOOL, json!({"error": "no access"})),
        );
        let orch = orchestrator(service, OrchestratorConfig::default());
        let result = orch
            .run_with_rng(TaskRequest::new("sys", "go"), CancellationToken::new(), &mut rng())
            .await
            .unwrap();
        assert_eq!(result.status, TaskStatus::FatalError);
        assert_eq!(result.error.as_deref(), Some("no access"));
    }

    #[tokio::test]
    async fn service_failure_becomes_fatal_error() {
        let service = Arc::new(ScriptedService::new());
        service.push_turn(AGENT_TASK, ScriptedTurn::failing("connection reset"));
        let orch = orchestrator(service, OrchestratorConfig::default());
        let result = orch
            .run_with_rng(TaskRequest::new("sys", "go"), CancellationToken::new(), &mut rng())
            .await
            .unwrap();
        assert_eq!(result.status, TaskStatus::FatalError);
        assert!(result.error.unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn non_repeating_stops_after_one_turn() {
        let service = Arc::new(ScriptedService::new());
        service.set_fallback(AGENT_TASK, ScriptedTurn::text("still going"));
        let options = OrchestratorConfig {
            repeat: false,
            ..Default::default()
        };
        let result = orchestrator(service.clone(), options)
            .run_with_rng(TaskRequest::new("sys", "go"), CancellationToken::new(), &mut rng())
            .await
            .unwrap();
        assert_eq!(result.status, TaskStatus::Incomplete);
        assert_eq!(result.turns, 1);
        assert_eq!(result.result.as_deref(), Some("still going"));
        assert_eq!(service.call_count(AGENT_TASK), 1);
    }

    #[tokio::test]
    async fn max_turns_ends_incomplete() {
        let service = Arc::new(ScriptedService::new());
        service.set_fallback(AGENT_TASK, ScriptedTurn::text("more"));
        service.set_fallback(AGENT_META, ScriptedTurn::text("fine"));
        let options = OrchestratorConfig {
            max_turns: 3,
            ..Default::default()
        };
        let result = orchestrator(service, options)
            .run_with_rng(TaskRequest::new("sys", "go"), CancellationToken::new(), &mut rng())
            .await
            .unwrap();
        assert_eq!(result.status, TaskStatus::Incomplete);
        assert_eq!(result.turns, 3);
    }

    #[tokio::test]
    async fn reserved_tool_name_is_rejected_before_any_call() {
        let service = Arc::new(ScriptedService::new());
        let request = TaskRequest::new("sys", "go").with_tools(vec![ToolDefinition::function(
            TASK_COMPLETE_TOOL,
            "",
            json!({"type": "object"}),
        )]);
        let err = orchestrator(service.clone(), OrchestratorConfig::default())
            .run_with_rng(request, CancellationToken::new(), &mut rng())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_options_are_a_validation_error() {
        let service = Arc::new(ScriptedService::new());
        let request = TaskRequest::new("sys", "go").with_options(OrchestratorConfig {
            meta_frequency: 4,
            ..Default::default()
        });
        let err = orchestrator(service, OrchestratorConfig::default())
            .run_with_rng(request, CancellationToken::new(), &mut rng())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_call() {
        let service = Arc::new(ScriptedService::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = orchestrator(service.clone(), OrchestratorConfig::default())
            .run_with_rng(TaskRequest::new("sys", "go"), cancel, &mut rng())
            .await
            .unwrap();
        assert_eq!(result.status, TaskStatus::Incomplete);
        assert_eq!(result.turns, 0);
        assert!(service.calls().is_empty());
    }
}

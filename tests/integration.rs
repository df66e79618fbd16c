// End-to-end behaviour of the orchestrator and the metamemory engine,
// driven by the scripted model service.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use paw_taskmind::atoms::constants::{AGENT_META, AGENT_TAGGER, AGENT_TASK, TASK_COMPLETE_TOOL};
use paw_taskmind::atoms::memory_types::{CompactionLevel, CompactionLevelParams, ThreadState};
use paw_taskmind::engine::metamemory::{
    Compactor, PassOutcome, Summarizer, ThreadStore, VectorIndex,
};
use paw_taskmind::engine::providers::ScriptedTurn;
use paw_taskmind::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// ── Helpers ────────────────────────────────────────────────────────────

struct CountingSummarizer {
    calls: AtomicUsize,
}

impl CountingSummarizer {
    fn new() -> Arc<Self> {
        Arc::new(CountingSummarizer {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Summarizer for CountingSummarizer {
    async fn summarize(
        &self,
        topic: &str,
        messages: &[MessageRef],
        _max_tokens: usize,
    ) -> EngineResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{} message(s) about {}", messages.len(), topic))
    }
}

fn msg(text: &str) -> MessageRef {
    Arc::new(Message::user(text))
}

fn two_model_config(meta_frequency: u32, max_turns: u32) -> TaskmindConfig {
    let mut config = TaskmindConfig {
        models: ModelCatalog::default().with_class("default", &["model-a", "model-b"]),
        ..Default::default()
    };
    config.orchestrator.meta_frequency = meta_frequency;
    config.orchestrator.max_turns = max_turns;
    config.orchestrator.model_scores.insert("model-a".into(), 80);
    config.orchestrator.model_scores.insert("model-b".into(), 60);
    config
}

async fn run(
    orchestrator: &TaskOrchestrator,
    request: TaskRequest,
    cancel: CancellationToken,
) -> EngineResult<TaskResult> {
    let mut rng = StdRng::seed_from_u64(42);
    orchestrator.run_with_rng(request, cancel, &mut rng).await
}

// ── Compaction scenarios ───────────────────────────────────────────────

#[tokio::test]
async fn budget_overflow_compacts_down_to_preserve_count() {
    let config = MetamemoryConfig {
        max_tokens_per_active_thread: 100,
        light: CompactionLevelParams {
            max_summary_tokens: 1000,
            preserve_latest_messages: 50,
        },
        ..Default::default()
    };
    let summarizer = CountingSummarizer::new();
    let compactor = Compactor::new(config, summarizer.clone());
    let mut store = ThreadStore::new();
    store.create("notes", ThreadState::Active);
    for i in 0..60 {
        store.add_message("notes", msg(&format!("note {}", i))).unwrap();
    }
    let mut index = VectorIndex::default();

    let report = compactor.run_cycle(&mut store, &mut index, Utc::now()).await;

    let thread = store.get("notes").unwrap();
    assert_eq!(thread.messages().len(), 50);
    assert!(!thread.summary().is_empty());
    assert_eq!(thread.messages()[0].content, "note 10");
    assert_eq!(report.compactions.len(), 1);
    assert_eq!(report.compactions[0].level, CompactionLevel::Light);
    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn inactive_active_thread_goes_idle_with_heavy_compaction() {
    let config = MetamemoryConfig {
        active_to_idle_minutes: 60,
        ..Default::default()
    };
    let compactor = Compactor::new(config, CountingSummarizer::new());
    let mut store = ThreadStore::new();
    store.create("deploys", ThreadState::Active);
    for i in 0..25 {
        store
            .add_message("deploys", msg(&format!("deploy step {}", i)))
            .unwrap();
    }
    let now = Utc::now();
    store
        .set_last_active("deploys", now - Duration::minutes(65))
        .unwrap();
    let mut index = VectorIndex::default();

    let report = compactor.run_cycle(&mut store, &mut index, now).await;

    let thread = store.get("deploys").unwrap();
    assert_eq!(thread.state, ThreadState::Idle);
    assert_eq!(thread.messages().len(), 20);
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(report.compactions[0].level, CompactionLevel::Heavy);
    assert_eq!(index.size(), 0);
}

#[test]
fn archived_search_ranks_shared_vocabulary_first() {
    let mut index = VectorIndex::default();
    index.add("database", "database schema design");
    index.add("frontend", "React vs Vue frontend");

    let hits = index.search("database optimization", 2);
    assert_eq!(hits[0].name, "database");
    assert!(hits[0].score >= hits[1].score);
    assert_eq!(index.search("database optimization", 10).len(), 2);
}

// ── Orchestrator scenarios ─────────────────────────────────────────────

#[tokio::test]
async fn meta_cognition_runs_once_per_five_turns() {
    let service = Arc::new(ScriptedService::new());
    for _ in 0..4 {
        service.push_text(AGENT_TASK, "working");
    }
    service.push_turn(
        AGENT_TASK,
        ScriptedTurn::tool_call(TASK_COMPLETE_TOOL, json!({"result": "done"})),
    );
    service.set_fallback(AGENT_META, ScriptedTurn::text("no changes"));

    let orchestrator = TaskOrchestrator::new(service.clone(), two_model_config(5, 50));
    let result = run(&orchestrator, TaskRequest::new("sys", "go"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.turns, 5);
    assert_eq!(result.status, TaskStatus::Complete);
    assert_eq!(service.call_count(AGENT_META), 1);
    for call in service.calls().iter().filter(|c| c.agent.name == AGENT_TASK) {
        assert!(call.agent.model == "model-a" || call.agent.model == "model-b");
    }
}

#[tokio::test]
async fn meta_cognition_count_tracks_run_length() {
    for turns in [1u32, 4, 5, 9, 10, 11] {
        let service = Arc::new(ScriptedService::new());
        service.set_fallback(AGENT_TASK, ScriptedTurn::text("working"));
        service.set_fallback(AGENT_META, ScriptedTurn::text("no changes"));
        let orchestrator = TaskOrchestrator::new(service.clone(), two_model_config(5, turns));
        let result = run(&orchestrator, TaskRequest::new("sys", "go"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.turns, turns);
        assert_eq!(
            service.call_count(AGENT_META),
            (turns / 5) as usize,
            "turns={}",
            turns
        );
    }
}

#[tokio::test]
async fn meta_cognition_adjustments_reach_routing() {
    let service = Arc::new(ScriptedService::new());
    service.push_text(AGENT_TASK, "turn one");
    service.push_turn(
        AGENT_META,
        ScriptedTurn::tool_call(
            "set_model_enabled",
            json!({"model": "model-a", "enabled": false}),
        ),
    );
    service.set_fallback(
        AGENT_TASK,
        ScriptedTurn::tool_call(TASK_COMPLETE_TOOL, json!({"result": "ok"})),
    );

    let orchestrator = TaskOrchestrator::new(service.clone(), two_model_config(2, 10));
    let result = run(&orchestrator, TaskRequest::new("sys", "go"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::Complete);
    let task_calls: Vec<_> = service
        .calls()
        .into_iter()
        .filter(|c| c.agent.name == AGENT_TASK)
        .collect();
    assert_eq!(task_calls.len(), 2);
    assert_eq!(task_calls[1].agent.model, "model-b");
    // system, user, "turn one", task_complete call and its acknowledgement
    assert_eq!(result.history.len(), 5);
}

#[tokio::test]
async fn task_complete_halts_without_further_turns() {
    let service = Arc::new(ScriptedService::new());
    service.push_turn(
        AGENT_TASK,
        ScriptedTurn::tool_call(TASK_COMPLETE_TOOL, json!({"result": "done"}))
            .with_usage(1000, 200),
    );
    service.push_text(AGENT_TASK, "never sent");

    let orchestrator = TaskOrchestrator::new(service.clone(), TaskmindConfig::default());
    let result = run(&orchestrator, TaskRequest::new("sys", "go"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::Complete);
    assert_eq!(result.result.as_deref(), Some("done"));
    assert_eq!(result.turns, 1);
    assert_eq!(service.remaining(AGENT_TASK), 1);
    assert!(result.elapsed_secs >= 0.0);
}

#[tokio::test]
async fn reported_cost_accumulates() {
    let service = Arc::new(ScriptedService::new());
    service.push_turn(AGENT_TASK, ScriptedTurn::text("step").with_cost(0.25));
    service.push_turn(
        AGENT_TASK,
        ScriptedTurn::tool_call(TASK_COMPLETE_TOOL, json!({"result": "done"})).with_cost(0.5),
    );
    let orchestrator = TaskOrchestrator::new(service, TaskmindConfig::default());
    let result = run(&orchestrator, TaskRequest::new("sys", "go"), CancellationToken::new())
        .await
        .unwrap();
    assert!((result.cost_usd - 0.75).abs() < 1e-9);
}

#[tokio::test]
async fn malformed_completion_is_retried_next_turn() {
    let service = Arc::new(ScriptedService::new());
    service.push_turn(
        AGENT_TASK,
        ScriptedTurn::tool_call(TASK_COMPLETE_TOOL, json!({"answer": "done"})),
    );
    service.push_turn(
        AGENT_TASK,
        ScriptedTurn::tool_call(TASK_COMPLETE_TOOL, json!({"result": "done"})),
    );
    let orchestrator = TaskOrchestrator::new(service, TaskmindConfig::default());
    let result = run(&orchestrator, TaskRequest::new("sys", "go"), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.status, TaskStatus::Complete);
    assert_eq!(result.turns, 2);
    assert!(result
        .history
        .iter()
        .any(|m| m.role == Role::Tool && m.content.starts_with("Invalid call")));
}

#[tokio::test]
async fn unavailable_model_is_fatal() {
    let service = Arc::new(ScriptedService::new());
    let mut config = two_model_config(5, 10);
    config.orchestrator.disabled_models.insert("model-a".into());
    config.orchestrator.disabled_models.insert("model-b".into());
    let orchestrator = TaskOrchestrator::new(service.clone(), config);
    let result = run(&orchestrator, TaskRequest::new("sys", "go"), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.status, TaskStatus::FatalError);
    assert!(result.error.unwrap().contains("No model available"));
    assert!(service.calls().is_empty());
}

#[tokio::test]
async fn empty_input_is_rejected_before_any_call() {
    let service = Arc::new(ScriptedService::new());
    let orchestrator = TaskOrchestrator::new(service.clone(), TaskmindConfig::default());
    let err = run(&orchestrator, TaskRequest::new("sys", "   "), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert!(service.calls().is_empty());
}

#[tokio::test]
async fn cancellation_interrupts_pacing() {
    let service = Arc::new(ScriptedService::new());
    service.set_fallback(AGENT_TASK, ScriptedTurn::text("working"));
    let mut config = TaskmindConfig::default();
    config.orchestrator.thought_delay_secs = 60;
    let orchestrator = TaskOrchestrator::new(service.clone(), config);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let result = run(&orchestrator, TaskRequest::new("sys", "go"), cancel)
        .await
        .unwrap();
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    assert_eq!(result.status, TaskStatus::Incomplete);
    assert_eq!(service.call_count(AGENT_TASK), 0);
}

// ── Metamemory ─────────────────────────────────────────────────────────

fn eager_memory() -> MetamemoryConfig {
    MetamemoryConfig {
        processing_threshold: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn same_topic_in_two_spellings_creates_one_thread() {
    let service = Arc::new(ScriptedService::new());
    service.push_text(
        AGENT_TAGGER,
        r#"{"messages": [{"id": "m1", "topics": ["Database Design"], "summary": "schema"}]}"#,
    );
    service.push_text(
        AGENT_TAGGER,
        "```json\n{\"messages\": [{\"id\": \"m2\", \"topics\": [\"  database   design \"], \"summary\": \"indexes\"}]}\n```",
    );
    let engine =
        MetamemoryEngine::with_service(eager_memory(), service.clone(), &ModelCatalog::default());

    let m1: MessageRef = Arc::new(Message::user("let's design the schema").with_id("m1"));
    let m2: MessageRef = Arc::new(Message::user("which indexes do we need").with_id("m2"));
    assert!(matches!(
        engine.process_messages(&[m1]).await,
        PassOutcome::Processed(_)
    ));
    assert!(matches!(
        engine.process_messages(&[m2]).await,
        PassOutcome::Processed(_)
    ));

    assert_eq!(engine.topics(), vec!["database design".to_string()]);
    let thread = engine.thread("Database Design").unwrap();
    assert_eq!(thread.messages().len(), 2);
    assert_eq!(thread.state, ThreadState::Active);
    assert_eq!(service.call_count(AGENT_TAGGER), 2);
}

#[tokio::test]
async fn snapshot_file_round_trip_preserves_state() {
    let service = Arc::new(ScriptedService::new());
    service.push_text(
        AGENT_TAGGER,
        r#"{"messages": [
            {"id": "a", "topics": ["billing", "invoices"], "summary": "billing flow"},
            {"id": "b", "topics": ["ephemeral"]}
        ]}"#,
    );
    let engine =
        MetamemoryEngine::with_service(eager_memory(), service.clone(), &ModelCatalog::default());
    let history: Vec<MessageRef> = vec![
        Arc::new(Message::user("how are invoices generated").with_id("a")),
        Arc::new(Message::user("thanks!").with_id("b")),
    ];
    engine.process_messages(&history).await;
    engine.promote_to_core("billing").unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.json");
    engine.save_snapshot(&path).unwrap();

    let restored =
        MetamemoryEngine::with_service(eager_memory(), service, &ModelCatalog::default());
    restored.load_snapshot(&path).unwrap();
    assert_eq!(restored.get_state(), engine.get_state());
    assert_eq!(restored.reattach_history(&history).unwrap(), 3);
    assert_eq!(restored.thread("invoices").unwrap().messages().len(), 1);
    assert_eq!(
        restored.thread("billing").unwrap().state,
        ThreadState::Core
    );
    assert!(restored
        .thread("billing")
        .unwrap()
        .related
        .contains("invoices"));
}

#[tokio::test]
async fn orchestrator_feeds_metamemory_every_turn() {
    let service = Arc::new(ScriptedService::new());
    service.push_text(AGENT_TASK, "looking into it");
    service.push_turn(
        AGENT_TASK,
        ScriptedTurn::tool_call(TASK_COMPLETE_TOOL, json!({"result": "done"})),
    );
    service.set_fallback(AGENT_TAGGER, ScriptedTurn::text(r#"{"messages": []}"#));

    let config = TaskmindConfig {
        metamemory: eager_memory(),
        ..Default::default()
    };
    let engine = Arc::new(MetamemoryEngine::with_service(
        config.metamemory.clone(),
        service.clone(),
        &config.models,
    ));
    let orchestrator =
        TaskOrchestrator::new(service.clone(), config).with_metamemory(engine.clone());
    let result = run(&orchestrator, TaskRequest::new("sys", "go"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::Complete);
    assert!(!engine.is_processing());
    assert_eq!(engine.queued_len(), 0);
    for message in &result.history {
        assert!(
            engine.metadata(&message.id).is_some(),
            "untagged {}",
            message.id
        );
    }
    // The system prompt leads every task request.
    for call in service.calls().iter().filter(|c| c.agent.name == AGENT_TASK) {
        assert_eq!(call.messages[0].role, Role::System);
        assert_eq!(call.messages[0].content, "sys");
    }
}

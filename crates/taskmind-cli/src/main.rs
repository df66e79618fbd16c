// Paw Taskmind CLI

mod cli;

use std::path::Path;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use log::{info, warn};
use paw_taskmind::atoms::constants::SUMMARY_SEPARATOR;
use paw_taskmind::atoms::memory_types::ThreadState;
use paw_taskmind::engine::metamemory::snapshot::{archived_topics, load_snapshot, snapshot_stats};
use paw_taskmind::engine::metamemory::{ThreadStore, VectorIndex};
use paw_taskmind::engine::providers::Script;
use paw_taskmind::{
    EngineResult, MetamemoryEngine, ScriptedService, TaskOrchestrator, TaskRequest,
    TaskmindConfig,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Command, ConfigCommand, ReplayArgs, SnapshotCommand, SnapshotSearchArgs};

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(Some(payload)) => match serde_json::to_string_pretty(&payload) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("error: {}", e);
                std::process::exit(1);
            }
        },
        Ok(None) => {}
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> EngineResult<Option<serde_json::Value>> {
    match cli.command {
        Command::Config {
            command: ConfigCommand::Check { file },
        } => {
            let config = TaskmindConfig::load(&file)?;
            Ok(Some(json!({
                "ok": true,
                "file": file.display().to_string(),
                "config": serde_json::to_value(&config)?,
            })))
        }
        Command::Snapshot {
            command: SnapshotCommand::Inspect { file },
        } => inspect(&file).map(Some),
        Command::Snapshot {
            command: SnapshotCommand::Search(args),
        } => search(args).map(Some),
        Command::Replay(args) => replay(args).await.map(Some),
        Command::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "taskmind", &mut std::io::stdout());
            Ok(None)
        }
    }
}

fn inspect(file: &Path) -> EngineResult<serde_json::Value> {
    let snapshot = load_snapshot(file)?;
    let stats = snapshot_stats(&snapshot);
    let topics: Vec<_> = snapshot
        .topics
        .iter()
        .map(|(name, record)| {
            json!({
                "name": name,
                "type": record.kind.as_str(),
                "description": record.description,
                "last_update": record.last_update,
                "compactions": snapshot.compactions.get(name).map_or(0, |c| c.len()),
                "related": record.related,
            })
        })
        .collect();
    Ok(json!({
        "topics_by_state": stats.topics_by_state,
        "tagged_messages": stats.tagged_messages,
        "compaction_records": stats.compaction_records,
        "last_processed_index": stats.last_processed_index,
        "topics": topics,
    }))
}

fn search(args: SnapshotSearchArgs) -> EngineResult<serde_json::Value> {
    let snapshot = load_snapshot(&args.file)?;
    let mut store = ThreadStore::new();
    let mut index = VectorIndex::default();
    for name in archived_topics(&snapshot) {
        store.create(name, ThreadState::Archived);
        let records = snapshot.compactions.get(name).cloned().unwrap_or_default();
        store.set_compactions(name, records, SUMMARY_SEPARATOR)?;
        if let Some(thread) = store.get(name) {
            index.add_thread(thread);
        }
    }
    info!("[cli] Indexed {} archived topic(s)", index.size());

    let hits: Vec<_> = index
        .search(&args.query, args.top_k)
        .into_iter()
        .map(|hit| json!({"topic": hit.name, "score": hit.score, "summary": hit.summary}))
        .collect();
    Ok(json!({"query": args.query, "hits": hits}))
}

async fn replay(args: ReplayArgs) -> EngineResult<serde_json::Value> {
    let config = match &args.config {
        Some(path) => TaskmindConfig::load(path)?,
        None => TaskmindConfig::default(),
    };
    let service = Arc::new(ScriptedService::from_script(Script::load(&args.script)?));

    let mut orchestrator = TaskOrchestrator::new(service.clone(), config.clone());
    if args.memory {
        let engine = MetamemoryEngine::with_service(
            config.metamemory.clone(),
            service.clone(),
            &config.models,
        );
        orchestrator = orchestrator.with_metamemory(Arc::new(engine));
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("[cli] Interrupted; stopping after the current turn");
            on_signal.cancel();
        }
    });

    let mut request = TaskRequest::new(args.system, args.input);
    request.model = args.model;
    let result = orchestrator.run(request, cancel).await?;

    let mut payload = serde_json::to_value(&result)?;
    if let Some(engine) = orchestrator.metamemory() {
        payload["memory"] = serde_json::to_value(engine.get_state())?;
    }
    Ok(payload)
}

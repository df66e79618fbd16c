use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "taskmind",
    version,
    about = "Paw Taskmind — task orchestration with topic-threaded memory"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommand,
    },
    /// Run a task against a recorded transcript and print the result as JSON.
    Replay(ReplayArgs),
    /// Print shell completions.
    Completions {
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse and validate a config file (TOML, or JSON by extension).
    Check { file: PathBuf },
}

#[derive(Debug, Subcommand)]
pub enum SnapshotCommand {
    /// Summarise a saved metamemory snapshot.
    Inspect { file: PathBuf },
    /// Similarity search over the snapshot's archived topics.
    Search(SnapshotSearchArgs),
}

#[derive(Debug, Args)]
pub struct SnapshotSearchArgs {
    pub file: PathBuf,

    pub query: String,

    #[arg(long, default_value_t = 3)]
    pub top_k: usize,
}

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Transcript: `{"turns": {"<agent>": [...]}, "fallback": {...}}`.
    pub script: PathBuf,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, default_value = "You are a careful assistant. Call task_complete when done.")]
    pub system: String,

    #[arg(long, default_value = "Continue the recorded task.")]
    pub input: String,

    /// Model id or class; defaults to the config's default_model.
    #[arg(long)]
    pub model: Option<String>,

    /// Feed the run through a metamemory engine on the same transcript.
    #[arg(long)]
    pub memory: bool,
}

//! Inspect and repair persisted conversation threads.
//!
//! # Examples
//!
//! ```sh
//! # List stored threads with their status
//! weft list
//!
//! # Inspect one thread
//! weft show thread_4f1c... --state
//! weft stats thread_4f1c...
//! weft window thread_4f1c...
//!
//! # Diagnose and recover
//! weft analyze thread_4f1c...
//! weft recover thread_4f1c... --strategy rollback-to-checkpoint
//!
//! # Branch a thread at an event
//! weft fork thread_4f1c... --upto 12
//! ```

use clap::{Parser, Subcommand};
use futures::future::join_all;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use weft::config::EngineConfig;
use weft::context::ContextOptimizer;
use weft::recovery::{RecoveryManager, RecoveryStrategy};
use weft::storage::{FileThreadStore, ThreadStore};
use weft::thread::{fork, serializer, thread_statistics, validate};

/// Inspect and repair persisted conversation threads.
#[derive(Parser)]
#[command(name = "weft")]
struct Cli {
    /// Thread directory (overrides the config file)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log verbosity: -v for debug, -vv for trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List stored threads
    List,
    /// Print a thread snapshot
    Show {
        thread_id: String,
        /// Print the derived state instead of the snapshot
        #[arg(long)]
        state: bool,
    },
    /// Check a thread's structural invariants
    Validate { thread_id: String },
    /// Summary statistics for a thread
    Stats { thread_id: String },
    /// Rebuild the context window and print it
    Window { thread_id: String },
    /// Diagnose a thread and suggest a recovery strategy
    Analyze { thread_id: String },
    /// Recover a thread, using the suggested strategy unless one is given
    Recover {
        thread_id: String,
        #[arg(long)]
        strategy: Option<String>,
    },
    /// Fork a thread, optionally keeping only events up to an index
    Fork {
        thread_id: String,
        #[arg(long)]
        upto: Option<usize>,
    },
    /// List a thread's checkpoint markers
    Checkpoints { thread_id: String },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(level);
    tracing_subscriber::registry().with(layer).init();
}

fn to_json<T: serde::Serialize>(value: &T) -> weft::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

async fn run(cli: Cli) -> weft::Result<String> {
    let mut config = EngineConfig::load_or_default(cli.config.as_deref())?;
    if let Some(dir) = cli.store {
        config.store_dir = dir;
    }
    debug!("Using thread store at {}", config.store_dir.display());
    let store: Arc<dyn ThreadStore> = Arc::new(FileThreadStore::new(&config.store_dir));

    match cli.command {
        Command::List => {
            let ids = store.list().await?;
            let loaded = join_all(ids.iter().map(|id| store.load(id))).await;
            let mut out = String::new();
            for (id, thread) in ids.iter().zip(loaded) {
                match thread {
                    Ok(t) => out.push_str(&format!(
                        "{id}\t{}\t{} events\t{}\n",
                        t.status,
                        t.events.len(),
                        t.updated_at.to_rfc3339()
                    )),
                    Err(e) => out.push_str(&format!("{id}\tunreadable: {e}\n")),
                }
            }
            Ok(out)
        }
        Command::Show { thread_id, state } => {
            let thread = store.load(&thread_id).await?;
            if state {
                to_json(&thread.derived_state())
            } else {
                let bytes = serializer::serialize(&thread)?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
        }
        Command::Validate { thread_id } => {
            let thread = store.load(&thread_id).await?;
            validate(&thread).into_result()?;
            Ok(format!("{thread_id}: valid ({} events)", thread.events.len()))
        }
        Command::Stats { thread_id } => {
            let thread = store.load(&thread_id).await?;
            Ok(thread_statistics(&thread).to_log_string())
        }
        Command::Window { thread_id } => {
            let thread = store.load(&thread_id).await?;
            let optimizer = ContextOptimizer::from_thread(&thread, config.optimizer.clone());
            let prompt = optimizer.prompt_context();
            let mut out = format!("{}\n", prompt.usage.to_log_string());
            for message in prompt.to_messages() {
                let text = message.content.clone().unwrap_or_else(|| {
                    message
                        .tool_calls
                        .iter()
                        .flatten()
                        .map(|c| format!("call {}({})", c.name, c.arguments))
                        .collect::<Vec<_>>()
                        .join(", ")
                });
                out.push_str(&format!("[{}] {text}\n", message.role));
            }
            Ok(out)
        }
        Command::Analyze { thread_id } => {
            let recovery = RecoveryManager::new(store, config.recovery.clone());
            to_json(&recovery.analyze_failure(&thread_id).await?)
        }
        Command::Recover {
            thread_id,
            strategy,
        } => {
            let recovery = RecoveryManager::new(store, config.recovery.clone());
            let result = match strategy {
                Some(s) => {
                    let strategy: RecoveryStrategy = s.parse()?;
                    recovery.recover(&thread_id, strategy).await
                }
                None => recovery.recover_auto(&thread_id).await?,
            };
            let result = result.into_result(&thread_id)?;
            let target = result.new_thread_id.as_deref().unwrap_or(&thread_id);
            Ok(format!("{} ({}): {target}", result.message, result.strategy))
        }
        Command::Fork { thread_id, upto } => {
            let thread = store.load(&thread_id).await?;
            let forked = fork(&thread, upto)?;
            store.save(&forked.thread_id, &forked).await?;
            Ok(format!(
                "{} ({} of {} events)",
                forked.thread_id,
                forked.events.len(),
                thread.events.len()
            ))
        }
        Command::Checkpoints { thread_id } => {
            let thread = store.load(&thread_id).await?;
            let mut out = String::new();
            for cp in thread.checkpoints() {
                out.push_str(&format!(
                    "{}\tevent {}\tat {}\t{}\n",
                    cp.checkpoint_id,
                    cp.event_index,
                    cp.position,
                    cp.label.as_deref().unwrap_or("")
                ));
            }
            Ok(out)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(output) => {
            let output = output.trim_end();
            if !output.is_empty() {
                println!("{output}");
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

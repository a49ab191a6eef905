//! # tally
//!
//! Command-line entry point: runs the creation workers and the
//! reconciliation scheduler, and exposes the entity lifecycle and the
//! producer contract as one-shot commands.

#![deny(unsafe_code)]

mod stores;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tally_core::ApplicationToken;
use tally_jobs::{
    CountKind, CreationHandler, JobRouter, Producer, QueueConfig, ReconcileSchedule, Reconciler,
    Scheduler,
};
use tally_logging::LoggingConfig;
use tally_settings::TallySettings;
use tally_store::Lifecycle;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::stores::Stores;

/// Chat and message ingestion with cached counts.
#[derive(Parser, Debug)]
#[command(name = "tally", about = "Chat and message ingestion workers with cached counts")]
struct Cli {
    /// Settings file (defaults to `~/.tally/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Durable store path (`:memory:` for a private in-memory database).
    #[arg(long, global = true)]
    db_path: Option<String>,

    /// Counter store path for the `sqlite` backend.
    #[arg(long, global = true)]
    counters_path: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run workers and the reconciliation scheduler; job envelopes are read
    /// as JSON lines from stdin.
    Serve,
    /// Run one reconciliation pass and print its report.
    Reconcile {
        /// `applications` or `chats`.
        kind: CountKind,
    },
    /// Application lifecycle.
    App {
        #[command(subcommand)]
        action: AppAction,
    },
    /// Chat lifecycle.
    Chat {
        #[command(subcommand)]
        action: ChatAction,
    },
    /// Message lifecycle.
    Message {
        #[command(subcommand)]
        action: MessageAction,
    },
    /// Accept a chat or message the way the ingress does and print its envelope.
    Produce {
        #[command(subcommand)]
        action: ProduceAction,
    },
}

#[derive(Subcommand, Debug)]
enum AppAction {
    Create { name: String },
    Delete { token: String },
}

#[derive(Subcommand, Debug)]
enum ChatAction {
    Delete { token: String, number: i64 },
}

#[derive(Subcommand, Debug)]
enum MessageAction {
    Delete { token: String, chat: i64, number: i64 },
}

#[derive(Subcommand, Debug)]
enum ProduceAction {
    Chat { token: String },
    Message { token: String, chat: i64, body: String },
}

fn load_settings(cli: &Cli) -> Result<TallySettings> {
    let mut settings = match &cli.settings {
        Some(path) => tally_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => tally_settings::load_settings().context("Failed to load settings")?,
    };
    if let Some(path) = &cli.db_path {
        settings.database.path.clone_from(path);
    }
    if let Some(path) = &cli.counters_path {
        settings.counters.path.clone_from(path);
    }
    Ok(settings)
}

fn logging_config(settings: &TallySettings) -> LoggingConfig {
    LoggingConfig {
        level: settings.logging.level.clone(),
        json: settings.logging.json,
        module_levels: settings
            .logging
            .module_levels
            .iter()
            .map(|(module, level)| (module.clone(), level.clone()))
            .collect(),
    }
}

fn queue_configs(settings: &TallySettings) -> (QueueConfig, QueueConfig) {
    let workers = &settings.workers;
    let chats = QueueConfig {
        concurrency: workers.chats_concurrency,
        capacity: workers.queue_capacity,
        retry: workers.retry.clone(),
    };
    let messages = QueueConfig {
        concurrency: workers.messages_concurrency,
        ..chats.clone()
    };
    (chats, messages)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    tally_logging::init_logging(&logging_config(&settings))
        .context("Failed to initialize logging")?;
    let stores = Stores::open(&settings)?;

    match cli.command {
        Command::Serve => serve(&settings, stores).await,
        Command::Reconcile { kind } => reconcile_once(&settings, stores, kind).await,
        Command::App { action } => {
            let lifecycle = Lifecycle::new(stores.db, stores.counters);
            match action {
                AppAction::Create { name } => print_json(&lifecycle.create_application(&name)?),
                AppAction::Delete { token } => {
                    let token = ApplicationToken::from_raw(token);
                    let chats = lifecycle.delete_application(&token)?;
                    print_json(&json!({ "token": token, "chatsDeleted": chats }))
                }
            }
        }
        Command::Chat {
            action: ChatAction::Delete { token, number },
        } => {
            let lifecycle = Lifecycle::new(stores.db, stores.counters);
            print_json(&lifecycle.delete_chat(&ApplicationToken::from_raw(token), number)?)
        }
        Command::Message {
            action: MessageAction::Delete { token, chat, number },
        } => {
            let lifecycle = Lifecycle::new(stores.db, stores.counters);
            print_json(&lifecycle.delete_message(&ApplicationToken::from_raw(token), chat, number)?)
        }
        Command::Produce { action } => {
            let producer = Producer::new(stores.counters);
            let envelope = match action {
                ProduceAction::Chat { token } => {
                    producer.produce_chat(&ApplicationToken::from_raw(token))?
                }
                ProduceAction::Message { token, chat, body } => {
                    producer.produce_message(&ApplicationToken::from_raw(token), chat, &body)?
                }
            };
            println!("{}", envelope.to_json()?);
            Ok(())
        }
    }
}

async fn reconcile_once(settings: &TallySettings, stores: Stores, kind: CountKind) -> Result<()> {
    let reconciler = Reconciler::new(stores.db, stores.counters, settings.reconcile.batch_size);
    let report = tokio::task::spawn_blocking(move || reconciler.run(kind))
        .await
        .context("Reconciliation task failed")?;
    print_json(&report)?;
    if let Some(err) = report.aborted {
        bail!("{kind} reconciliation aborted: {err}");
    }
    Ok(())
}

async fn serve(settings: &TallySettings, stores: Stores) -> Result<()> {
    let handler = Arc::new(CreationHandler::new(
        stores.db.clone(),
        settings.workers.duplicate_policy,
    ));
    let (chats, messages) = queue_configs(settings);
    let router = JobRouter::start(handler, &chats, &messages);

    let schedule = ReconcileSchedule {
        applications_every: Duration::from_secs(settings.reconcile.applications_interval_secs),
        chats_every: Duration::from_secs(settings.reconcile.chats_interval_secs),
    };
    let scheduler = Scheduler::start(
        Reconciler::new(stores.db, stores.counters, settings.reconcile.batch_size),
        &schedule,
    );
    info!(policy = %settings.workers.duplicate_policy, "serving; reading job envelopes from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for ctrl-c")?;
                info!("ctrl-c received, shutting down");
                break;
            }
            line = lines.next_line(), if stdin_open => match line.context("Failed to read stdin")? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    if let Err(err) = router.submit_json(&line).await {
                        warn!(error = %err, "rejected job envelope");
                    }
                }
                None => {
                    info!("stdin closed; waiting for ctrl-c");
                    stdin_open = false;
                }
            },
        }
    }

    scheduler.stop().await;
    let dead = router.dead().clone();
    router.shutdown().await;
    if !dead.is_empty() {
        warn!(count = dead.len(), "jobs exhausted their retries");
        print_json(&dead.list())?;
    }
    Ok(())
}

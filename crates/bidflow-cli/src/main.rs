// Copyright (c) 2025 Bidflow Team
// SPDX-License-Identifier: Apache-2.0

//! Bidflow CLI — a thin stdio front end over the Entry Handler.

use std::sync::Arc;

use anyhow::{Context, Result};
use bidflow_core::config::Config;
use bidflow_core::entry_handler::{EntryHandler, EntryRequest, TerminalMarker};
use bidflow_core::event_bus::EventBus;
use bidflow_core::graph_executor::GraphExecutor;
use bidflow_core::session_resumer::{SessionResumer, UserInput};
use bidflow_core::stage_runner::StageRunner;
use bidflow_core::workflow_state::ContentEdit;
use bidflow_providers::{AnthropicProvider, OpenAIProvider};
use bidflow_state::{PostgresIdempotencyLedger, PostgresStateStore};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "bidflow")]
#[command(version, about = "Bid workflow scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new workflow for a project/session.
    Start {
        #[arg(long)]
        project_id: Uuid,
        #[arg(long)]
        user_id: Uuid,
        #[arg(long)]
        session_id: String,
    },

    /// Resume a paused workflow with chat feedback.
    Resume {
        #[arg(long)]
        project_id: Uuid,
        #[arg(long)]
        user_id: Uuid,
        #[arg(long)]
        session_id: String,
        #[arg(long)]
        chat: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| format!("bidflow={}", log_level).into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match cli.command {
        Commands::Start { project_id, user_id, session_id } => run(project_id, user_id, session_id, true, None).await,
        Commands::Resume { project_id, user_id, session_id, chat } => {
            run(project_id, user_id, session_id, false, Some(UserInput { chat, content_edits: Vec::<ContentEdit>::new() })).await
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(project_id: Uuid, user_id: Uuid, session_id: String, start: bool, user_input: Option<UserInput>) -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;

    let state_store = Arc::new(
        PostgresStateStore::new(&config.database_url, None, None)
            .await
            .context("failed to connect to the state store")?,
    );
    let ledger = Arc::new(PostgresIdempotencyLedger::new(state_store.pool().clone()));
    let event_bus = Arc::new(EventBus::new(state_store.clone(), config.event_queue_capacity));

    let llm = build_llm_provider()?;
    let stage_runner = StageRunner::new(state_store.clone(), ledger, event_bus.clone(), llm);
    let exporter = Arc::new(NullExporter);
    let graph_executor = GraphExecutor { state_store: state_store.clone(), event_bus: event_bus.clone(), stage_runner, exporter };
    let session_resumer = SessionResumer { state_store, event_bus, graph_executor };
    let handler = EntryHandler { session_resumer };

    info!("dispatching entry request for session {session_id}");
    let request = EntryRequest { project_id, user_id, session_id, start, user_input };
    let (marker, outcome) = handler.handle(request).await.context("workflow run failed")?;

    match marker {
        TerminalMarker::Waiting => println!("{}", "workflow paused, awaiting feedback".yellow().bold()),
        TerminalMarker::Complete => println!("{}", "workflow completed".green().bold()),
        TerminalMarker::Failed => println!("{}", "workflow failed".red().bold()),
    }
    println!("{}", serde_json::to_string_pretty(&outcome.state.task_outputs).unwrap_or_default());

    Ok(())
}

fn build_llm_provider() -> Result<Arc<dyn bidflow_core::providers::LLMProvider>> {
    if let Ok(anthropic) = AnthropicProvider::from_env() {
        info!("using Anthropic provider");
        return Ok(Arc::new(anthropic));
    }
    if let Ok(openai) = OpenAIProvider::from_env() {
        info!("using OpenAI provider");
        return Ok(Arc::new(openai));
    }
    anyhow::bail!("no LLM providers available; set ANTHROPIC_API_KEY or OPENAI_API_KEY");
}

/// No-op exporter used until an object-storage client is wired in
/// (spec.md §1 keeps artifact export's storage backend out of scope).
struct NullExporter;

#[async_trait::async_trait]
impl bidflow_core::graph_executor::ArtifactExporter for NullExporter {
    async fn export_all(&self, _workflow_id: Uuid, artifact_ids: &[Uuid]) -> bidflow_core::error::Result<std::collections::HashMap<Uuid, String>> {
        Ok(artifact_ids.iter().map(|id| (*id, format!("local://unexported/{id}"))).collect())
    }
}

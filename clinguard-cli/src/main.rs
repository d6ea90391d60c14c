//! Clinguard CLI - practice a clinical conversation against a guarded persona.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use clinguard::providers::openai::{DEFAULT_MODEL, OPENAI_API_BASE_URL};
use clinguard::providers::{OpenAIChatModel, ScriptedModel};
use clinguard::{
    FileCatalog, FileTranscriptStore, GuardConfig, GuardrailOrchestrator, MemoryCatalog,
    MemoryTranscriptStore, ModelCollaborator, ScenarioCatalog, TranscriptStore,
};
use clinguard_cli::{ChatBot, ChatBotConfig};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const OFFLINE_REPLY: &str = "Hmm, I'm not really sure. Can you tell me more?";

/// Clinguard CLI - guarded clinical roleplay
#[derive(Parser, Debug)]
#[command(name = "clinguard")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Scenario key (built-in: hpv, ohi)
    #[arg(short, long, default_value = "hpv")]
    scenario: String,

    /// JSON file with scenario profiles, replacing the built-in ones
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// JSON guardrail configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Chat completions base URL
    #[arg(long, env = "OPENAI_BASE_URL", default_value = OPENAI_API_BASE_URL)]
    base_url: String,

    /// Model name
    #[arg(short, long, default_value = DEFAULT_MODEL)]
    model: String,

    /// API key (optional for local servers)
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Directory for JSON-lines transcripts (kept in memory if omitted)
    #[arg(long)]
    transcripts: Option<PathBuf>,

    /// Use a scripted persona instead of a model endpoint
    #[arg(long)]
    offline: bool,

    /// Print which guardrail fired on each turn
    #[arg(long)]
    show_guardrail: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("clinguard=debug,clinguard_cli=debug")
    } else {
        EnvFilter::new("clinguard=warn,clinguard_cli=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = match &args.config {
        Some(path) => GuardConfig::load(path).await?,
        None => GuardConfig::default(),
    };

    let catalog: Box<dyn ScenarioCatalog> = match &args.catalog {
        Some(path) => Box::new(FileCatalog::new(path)),
        None => Box::new(MemoryCatalog::builtin()),
    };

    let model: Arc<dyn ModelCollaborator> = if args.offline {
        Arc::new(ScriptedModel::new(OFFLINE_REPLY))
    } else {
        let mut builder = OpenAIChatModel::builder()
            .base_url(&args.base_url)
            .model(&args.model)
            .timeout(config.model_timeout());
        if let Some(key) = &args.api_key {
            builder = builder.api_key(key);
        }
        Arc::new(builder.build()?)
    };

    let store: Arc<dyn TranscriptStore> = match &args.transcripts {
        Some(dir) => Arc::new(FileTranscriptStore::new(dir)),
        None => Arc::new(MemoryTranscriptStore::new()),
    };

    let orchestrator = GuardrailOrchestrator::with_config(model, store, &config)?;
    let session = orchestrator
        .start_session(catalog.as_ref(), &args.scenario)
        .await?;
    info!(session = %session.id(), "transcript key");

    let mut chatbot = ChatBot::new(
        orchestrator,
        session,
        ChatBotConfig {
            show_guardrail: args.show_guardrail,
        },
    );
    chatbot.run().await?;

    Ok(())
}

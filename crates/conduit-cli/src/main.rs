//! conduit terminal client
//!
//! Loads an agent from the YAML configuration, connects its tool providers
//! and runs a read-eval-print loop that streams replies to stdout. Logs go
//! to stderr.

mod config;
mod repl;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use conduit_core::{LlmBackend, Orchestrator};
use conduit_runtime::{OllamaBackend, RuntimeSessionFactory};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{FileConfig, ModelProvider};

/// Chat with a tool-using agent
#[derive(Parser, Debug)]
#[command(name = "conduit", version, about = "Chat with a tool-using agent")]
struct Cli {
    /// Agent id from the configuration file
    #[arg(long, default_value = "chat")]
    agent: String,

    /// Configuration file
    #[arg(long, default_value = "config.yml")]
    config: PathBuf,

    /// Environment; controls log verbosity
    #[arg(long, value_enum, default_value_t = Environment::Prod)]
    env: Environment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Environment {
    Dev,
    Prod,
}

impl Environment {
    const fn default_filter(self) -> &'static str {
        match self {
            Self::Dev => "info,conduit=debug",
            Self::Prod => "warn",
        }
    }
}

fn init_tracing(env: Environment) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(env.default_filter())),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.env);
    tracing::info!(agent = %cli.agent, env = ?cli.env, "Starting conduit");

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "conduit exited with an error");
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let file = FileConfig::load(&cli.config)?;
    let resolved = file
        .resolve(&cli.agent)
        .with_context(|| format!("loading agent '{}'", cli.agent))?;

    let backend: Arc<dyn LlmBackend> = match resolved.provider {
        ModelProvider::Ollama => Arc::new(OllamaBackend::from_env()),
    };

    let mut agent = Orchestrator::from_config(resolved.config, backend, &RuntimeSessionFactory)?;

    let outcome = match agent.start().await {
        Ok(failures) => {
            for failure in &failures {
                eprintln!("Warning: {}", failure.user_message());
            }
            repl::run(&mut agent).await
        }
        Err(err) => Err(anyhow::Error::new(err).context("starting agent")),
    };

    if let Err(err) = agent.close().await {
        tracing::warn!(error = %err, "Error during cleanup");
    }
    outcome
}

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use voxline::engines::{HttpRecognizer, HttpSynthesizer, OllamaGenerator, ReplyGenerator};
use voxline::services::{llm, orchestrator, stt, tts};
use voxline::Config;

/// Voxline - speech pipeline services (orchestrator, STT, LLM, TTS)
#[derive(Parser)]
#[command(name = "voxline", version, about)]
struct Cli {
    /// Configuration file (defaults to voxline.toml if present)
    #[arg(short, long, env = "VOXLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline orchestrator
    Orchestrator {
        /// Override the configured listen port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the transcription service
    Stt {
        /// Override the configured listen port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the response-generation service
    Llm {
        /// Override the configured listen port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the speech-synthesis service
    Tts {
        /// Override the configured listen port
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voxline=info",
        1 => "info,voxline=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Arc::new(Config::load(cli.config.as_deref())?);
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::Orchestrator { port } => {
            let port = port.unwrap_or(config.orchestrator.port);
            let state = Arc::new(orchestrator::OrchestratorState::new(config));
            tracing::info!(port, "starting orchestrator");
            serve(orchestrator::app(state), port).await
        }
        Command::Stt { port } => {
            let port = port.unwrap_or(config.stt.port);
            let recognizer = Arc::new(HttpRecognizer::new(
                config.stt.engine_url.clone(),
                config.stt.model.clone(),
            ));
            let state = Arc::new(stt::SttState { config, recognizer });
            tracing::info!(port, "starting transcription service");
            serve(stt::app(state), port).await
        }
        Command::Llm { port } => {
            let port = port.unwrap_or(config.llm.port);
            let generator = Arc::new(OllamaGenerator::new(&config.llm));

            // Pull the model into memory now rather than on the first trial.
            if let Err(e) = generator.warmup().await {
                tracing::warn!("model warmup failed: {e}");
            }

            let state = Arc::new(llm::LlmState { config, generator });
            tracing::info!(port, "starting response-generation service");
            serve(llm::app(state), port).await
        }
        Command::Tts { port } => {
            let port = port.unwrap_or(config.tts.port);
            let synthesizer = Arc::new(HttpSynthesizer::new(config.tts.engine_url.clone()));
            let state = Arc::new(tts::TtsState {
                config,
                synthesizer,
            });
            tracing::info!(port, "starting speech-synthesis service");
            serve(tts::app(state), port).await
        }
    }
}

async fn serve(app: axum::Router, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

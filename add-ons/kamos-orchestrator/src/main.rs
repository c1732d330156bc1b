//! Kamos matrix orchestrator.
//!
//! Usage:
//!   kamos-orchestrator [-m <number>] "Some complex question..."
//!   kamos-orchestrator ask [-g] [-r] [-s] [--specs] [-i <image>] "Some question..."
//!
//! The default flow splits the prompt into sub-tasks, runs one autonomous relay
//! session per task in parallel, then synthesizes everything into one report. The
//! report goes to stdout as JSON and to `outputs/analysis_<timestamp>.json`.
//! `ask` sends one prompt straight to the analysis service and prints its result.
//! All narration goes to stderr.

mod cli;
mod output;

use cli::Command;
use kamos_core::{
    GeminiClient, ImageContent, KamosClient, MatrixOrchestrator, RelayConfig, RemoteLoopClient, SessionRunner,
};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[Orchestrator] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match RelayConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let command = match cli::parse_command(std::env::args().skip(1), config.orchestrator.matrix_max) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("{}", cli::USAGE);
            std::process::exit(2);
        }
    };

    let result = match &command {
        Command::Matrix(args) => run(&config, args).await,
        Command::Ask(args) => ask(&config, args).await,
    };
    if let Err(e) = result {
        eprintln!("Fatal Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: &RelayConfig, args: &cli::CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    let api_key = config.require_gemini_key()?;
    let generator = Arc::new(GeminiClient::new(&config.gemini, api_key, config.timeout())?);
    let remote = RemoteLoopClient::new(config.kamos.func_url.clone(), config.timeout())?;
    tracing::info!(target: "kamos::orchestrator", input = %args.prompt, "input");
    tracing::info!(target: "kamos::orchestrator", url = %remote.url(), "target relay");

    let sessions = Arc::new(SessionRunner::new(Arc::new(remote), config.timeout()));
    let matrix = MatrixOrchestrator::new(generator, sessions, config.relay.phase_count);
    if args.is_matrix() {
        let tasks = args.task_count();
        tracing::info!(
            target: "kamos::orchestrator",
            tasks,
            phases = config.relay.phase_count,
            steps = tasks * config.relay.phase_count as usize,
            "matrix mode"
        );
    }

    let report = matrix.run(&args.prompt, args.task_count()).await?;
    if report.failed_sessions() > 0 {
        tracing::warn!(
            target: "kamos::orchestrator",
            failed = report.failed_sessions(),
            total = report.sessions.len(),
            "some sessions failed; see the report"
        );
    }

    let json = serde_json::to_string_pretty(&report)?;
    println!("{}", json);

    let path = output::persist_report(Path::new(&config.orchestrator.output_dir), &json, chrono::Utc::now())?;
    tracing::info!(target: "kamos::orchestrator", path = %path.display(), "saved output");
    Ok(())
}

/// Direct analysis: one request to the Kamos API, result printed as JSON.
async fn ask(config: &RelayConfig, args: &cli::AskArgs) -> Result<(), Box<dyn std::error::Error>> {
    let token = config.require_kamos_token()?;
    let client = KamosClient::new(config.kamos.api_url.clone(), token, config.timeout())?;
    let image = args.image.as_deref().map(ImageContent::from_path).transpose()?;

    tracing::info!(
        target: "kamos::orchestrator",
        prompt = %args.prompt,
        google = args.flags.use_search,
        rag = args.flags.include_past_articles,
        saved = args.flags.include_saved_analyses,
        specs = args.flags.include_specs,
        image = ?args.image,
        "analyzing"
    );

    let result = client.analyze_with(&args.prompt, args.flags, image.as_ref()).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

// CLI driver for comparison runs against a research backend

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;

use research_arena::config::{ApiKeyStore, ArenaConfig};
use research_arena::{
    CompareRequest, Coordinator, HttpTransport, NullHistoryStore, RunSnapshot,
};

#[derive(Parser)]
#[command(name = "arena", about = "Run the same research query against several models and compare them")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a comparison run and stream progress to the terminal
    Run {
        /// The research query
        query: String,
        /// Model to include (repeatable)
        #[arg(short, long = "model", required = true)]
        models: Vec<String>,
        /// Base URL of the comparison backend
        #[arg(long, env = "ARENA_BASE_URL")]
        base_url: Option<String>,
    },
    /// Store an API key for a model
    SetKey { model: String, key: String },
    /// Remove the stored API key for a model
    RemoveKey { model: String },
    /// Remove all stored API keys
    ClearKeys,
    /// Fetch and print aggregate historical metrics
    Metrics {
        #[arg(long, env = "ARENA_BASE_URL")]
        base_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            query,
            models,
            base_url,
        } => run_comparison(query, models, base_url).await,
        Command::SetKey { model, key } => {
            let mut store = ApiKeyStore::load()?;
            store.set(&model, key);
            store.save()?;
            println!("Stored API key for '{}'", model);
            Ok(())
        }
        Command::RemoveKey { model } => {
            let mut store = ApiKeyStore::load()?;
            match store.remove(&model) {
                Some(_) => {
                    store.save()?;
                    println!("Removed API key for '{}'", model);
                }
                None => println!("No API key stored for '{}'", model),
            }
            Ok(())
        }
        Command::ClearKeys => {
            let mut store = ApiKeyStore::load()?;
            store.clear();
            store.save()?;
            println!("Cleared all API keys");
            Ok(())
        }
        Command::Metrics { base_url } => print_metrics(base_url).await,
    }
}

fn resolve_base_url(base_url: Option<String>, config: &ArenaConfig) -> String {
    base_url.unwrap_or_else(|| config.base_url.clone())
}

async fn run_comparison(
    query: String,
    models: Vec<String>,
    base_url: Option<String>,
) -> Result<()> {
    let config = ArenaConfig::load()?;
    let base_url = resolve_base_url(base_url, &config);
    let keys = ApiKeyStore::load()?;

    let api_keys = models
        .iter()
        .filter_map(|model| keys.get(model).map(|key| (model.clone(), key.clone())))
        .collect();
    let request = CompareRequest {
        query,
        models,
        api_keys,
    };

    let coordinator = Coordinator::new(HttpTransport::new(base_url), Arc::new(NullHistoryStore))
        .with_timing(config.timing());
    coordinator.start(request).await;

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    while coordinator.is_running() {
        ticker.tick().await;
        print_progress(&coordinator.snapshot());
    }
    coordinator.wait().await;

    let snapshot = coordinator.snapshot();
    print_summary(&snapshot);

    if let Some(error) = snapshot.error {
        eprintln!("Run error: {}", error);
        std::process::exit(1);
    }
    Ok(())
}

fn print_progress(snapshot: &RunSnapshot) {
    for worker in &snapshot.workers {
        println!(
            "{:<24} [{:>9}] {:>3}%  {} ({:.1}s)",
            worker.model,
            worker.state.as_str(),
            worker.progress,
            worker.stage,
            worker.elapsed_secs
        );
    }
    println!();
}

fn print_summary(snapshot: &RunSnapshot) {
    match &snapshot.session {
        Some(session) => {
            println!("Session {} ({} results)", session.id, session.results.len());
            for result in &session.results {
                println!(
                    "  {:<24} {:>7.1}s  {:>4} sources  {:>6} words  {}",
                    result.model,
                    result.duration,
                    result.sources_found,
                    result.word_count,
                    if result.success { "ok" } else { "failed" }
                );
            }
        }
        None => println!("Run ended without a finalized session"),
    }
    if let Some(metrics) = &snapshot.metrics {
        println!(
            "Backend has served {} comparison requests (as of {})",
            metrics.total_requests, metrics.generated_at
        );
    }
}

async fn print_metrics(base_url: Option<String>) -> Result<()> {
    use research_arena::EventStreamTransport;

    let config = ArenaConfig::load()?;
    let base_url = resolve_base_url(base_url, &config);
    let transport = HttpTransport::new(base_url);
    let summary = transport
        .fetch_metrics()
        .await
        .map_err(|e| anyhow!("Failed to fetch metrics: {}", e))?;

    println!(
        "{} total requests (generated at {})",
        summary.total_requests, summary.generated_at
    );
    for metrics in &summary.models {
        println!(
            "  {:<24} {:>5} runs  {:>6.1}s avg  {:>5.1}% success  {:>5.1} sources  {:>7.1} words",
            metrics.model,
            metrics.total_requests,
            metrics.average_duration,
            metrics.success_rate * 100.0,
            metrics.average_sources_found,
            metrics.average_word_count
        );
    }
    Ok(())
}

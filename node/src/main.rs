use anyhow::Result;
use clap::{Parser, Subcommand};
use gamedetect_api::ApiServer;
use gamedetect_classifier::CommandClassifier;
use gamedetect_service::{DirCorpus, Service};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
pub mod logging;

use config::AppConfig;

#[derive(Parser)]
#[command(name = "gamedetect")]
#[command(about = "Video game screenshot classifier")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Deployment environment (e.g. dev, production)
    #[arg(long, value_name = "ENV")]
    env: Option<String>,

    /// Canonical domain for production redirects
    #[arg(long, value_name = "HOST")]
    domain: Option<String>,

    /// Serialized model graph
    #[arg(long, value_name = "FILE")]
    graph: Option<PathBuf>,

    /// Label list, one label per line
    #[arg(long, value_name = "FILE")]
    labels: Option<PathBuf>,

    /// Model runner executable
    #[arg(long, value_name = "PROGRAM")]
    runner: Option<PathBuf>,

    /// HTTP listen address (e.g., 0.0.0.0:8080)
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Static asset directory
    #[arg(long, value_name = "DIR")]
    static_dir: Option<PathBuf>,

    /// Self-test corpus directory
    #[arg(long, value_name = "DIR")]
    corpus_dir: Option<PathBuf>,

    /// Skip the startup self-test sweep
    #[arg(long)]
    no_self_test: bool,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP interface (default)
    Serve,

    /// Run the self-test sweep once and print the report
    SelfTest,

    /// Classify a single image file
    Classify {
        /// Path to the image
        image: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = logging::LogConfig::from_env();
    if let Err(e) = logging::init_logging(&log_config) {
        eprintln!("Warning: Failed to initialize structured logging: {}", e);
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive("gamedetect=info".parse()?))
            .try_init()
            .ok();
    }

    let mut cli = Cli::parse();
    let command = cli.command.take().unwrap_or(Commands::Serve);
    let config = load_config(cli)?;

    match command {
        Commands::Serve => serve(config).await,
        Commands::SelfTest => self_test(config).await,
        Commands::Classify { image } => classify(config, image).await,
    }
}

/// File, then environment, then command line
fn load_config(cli: Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config {}: {}", path.display(), e))?,
        None => AppConfig::default(),
    };

    config.apply_env()?;

    if let Some(env) = cli.env {
        config.service.environment = env;
    }
    if let Some(domain) = cli.domain {
        config.service.domain = domain;
    }
    if let Some(graph) = cli.graph {
        config.model.graph_path = graph;
    }
    if let Some(labels) = cli.labels {
        config.model.labels_path = labels;
    }
    if let Some(runner) = cli.runner {
        config.model.runner = runner;
    }
    if let Some(listen) = cli.listen {
        config.http.listen_addr = listen
            .parse::<SocketAddr>()
            .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;
    }
    if let Some(static_dir) = cli.static_dir {
        config.http.static_dir = static_dir;
    }
    if let Some(corpus_dir) = cli.corpus_dir {
        config.self_test.corpus_dir = corpus_dir;
    }
    if cli.no_self_test {
        config.self_test.enabled = false;
    }

    config.validate().map_err(|e| anyhow::anyhow!(e))?;
    Ok(config)
}

fn open_service(config: &AppConfig) -> Result<Arc<Service>> {
    let runner = config.runner();
    let service = Service::new(config.service_settings(), &config.artifacts(), |artifacts| {
        CommandClassifier::open(runner, artifacts.clone())
    })?;
    Ok(Arc::new(service))
}

async fn serve(config: AppConfig) -> Result<()> {
    let service = open_service(&config)?;
    let server = ApiServer::new(service.clone(), config.api_config());

    let served = server
        .start_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await;

    if let Err(e) = service.close().await {
        warn!("Error releasing inference resource: {}", e);
    }

    served
}

async fn self_test(config: AppConfig) -> Result<()> {
    let service = open_service(&config)?;
    let corpus = DirCorpus::new(&config.self_test.corpus_dir);

    let outcome = service.run_self_test(&corpus).await;
    service.close().await?;

    let report = outcome?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.summary.all_passed() {
        anyhow::bail!(
            "self-test failed: {}/{} passed",
            report.summary.passed,
            report.summary.total
        );
    }
    Ok(())
}

async fn classify(config: AppConfig, image: PathBuf) -> Result<()> {
    let bytes = tokio::fs::read(&image)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", image.display(), e))?;

    let service = open_service(&config)?;
    let outcome = service.classify(bytes).await;
    service.close().await?;

    let prediction = outcome?;
    println!(
        "{}",
        serde_json::json!({
            "image": image.display().to_string(),
            "label": prediction.label,
            "confidence": prediction.confidence,
        })
    );
    Ok(())
}

//! Debate Arena - live AI debate server
//!
//! Serves the debate over REST and WebSocket while the personas argue.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use debatearena_core::{ArenaConfig, DebateOrchestrator, FallbackChain, TopicSource, default_config};
use debatearena_server::{AppState, router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "debatearena",
    version,
    about = "Live AI debate arena",
    long_about = "Runs a live debate between AI personas and streams it to viewers over WebSocket."
)]
struct Cli {
    /// TOML config file (defaults to the built-in configuration)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0", value_name = "HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3001", value_name = "PORT")]
    port: u16,

    /// Start the debate as soon as the server is up
    #[arg(long)]
    autostart: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,debatearena_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &cli.config {
        Some(path) => ArenaConfig::load(path)?,
        None => default_config()?,
    };

    let chain = FallbackChain::from_config(&config);
    if chain.provider_names().is_empty() {
        eprintln!(
            "{}",
            "Warning: no text provider is available. Personas will use canned lines.".yellow()
        );
    }
    let topics = TopicSource::from_config(&config.topics)?;

    print_banner(&config, &chain);

    let orchestrator = DebateOrchestrator::new(config, chain, topics);
    if cli.autostart {
        orchestrator.start().await;
    }

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Debate arena listening");
    println!(
        "{} {}",
        "Viewers connect at".bold(),
        format!("ws://{addr}/ws").bright_white()
    );
    println!();

    let app = router(AppState::new(orchestrator.clone()));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    orchestrator.stop().await;
    Ok(())
}

fn print_banner(config: &ArenaConfig, chain: &FallbackChain) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", format!("  {}", "Debate Arena".bold()).bright_blue().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{}", "Personas:".bold());
    for (i, p) in config.personas.iter().enumerate() {
        println!("  {}. {} ({})", i + 1, p.name.bright_cyan(), p.role.yellow());
    }
    println!();
    println!("{}", "Providers:".bold());
    let names = chain.provider_names();
    if names.is_empty() {
        println!("  {}", "none (canned lines only)".dimmed());
    }
    for name in names {
        println!("  - {}", name.dimmed());
    }
    println!();
    println!(
        "{} {} curated, {} live feed(s)",
        "Topics:".bold(),
        config.topics.curated.len(),
        config.topics.feeds.len()
    );
    println!("{}", "─".repeat(70).dimmed());
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

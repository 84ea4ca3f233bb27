//! CostRoute server binary

use anyhow::Context;
use clap::{Parser, Subcommand};
use costroute_observability::{HealthState, health_router};
use costroute_server::{AppState, RouterReadiness, ServerConfig, Services, api_router};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "costroute-server")]
#[command(version, about = "Cost-aware LLM routing gateway", long_about = None)]
struct Cli {
    /// Path to the providers config file (YAML or TOML)
    #[arg(
        short,
        long,
        env = "COSTROUTE_CONFIG",
        default_value = "providers.yaml",
        global = true
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Load and validate the config, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ServerConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    // Environment variables override the config file
    config.merge_env();

    init_tracing(&config.logging.level, config.logging.json)?;

    config.validate()?;
    config.resolve_env_vars()?;

    match cli.command {
        Some(Commands::CheckConfig) => check_config(&config),
        Some(Commands::Serve) | None => serve(config).await,
    }
}

fn init_tracing(level: &str, json: bool) -> anyhow::Result<()> {
    // RUST_LOG takes precedence over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to initialise tracing: {e}"))
}

fn check_config(config: &ServerConfig) -> anyhow::Result<()> {
    costroute_server::build_connectors(&config.providers)?;
    costroute_routing::ProviderRegistry::load(&config.descriptors())?;

    println!("Configuration OK: {} provider(s)", config.providers.len());
    for provider in &config.providers {
        println!(
            "  - {} ({:?}, model {}) at {:.4}/1k tokens",
            provider.name(),
            provider.provider_type,
            provider.model,
            provider.descriptor.cost_per_1k_tokens.unwrap_or_default()
        );
    }
    Ok(())
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let services = Services::from_config(&config).await?;

    let readiness = Arc::new(RouterReadiness::new(services.router.clone()));
    let health_state = HealthState::with_readiness_checker(services.metrics.clone(), readiness);

    let app = api_router(AppState::new(services.clone())).merge(health_router(health_state));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(
        providers = services.router.registry().len(),
        "CostRoute listening on http://{}",
        addr
    );
    info!("   - Generate:           POST http://{}/generate", addr);
    info!("   - Usage stats:        GET  http://{}/stats", addr);
    info!("   - Provider health:    GET  http://{}/providers", addr);
    info!("   - Readiness check:    GET  http://{}/readyz", addr);
    info!("   - Prometheus metrics: GET  http://{}/metrics", addr);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    services.shutdown().await;
    result.context("server error")?;

    info!("Server stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

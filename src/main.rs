//! Main entry point for the matchbot service
//!
//! Loads configuration and queue definitions, then keeps a lobby session
//! alive until SIGINT or SIGTERM and shuts down gracefully.

use anyhow::Result;
use clap::Parser;
use matchbot::config::{load_queue_definitions, validate_config, AppConfig};
use matchbot::launcher::DedicatedServerLauncher;
use matchbot::types::QueueDefinition;
use matchbot::Matchbot;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Matchbot - matchmaking queues for SpringRTS lobby servers
#[derive(Parser)]
#[command(
    name = "matchbot",
    version,
    about = "A matchmaking bot for SpringRTS lobby servers",
    long_about = "Matchbot logs in to a SpringRTS lobby server, hosts matchmaking queues whose \
                 matching rules are Lua scripts, runs ready checks for every formed match and \
                 starts a dedicated game server once all players are ready."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// Lobby server override
    #[arg(long, value_name = "HOST:PORT", help = "Override lobby server address")]
    server: Option<String>,

    /// Lobby account overrides
    #[arg(long, value_name = "NAME", help = "Override lobby username")]
    username: Option<String>,

    #[arg(long, value_name = "PASSWORD", help = "Override lobby password")]
    password: Option<String>,

    /// Queue definitions override
    #[arg(long, value_name = "FILE", help = "Override queue definitions file (JSON)")]
    queues: Option<PathBuf>,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and queue definitions, then exit"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig, definitions: &[QueueDefinition]) {
    info!("Matchbot v{}", matchbot::VERSION);
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Lobby: {} as {}", config.lobby.server, config.lobby.username);
    info!(
        "   Queues: {}",
        definitions
            .iter()
            .map(|d| d.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!("   Scripts: {}", config.matching.scripts_dir.display());
    info!("   Ready check: {}s", config.ready_check.timeout_seconds);
    info!("   Game server: {}", config.launcher.binary);
}

/// Load and merge configuration from environment, file and CLI arguments
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    // Apply CLI overrides
    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(server) = &args.server {
        config.lobby.server = server.clone();
    }

    if let Some(username) = &args.username {
        config.lobby.username = username.clone();
    }

    if let Some(password) = &args.password {
        config.lobby.password = password.clone();
    }

    if let Some(queues) = &args.queues {
        config.matching.queues_file = queues.clone();
    }

    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let definitions = match load_queue_definitions(&config.matching.queues_file) {
        Ok(definitions) => definitions,
        Err(e) => {
            error!("Failed to load queue definitions: {}", e);
            std::process::exit(1);
        }
    };

    display_startup_banner(&config, &definitions);

    if args.dry_run {
        info!("Dry run completed - exiting without connecting");
        return Ok(());
    }

    let launcher = Arc::new(DedicatedServerLauncher::new(config.launcher.clone()));
    let bot = Arc::new(Matchbot::new(config.clone(), definitions, launcher));

    let runner = {
        let bot = bot.clone();
        tokio::spawn(async move { bot.run().await })
    };

    info!("Press Ctrl+C to shutdown gracefully...");
    wait_for_shutdown_signal().await;

    info!("Shutdown signal received, beginning graceful shutdown...");
    let shutdown_timeout = config.shutdown_timeout();

    match tokio::time::timeout(shutdown_timeout, bot.shutdown()).await {
        Ok(Ok(())) => info!("Lobby session closed"),
        Ok(Err(e)) => warn!("Error while closing lobby session: {}", e),
        Err(_) => warn!("Shutdown timeout exceeded, forcing exit"),
    }

    match tokio::time::timeout(shutdown_timeout, runner).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!("Matchbot stopped with error: {}", e),
        Ok(Err(e)) => warn!("Matchbot task failed: {}", e),
        Err(_) => warn!("Matchbot did not stop in time"),
    }

    info!("Matchbot stopped");
    Ok(())
}

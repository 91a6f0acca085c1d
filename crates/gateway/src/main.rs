//! ShellBridge Gateway
//!
//! WebSocket to SSH bridge for browser terminals.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use gateway::config::{default_config_path, Config};
use gateway::{AppState, GatewayServer, HealthResponse, RusshConnector, SessionOptions, SessionRegistry};
use tokio_util::sync::CancellationToken;

/// ShellBridge Gateway - WebSocket to SSH bridge for browser terminals.
#[derive(Parser, Debug)]
#[command(name = "shellbridge-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the gateway
    Serve {
        /// Listen address, overriding the configuration (e.g. 127.0.0.1:3001)
        #[arg(long, short, value_name = "ADDR")]
        listen: Option<String>,
    },

    /// Query the health endpoint of a running gateway
    Status {
        /// Base URL of the gateway (defaults to the configured listen address)
        #[arg(long, short)]
        url: Option<String>,
    },

    /// Inspect or create the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    if let Commands::Config(ConfigCommands::Init { force }) = &cli.command {
        return init_config(&config_path, *force);
    }

    let mut config = if let Some(path) = &cli.config {
        Config::load(path)?
    } else {
        Config::load_default()?
    };
    config.apply_env_overrides();
    if let Commands::Serve {
        listen: Some(listen),
    } = &cli.command
    {
        config.server.listen = listen.clone();
    }
    config.validate()?;

    let _log_guard = gateway::logging::init(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Serve { .. } => serve(config).await,
        Commands::Status { url } => {
            let url = url.unwrap_or_else(|| status_url(&config.server.listen));
            match query_health(&url).await {
                Ok(health) => {
                    println!("Gateway Status: {}", health.status);
                    println!("  Sessions:  {}", health.active_sessions);
                    println!("  Timestamp: {}", health.timestamp);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("Gateway is not reachable at {}: {:#}", url, e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Config(ConfigCommands::Show) => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Config(ConfigCommands::Init { .. }) => Ok(()),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = config.listen_addr()?;
    let registry = SessionRegistry::new(
        RusshConnector::new(&config.ssh),
        SessionOptions::from_config(&config.ssh),
    );
    let shutdown = CancellationToken::new();
    let state = AppState {
        registry: Arc::new(registry),
        default_port: config.ssh.default_port,
        shutdown: shutdown.clone(),
    };

    let server = GatewayServer::bind(addr, state).await?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "ShellBridge gateway starting"
    );

    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            tracing::error!("Signal handling failed: {:#}", e);
        }
        shutdown.cancel();
    });

    server.run().await
}

fn init_config(path: &std::path::Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Health URL for a listen address, mapping wildcard hosts to loopback.
fn status_url(listen: &str) -> String {
    let (host, port) = listen.rsplit_once(':').unwrap_or((listen, "3001"));
    let host = match host {
        "0.0.0.0" | "" => "127.0.0.1",
        "[::]" => "[::1]",
        other => other,
    };
    format!("http://{}:{}", host, port)
}

async fn query_health(base_url: &str) -> anyhow::Result<HealthResponse> {
    let url = format!("{}/health", base_url.trim_end_matches('/'));
    let health = reqwest::Client::new()
        .get(&url)
        .timeout(std::time::Duration::from_secs(5))
        .send()
        .await
        .with_context(|| format!("Request to {} failed", url))?
        .error_for_status()?
        .json::<HealthResponse>()
        .await
        .context("Malformed health response")?;
    Ok(health)
}

/// Wait for SIGTERM or SIGINT.
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

//! govledgerd - governance event ledger service
//!
//! Serves the append-only governance ledger over HTTP:
//! - event append and query
//! - staleness marking and resolution
//! - approvals, exceptions and decisions

use anyhow::Context;
use clap::{Parser, ValueEnum};
use govledger_service::config::{ServiceConfig, StorageConfig};
use govledger_service::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StorageMode {
    /// Postgres when a database URL is given, otherwise the configured backend
    Auto,
    Memory,
    Postgres,
}

/// govledgerd CLI
#[derive(Parser)]
#[command(name = "govledgerd")]
#[command(about = "Governance event ledger service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "GOVLEDGER_CONFIG")]
    config: Option<String>,

    /// Listen address (overrides the config file)
    #[arg(short, long, env = "GOVLEDGER_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level
    #[arg(long, env = "GOVLEDGER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "GOVLEDGER_LOG_JSON")]
    json: bool,

    /// Storage backend
    #[arg(long, value_enum, env = "GOVLEDGER_STORAGE", default_value = "auto")]
    storage: StorageMode,

    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// PostgreSQL pool size
    #[arg(long, env = "GOVLEDGER_PG_MAX_CONNECTIONS", default_value_t = 5)]
    pg_max_connections: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        ServiceConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .with_context(|| format!("invalid listen address '{}'", listen))?;
    }

    config.storage = resolve_storage(
        cli.storage,
        cli.database_url,
        cli.pg_max_connections,
        config.storage,
    )?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen_addr,
        "starting govledgerd"
    );

    let server = Server::new(config).await?;
    server.run().await?;
    Ok(())
}

fn resolve_storage(
    mode: StorageMode,
    database_url: Option<String>,
    max_connections: u32,
    configured: StorageConfig,
) -> anyhow::Result<StorageConfig> {
    match (mode, database_url) {
        (StorageMode::Memory, _) => Ok(StorageConfig::Memory),
        (StorageMode::Postgres, Some(url)) | (StorageMode::Auto, Some(url)) => {
            Ok(StorageConfig::Postgres {
                url,
                max_connections,
            })
        }
        (StorageMode::Postgres, None) => match configured {
            StorageConfig::Postgres { .. } => Ok(configured),
            StorageConfig::Memory => {
                anyhow::bail!("--storage postgres requires --database-url or DATABASE_URL")
            }
        },
        (StorageMode::Auto, None) => Ok(configured),
    }
}

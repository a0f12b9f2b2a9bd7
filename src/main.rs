mod config;
mod connection;
mod discovery;
#[cfg(test)]
mod fake_store;
mod mcp;
mod mongo;
mod pool;
mod resolver;
mod tools;

use anyhow::Result;
use clap::Parser;
use std::future::Future;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mongo::MongoConnector;
use pool::ConnectionPool;

/// A Model Context Protocol (MCP) server for administering `MongoDB` clusters.
///
/// This server lets LLMs manage a pool of named MongoDB connections and
/// explore the databases, collections and documents behind them.
/// It communicates via JSON-RPC 2.0 over stdin/stdout.
#[derive(Parser)]
#[command(name = "mongodb-admin-mcp-rs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "MCP server for MongoDB cluster administration", long_about = None)]
struct Cli {}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments (handles --version and --help automatically)
    let _cli = Cli::parse();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mongodb_admin_mcp_rs=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = config::Config::load()?;
    tracing::info!(
        "Configuration loaded from {:?}",
        config::Config::config_file()?
    );

    config.apply_env_bootstrap();

    // Validate no duplicate connection names
    config.validate_unique_names()?;

    tracing::info!("Configured connections: {}", config.connections.len());

    let pool = Arc::new(ConnectionPool::new(Box::new(MongoConnector)));

    let dropped = pool.bootstrap(&config.connections).await;
    if !dropped.is_empty() {
        tracing::warn!(
            "Dropped {} connection(s) that failed to connect: {}",
            dropped.len(),
            dropped.join(", ")
        );
    }
    tracing::info!("Active connections: {}", pool.names().await.len());

    let mcp_server = mcp::McpServer::new(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        pool.clone(),
    );
    run_then_shutdown(&pool, mcp_server.run()).await
}

/// Runs the server future to completion, then closes every pooled
/// connection before the result is propagated. An error exit must not
/// leak live handles.
async fn run_then_shutdown(
    pool: &ConnectionPool,
    server: impl Future<Output = Result<()>>,
) -> Result<()> {
    let served = server.await;
    pool.shutdown().await;
    served
}

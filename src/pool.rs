//! Named connection pool.
//!
//! The pool is the single process-wide authority over live MongoDB handles:
//! connections are added and removed by name, every traversal borrows its
//! handle from here, and shutdown closes whatever is left. Establishing a
//! connection happens outside the pool lock so concurrent adds for different
//! names do not serialize on the network; handle closes happen under the
//! write guard so a racing `get` never observes a handle mid-shutdown.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionOptions, DataStore};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid connection string: {0}")]
    InvalidUri(String),
    #[error("failed to connect: {0}")]
    Connect(String),
}

/// Establishes live backend handles from a connection string.
/// The driver-backed implementation lives in `mongo.rs`; tests substitute
/// a scripted fake.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        connection_string: &str,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn DataStore>, PoolError>;
}

/// Pool of named live connections.
pub struct ConnectionPool {
    connector: Box<dyn Connector>,
    entries: RwLock<HashMap<String, Connection>>,
}

impl ConnectionPool {
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self {
            connector,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Connect and store an entry under `name`.
    ///
    /// The new connection is established first; only on success is any
    /// existing entry for `name` closed and replaced. A failure leaves the
    /// pool exactly as it was, so a bad re-add never destroys a working
    /// connection.
    pub async fn add(
        &self,
        name: &str,
        connection_string: &str,
        options: &ConnectionOptions,
    ) -> Result<(), PoolError> {
        let store = self.connector.connect(connection_string, options).await?;

        let entry = Connection {
            name: name.to_string(),
            connection_string: connection_string.to_string(),
            options: options.clone(),
            store,
        };

        let mut entries = self.entries.write().await;
        if let Some(old) = entries.remove(name) {
            tracing::info!("Replacing connection '{}'", name);
            old.store.close().await;
        }
        entries.insert(name.to_string(), entry);
        tracing::info!("Connection '{}' added to pool", name);
        Ok(())
    }

    /// Close and delete the entry under `name`, if present. Idempotent.
    pub async fn remove(&self, name: &str) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.remove(name) {
            entry.store.close().await;
            tracing::info!("Connection '{}' removed from pool", name);
        }
    }

    /// Read access to one entry. The clone shares the pooled handle.
    pub async fn get(&self, name: &str) -> Option<Connection> {
        self.entries.read().await.get(name).cloned()
    }

    /// Connection names, sorted case-insensitively.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.read().await.keys().cloned().collect();
        names.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()));
        names
    }

    /// Snapshot of every entry, sorted by name case-insensitively.
    pub async fn list(&self) -> Vec<Connection> {
        let mut connections: Vec<_> = self.entries.read().await.values().cloned().collect();
        connections.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        connections
    }

    /// Add every configured entry, dropping the ones whose first connect
    /// fails. Returns the dropped names so the caller can report which
    /// configured connections were not retained.
    pub async fn bootstrap(&self, configured: &[ConnectionConfig]) -> Vec<String> {
        let mut dropped = Vec::new();
        for conn in configured {
            match self
                .add(&conn.name, &conn.connection_string, &conn.connection_options)
                .await
            {
                Ok(()) => {}
                Err(err) => {
                    tracing::warn!(
                        "Dropping configured connection '{}': {}",
                        conn.name,
                        err
                    );
                    dropped.push(conn.name.clone());
                }
            }
        }
        dropped
    }

    /// Close every pooled handle. Used at process exit.
    pub async fn shutdown(&self) {
        let mut entries = self.entries.write().await;
        for (name, entry) in entries.drain() {
            entry.store.close().await;
            tracing::info!("Connection '{}' closed", name);
        }
    }
}

//! MongoDB backend abstraction.
//! Methods are called dynamically through dyn dispatch from the pool,
//! the discovery traversals and the identifier resolver.

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Connection option map as configured per connection (option name -> value).
/// Values are merged into the connection URI before parsing.
pub type ConnectionOptions = BTreeMap<String, serde_json::Value>;

/// Errors surfaced by a backend store.
///
/// Authorization failures get their own variant so callers can render
/// "not authorized" rather than "no data"; everything else is wrapped.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not authorized: {0}")]
    NotAuthorized(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// One `listDatabases` row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseSummary {
    pub name: String,
    /// Bytes on disk, when the server reports it.
    pub size_on_disk: Option<u64>,
    pub empty: bool,
}

/// Storage statistics for a single collection. Zeroed when the stats
/// fetch fails or times out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStats {
    pub name: String,
    pub storage_bytes: u64,
    pub document_count: u64,
}

impl CollectionStats {
    /// Placeholder for a collection whose stats could not be fetched.
    pub fn unavailable(name: String) -> Self {
        Self {
            name,
            storage_bytes: 0,
            document_count: 0,
        }
    }
}

/// Unified abstraction over a live MongoDB deployment.
/// The driver-backed implementation lives in `mongo.rs`; tests substitute
/// an in-memory fake.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Database pinned by the connection URI, if any.
    fn default_database(&self) -> Option<&str>;

    /// All databases visible to the connection's credential.
    async fn database_specs(&self) -> Result<Vec<DatabaseSummary>, StoreError>;

    /// Collection names within one database, unsorted.
    async fn collection_names(&self, database: &str) -> Result<Vec<String>, StoreError>;

    /// Storage statistics for one collection.
    async fn collection_stats(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<CollectionStats, StoreError>;

    /// Look up a single document by its typed `_id` value.
    async fn find_one_by_id(
        &self,
        database: &str,
        collection: &str,
        id: Bson,
    ) -> Result<Option<Document>, StoreError>;

    /// Unfiltered page of documents for collection browsing.
    async fn find_documents(
        &self,
        database: &str,
        collection: &str,
        skip: u64,
        limit: i64,
    ) -> Result<Vec<Document>, StoreError>;

    /// One `serverStatus` round trip.
    async fn server_status(&self) -> Result<Document, StoreError>;

    /// Tear down the underlying client. Close errors are swallowed.
    async fn close(&self);
}

/// One named pool entry: the operator-assigned name, the URI it was built
/// from, and the live handle. Cloning shares the underlying store; the
/// pool's map entry remains the ownership authority.
#[derive(Clone)]
pub struct Connection {
    pub name: String,
    pub connection_string: String,
    pub options: ConnectionOptions,
    pub store: Arc<dyn DataStore>,
}

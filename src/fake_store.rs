//! In-memory backend used by the pool, discovery and resolver unit tests.
//!
//! Scripts a topology of databases, collections, stats and documents, with
//! per-item failure injection and counters for asserting which backend
//! calls a traversal actually issued.

use anyhow::anyhow;
use async_trait::async_trait;
use mongodb::bson::{Bson, Document};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::connection::{
    CollectionStats, Connection, ConnectionOptions, DataStore, DatabaseSummary, StoreError,
};
use crate::pool::{Connector, PoolError};

enum StatsOutcome {
    Report,
    Fail,
    Hang(Duration),
}

struct FakeCollection {
    name: String,
    storage_bytes: u64,
    document_count: u64,
    stats: StatsOutcome,
    documents: Vec<Document>,
}

struct FakeDatabase {
    name: String,
    size_on_disk: Option<u64>,
    empty: bool,
    listable: bool,
    collections: Vec<FakeCollection>,
}

#[derive(Default)]
pub struct FakeStore {
    default_database: Option<String>,
    databases: Vec<FakeDatabase>,
    deny_database_listing: bool,
    stats_calls: AtomicUsize,
    lookups: AtomicUsize,
    closed: AtomicBool,
}

impl FakeStore {
    fn database_mut(&mut self, name: &str) -> &mut FakeDatabase {
        if let Some(idx) = self.databases.iter().position(|db| db.name == name) {
            return &mut self.databases[idx];
        }
        self.databases.push(FakeDatabase {
            name: name.to_string(),
            size_on_disk: Some(0),
            empty: false,
            listable: true,
            collections: Vec::new(),
        });
        self.databases.last_mut().unwrap()
    }

    fn collection_mut(&mut self, database: &str, name: &str) -> &mut FakeCollection {
        let db = self.database_mut(database);
        if let Some(idx) = db.collections.iter().position(|c| c.name == name) {
            return &mut db.collections[idx];
        }
        db.collections.push(FakeCollection {
            name: name.to_string(),
            storage_bytes: 0,
            document_count: 0,
            stats: StatsOutcome::Report,
            documents: Vec::new(),
        });
        db.collections.last_mut().unwrap()
    }

    pub fn with_default_database(mut self, name: &str) -> Self {
        self.default_database = Some(name.to_string());
        self
    }

    pub fn with_database(mut self, name: &str, size_on_disk: Option<u64>, empty: bool) -> Self {
        let db = self.database_mut(name);
        db.size_on_disk = size_on_disk;
        db.empty = empty;
        self
    }

    pub fn with_collection(
        mut self,
        database: &str,
        name: &str,
        storage_bytes: u64,
        document_count: u64,
    ) -> Self {
        let coll = self.collection_mut(database, name);
        coll.storage_bytes = storage_bytes;
        coll.document_count = document_count;
        self
    }

    /// The named collection's stats call fails (as a restricted grant would).
    pub fn with_failing_stats(mut self, database: &str, name: &str) -> Self {
        self.collection_mut(database, name).stats = StatsOutcome::Fail;
        self
    }

    /// The named collection's stats call hangs for `delay` before replying.
    pub fn with_hung_stats(mut self, database: &str, name: &str, delay: Duration) -> Self {
        self.collection_mut(database, name).stats = StatsOutcome::Hang(delay);
        self
    }

    /// The named database exists but refuses to list its collections.
    pub fn with_unlistable_database(mut self, name: &str) -> Self {
        self.database_mut(name).listable = false;
        self
    }

    /// Seed one document; its `_id` field is the lookup key.
    pub fn with_document(mut self, database: &str, collection: &str, doc: Document) -> Self {
        self.collection_mut(database, collection).documents.push(doc);
        self
    }

    /// The credential cannot run `listDatabases` at all.
    pub fn deny_database_listing(mut self) -> Self {
        self.deny_database_listing = true;
        self
    }

    pub fn stats_calls(&self) -> usize {
        self.stats_calls.load(Ordering::SeqCst)
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn into_connection(self) -> Connection {
        self.into_connection_with_handle().0
    }

    /// Like `into_connection`, also handing back the store for counter
    /// assertions.
    pub fn into_connection_with_handle(self) -> (Connection, Arc<FakeStore>) {
        let store = Arc::new(self);
        let conn = Connection {
            name: "test".to_string(),
            connection_string: "mongodb://fake".to_string(),
            options: BTreeMap::new(),
            store: store.clone(),
        };
        (conn, store)
    }
}

/// Numeric `_id` probes match across integer widths, as the server's query
/// comparison does.
fn key_matches(stored: &Bson, probe: &Bson) -> bool {
    if stored == probe {
        return true;
    }
    match (as_i64(stored), as_i64(probe)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        _ => None,
    }
}

#[async_trait]
impl DataStore for FakeStore {
    fn default_database(&self) -> Option<&str> {
        self.default_database.as_deref()
    }

    async fn database_specs(&self) -> Result<Vec<DatabaseSummary>, StoreError> {
        if self.deny_database_listing {
            return Err(StoreError::NotAuthorized(
                "not authorized on admin to execute command { listDatabases: 1 }".to_string(),
            ));
        }
        Ok(self
            .databases
            .iter()
            .map(|db| DatabaseSummary {
                name: db.name.clone(),
                size_on_disk: db.size_on_disk,
                empty: db.empty,
            })
            .collect())
    }

    async fn collection_names(&self, database: &str) -> Result<Vec<String>, StoreError> {
        match self.databases.iter().find(|db| db.name == database) {
            Some(db) if db.listable => {
                Ok(db.collections.iter().map(|c| c.name.clone()).collect())
            }
            Some(db) => Err(StoreError::Backend(anyhow!(
                "not authorized to list collections on '{}'",
                db.name
            ))),
            None => Ok(Vec::new()),
        }
    }

    async fn collection_stats(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<CollectionStats, StoreError> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        let coll = self
            .databases
            .iter()
            .find(|db| db.name == database)
            .and_then(|db| db.collections.iter().find(|c| c.name == collection))
            .ok_or_else(|| StoreError::Backend(anyhow!("ns not found")))?;

        match coll.stats {
            StatsOutcome::Report => {}
            StatsOutcome::Fail => {
                return Err(StoreError::Backend(anyhow!(
                    "not authorized on '{}' to execute collStats",
                    database
                )));
            }
            StatsOutcome::Hang(delay) => tokio::time::sleep(delay).await,
        }

        Ok(CollectionStats {
            name: coll.name.clone(),
            storage_bytes: coll.storage_bytes,
            document_count: coll.document_count,
        })
    }

    async fn find_one_by_id(
        &self,
        database: &str,
        collection: &str,
        id: Bson,
    ) -> Result<Option<Document>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let found = self
            .databases
            .iter()
            .find(|db| db.name == database)
            .and_then(|db| db.collections.iter().find(|c| c.name == collection))
            .and_then(|coll| {
                coll.documents
                    .iter()
                    .find(|doc| doc.get("_id").is_some_and(|stored| key_matches(stored, &id)))
            });
        Ok(found.cloned())
    }

    async fn find_documents(
        &self,
        database: &str,
        collection: &str,
        skip: u64,
        limit: i64,
    ) -> Result<Vec<Document>, StoreError> {
        let docs = self
            .databases
            .iter()
            .find(|db| db.name == database)
            .and_then(|db| db.collections.iter().find(|c| c.name == collection))
            .map(|coll| {
                coll.documents
                    .iter()
                    .skip(skip as usize)
                    .take(limit.max(0) as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(docs)
    }

    async fn server_status(&self) -> Result<Document, StoreError> {
        Ok(mongodb::bson::doc! { "ok": 1, "uptime": 1234, "version": "7.0.0" })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Scripted connector: connection strings can be mapped to prepared stores
/// or told to refuse; anything without a mongodb scheme is rejected as an
/// invalid URI, mirroring the driver's parse step.
#[derive(Default)]
pub struct FakeConnector {
    stores: Mutex<HashMap<String, Arc<FakeStore>>>,
    refused: Mutex<HashSet<String>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out `store` for `connection_string`, returning the shared handle
    /// for later assertions.
    pub fn provide(&self, connection_string: &str, store: FakeStore) -> Arc<FakeStore> {
        let store = Arc::new(store);
        self.stores
            .lock()
            .unwrap()
            .insert(connection_string.to_string(), store.clone());
        store
    }

    /// Refuse connect attempts for `connection_string`.
    pub fn refuse(&self, connection_string: &str) {
        self.refused
            .lock()
            .unwrap()
            .insert(connection_string.to_string());
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        connection_string: &str,
        _options: &ConnectionOptions,
    ) -> Result<Arc<dyn DataStore>, PoolError> {
        if !connection_string.starts_with("mongodb") {
            return Err(PoolError::InvalidUri(format!(
                "unsupported scheme in '{connection_string}'"
            )));
        }
        if self.refused.lock().unwrap().contains(connection_string) {
            return Err(PoolError::Connect("connection refused".to_string()));
        }
        let store = self
            .stores
            .lock()
            .unwrap()
            .get(connection_string)
            .cloned()
            .unwrap_or_default();
        Ok(store)
    }
}

//! Metadata discovery traversals.
//!
//! Everything here walks databases -> collections -> per-collection storage
//! statistics against one borrowed pool handle. Collection-level stats calls
//! are the dominant latency cost (one round trip each), so both levels fan
//! out concurrently and join before aggregating; completion order is
//! irrelevant because every result is re-sorted before it is returned.
//! Per-item failures are absorbed: a restricted collection reports zeros and
//! a database whose collection listing fails is logged and omitted, so one
//! bad grant never blanks out its siblings.

use futures::{StreamExt, stream};
use mongodb::bson::Document;
use serde::Serialize;
use std::time::Duration;

use crate::connection::{CollectionStats, Connection, DataStore, DatabaseSummary, StoreError};

/// Database names never traversed. Some deployments surface a database
/// literally named "null"; the entry is a plain string compare against
/// that name, not a null check.
pub const SKIPPED_DATABASES: [&str; 3] = ["null", "admin", "local"];

/// Upper bound on in-flight sub-traversals at each fan-out level.
const FANOUT_LIMIT: usize = 8;

/// Budget for a single collection stats call; exceeding it counts as
/// "stats unavailable" and the collection reports zeros.
pub const STATS_TIMEOUT: Duration = Duration::from_secs(5);

/// Aggregated statistics for one database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseStats {
    pub name: String,
    pub collections: Vec<CollectionStats>,
}

/// One database with its collection names, for navigation rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SidebarEntry {
    pub database: String,
    pub collections: Vec<String>,
}

fn is_skipped(name: &str) -> bool {
    SKIPPED_DATABASES.contains(&name)
}

fn sort_names(names: &mut [String]) {
    names.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()));
}

/// Storage statistics for every collection in every visible database.
///
/// A failure to list databases is a hard error (authorization surfaces
/// distinctly); everything below that degrades per item.
pub async fn cluster_stats(conn: &Connection) -> Result<Vec<DatabaseStats>, StoreError> {
    let store = conn.store.as_ref();
    let specs = store.database_specs().await?;

    let names: Vec<String> = specs
        .into_iter()
        .map(|spec| spec.name)
        .filter(|name| !is_skipped(name))
        .collect();

    let mut databases: Vec<DatabaseStats> = stream::iter(names)
        .map(|name| async move {
            match collection_stats_in(store, &name).await {
                Ok(collections) => Some(DatabaseStats { name, collections }),
                Err(err) => {
                    tracing::warn!(
                        "Skipping database '{}': failed to list collections: {}",
                        name,
                        err
                    );
                    None
                }
            }
        })
        .buffer_unordered(FANOUT_LIMIT)
        .filter_map(|db| async move { db })
        .collect()
        .await;

    databases.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    Ok(databases)
}

/// Storage statistics for every collection in one database.
pub async fn database_stats(
    conn: &Connection,
    database: &str,
) -> Result<Vec<CollectionStats>, StoreError> {
    collection_stats_in(conn.store.as_ref(), database).await
}

async fn collection_stats_in(
    store: &dyn DataStore,
    database: &str,
) -> Result<Vec<CollectionStats>, StoreError> {
    let names = store.collection_names(database).await?;

    let mut collections: Vec<CollectionStats> = stream::iter(names)
        .map(|coll| async move {
            match tokio::time::timeout(STATS_TIMEOUT, store.collection_stats(database, &coll))
                .await
            {
                Ok(Ok(stats)) => stats,
                Ok(Err(err)) => {
                    tracing::warn!("Stats unavailable for '{}.{}': {}", database, coll, err);
                    CollectionStats::unavailable(coll)
                }
                Err(_) => {
                    tracing::warn!(
                        "Stats timed out for '{}.{}' after {:?}",
                        database,
                        coll,
                        STATS_TIMEOUT
                    );
                    CollectionStats::unavailable(coll)
                }
            }
        })
        .buffer_unordered(FANOUT_LIMIT)
        .collect()
        .await;

    collections.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    Ok(collections)
}

/// Database -> collection names tree, without the stats round trips.
///
/// With `database` set, only that database is listed; otherwise every
/// non-skipped database visible to the credential. A connection whose URI
/// pins a default database gets a tree of just that database, without a
/// `listDatabases` round trip its credential may not be allowed to make.
pub async fn sidebar_tree(
    conn: &Connection,
    database: Option<&str>,
) -> Result<Vec<SidebarEntry>, StoreError> {
    let store = conn.store.as_ref();

    if let Some(name) = database {
        let mut collections = store.collection_names(name).await?;
        sort_names(&mut collections);
        return Ok(vec![SidebarEntry {
            database: name.to_string(),
            collections,
        }]);
    }

    let names = match database_names(conn).await? {
        Some(names) => names,
        None => conn
            .store
            .default_database()
            .map(String::from)
            .into_iter()
            .collect(),
    };

    let mut entries: Vec<SidebarEntry> = stream::iter(names)
        .map(|name| async move {
            match store.collection_names(&name).await {
                Ok(mut collections) => {
                    sort_names(&mut collections);
                    Some(SidebarEntry {
                        database: name,
                        collections,
                    })
                }
                Err(err) => {
                    tracing::warn!(
                        "Skipping database '{}': failed to list collections: {}",
                        name,
                        err
                    );
                    None
                }
            }
        })
        .buffer_unordered(FANOUT_LIMIT)
        .filter_map(|entry| async move { entry })
        .collect()
        .await;

    entries.sort_by(|a, b| a.database.to_lowercase().cmp(&b.database.to_lowercase()));
    Ok(entries)
}

/// Names of the databases a caller could target.
///
/// `Ok(None)` means the connection URI pins a default database and the
/// caller already knows its single target.
pub async fn database_names(conn: &Connection) -> Result<Option<Vec<String>>, StoreError> {
    if conn.store.default_database().is_some() {
        return Ok(None);
    }

    let specs = conn.store.database_specs().await?;
    let mut names: Vec<String> = specs
        .into_iter()
        .map(|spec| spec.name)
        .filter(|name| !is_skipped(name))
        .collect();
    sort_names(&mut names);
    Ok(Some(names))
}

/// Filtered, sorted `listDatabases` rows (name, size on disk, empty flag).
pub async fn list_databases(conn: &Connection) -> Result<Vec<DatabaseSummary>, StoreError> {
    let mut specs = conn.store.database_specs().await?;
    specs.retain(|spec| !is_skipped(&spec.name));
    specs.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    Ok(specs)
}

/// One `serverStatus` round trip for the connection's deployment.
pub async fn server_status(conn: &Connection) -> Result<Document, StoreError> {
    conn.store.server_status().await
}

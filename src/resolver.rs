//! Document identifier resolution.
//!
//! The `_id` used for document viewing arrives as a raw string, and nothing
//! says how the collection actually stores it: a 24-hex-char value is
//! probably an ObjectId but may just as well be stored as a plain string,
//! and numeric text may be an integer key. The resolver probes the
//! candidate types against the collection in a fixed precedence order
//! (ObjectId, then integer, then string) and short-circuits on the first
//! hit. Best effort by nature; never cached.

use mongodb::bson::{Bson, Document, oid::ObjectId};
use serde::Serialize;
use thiserror::Error;

use crate::connection::{Connection, StoreError};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("document not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Which native key type a raw identifier resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IdType {
    ObjectId,
    Integer,
    String,
    None,
}

/// Outcome of a resolution: the raw input, the key type that matched, the
/// typed key itself (for follow-up queries against the same document) and
/// the document.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedId {
    pub raw: String,
    pub id_type: IdType,
    pub key: Option<Bson>,
    pub document: Option<Document>,
}

impl ResolvedId {
    /// The empty-identifier outcome: nothing to look up, distinct from
    /// "looked and found nothing".
    fn absent() -> Self {
        Self {
            raw: String::new(),
            id_type: IdType::None,
            key: None,
            document: None,
        }
    }
}

/// Typed probe candidates for a raw identifier, in precedence order.
///
/// The integer candidate only appears when the whole string parses as an
/// integer; the string candidate is always the last resort.
fn candidate_keys(raw: &str) -> Vec<(IdType, Bson)> {
    let mut candidates = Vec::new();

    if let Ok(oid) = ObjectId::parse_str(raw) {
        candidates.push((IdType::ObjectId, Bson::ObjectId(oid)));
    }
    if let Ok(n) = raw.parse::<i64>() {
        candidates.push((IdType::Integer, Bson::Int64(n)));
    }
    candidates.push((IdType::String, Bson::String(raw.to_string())));

    candidates
}

/// Resolve `raw` against `database.collection`, probing candidate key types
/// in precedence order and returning the first document that matches.
///
/// An empty `raw` short-circuits without touching the backend.
pub async fn resolve(
    conn: &Connection,
    database: &str,
    collection: &str,
    raw: &str,
) -> Result<ResolvedId, ResolveError> {
    if raw.is_empty() {
        return Ok(ResolvedId::absent());
    }

    for (id_type, key) in candidate_keys(raw) {
        if let Some(document) = conn
            .store
            .find_one_by_id(database, collection, key.clone())
            .await?
        {
            tracing::debug!(
                "Resolved id '{}' in '{}.{}' as {:?}",
                raw,
                database,
                collection,
                id_type
            );
            return Ok(ResolvedId {
                raw: raw.to_string(),
                id_type,
                key: Some(key),
                document: Some(document),
            });
        }
    }

    Err(ResolveError::NotFound)
}

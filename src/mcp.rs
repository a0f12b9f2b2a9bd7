//! MCP server implementation with tool handlers.

use anyhow::Result;
use mongodb::bson::{Bson, Document};
use rmcp::{
    ServerHandler,
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use std::sync::Arc;

use crate::connection::{Connection, StoreError};
use crate::discovery;
use crate::mongo::redact;
use crate::pool::{ConnectionPool, PoolError};
use crate::resolver::{self, ResolveError};
use crate::tools::*;

/// Default page size for collection browsing.
const DEFAULT_PAGE_SIZE: i64 = 25;

/// Hard cap on documents per page.
const MAX_PAGE_SIZE: i64 = 200;

/// Format anyhow error with full cause chain
fn format_error(e: &anyhow::Error) -> String {
    let mut msg = e.to_string();
    for cause in e.chain().skip(1) {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
    }
    msg
}

fn store_error(err: StoreError) -> rmcp::ErrorData {
    match err {
        StoreError::NotAuthorized(message) => {
            rmcp::ErrorData::invalid_params(format!("Not authorized: {message}"), None)
        }
        StoreError::Backend(err) => rmcp::ErrorData::internal_error(format_error(&err), None),
    }
}

/// Normalize the requested page window: 1-based page, clamped page size,
/// and the resulting skip offset.
fn page_window(page: Option<u64>, limit: Option<i64>) -> (u64, u64, i64) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let skip = (page - 1).saturating_mul(limit as u64);
    (page, skip, limit)
}

/// Render a BSON document as relaxed Extended JSON, so ObjectIds keep
/// their `$oid` shape while plain numbers stay plain.
fn document_json(document: Document) -> serde_json::Value {
    Bson::from(document).into_relaxed_extjson()
}

pub struct McpServer {
    name: String,
    version: String,
    pool: Arc<ConnectionPool>,
    tool_router: ToolRouter<Self>,
}

impl McpServer {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        pool: Arc<ConnectionPool>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            pool,
            tool_router: Self::tool_router(),
        }
    }

    pub async fn run(self) -> Result<()> {
        use rmcp::ServiceExt;

        tracing::info!("MCP server starting: {} v{}", self.name, self.version);

        let transport = rmcp::transport::stdio();
        let server = self.serve(transport).await?;
        server.waiting().await?;

        tracing::info!("MCP server shutting down");
        Ok(())
    }

    async fn connection_not_found(&self, name: &str) -> rmcp::ErrorData {
        let available = self.pool.names().await.join(", ");
        rmcp::ErrorData::invalid_params(
            format!("Connection '{name}' not found. Available: {available}"),
            None,
        )
    }

    async fn require_connection(&self, name: &str) -> Result<Connection, rmcp::ErrorData> {
        match self.pool.get(name).await {
            Some(connection) => Ok(connection),
            None => Err(self.connection_not_found(name).await),
        }
    }
}

#[tool_router]
impl McpServer {
    /// Lists all registered MongoDB connections.
    ///
    /// Use this first to discover connection names before any other tool.
    /// Connection strings are shown with credentials stripped.
    #[tool]
    async fn list_connections(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        let connections = self.pool.list().await;

        let response = serde_json::json!({
            "connections": connections.iter().map(|conn| {
                serde_json::json!({
                    "name": conn.name,
                    "connection_string": redact(&conn.connection_string),
                    "connection_options": conn.options,
                })
            }).collect::<Vec<_>>(),
            "count": connections.len()
        });

        Ok(CallToolResult::success(vec![Content::text(
            serde_json::to_string_pretty(&response).unwrap(),
        )]))
    }

    /// Registers a new MongoDB connection under a unique name.
    ///
    /// The connection string is validated and dialed before the entry is
    /// stored; a failing add never disturbs an existing connection under
    /// the same name. Re-using a name replaces the old connection once the
    /// new one is verified.
    #[tool]
    async fn add_connection(
        &self,
        Parameters(params): Parameters<AddConnectionParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let options = params.connection_options.unwrap_or_default();

        match self
            .pool
            .add(&params.name, &params.connection_string, &options)
            .await
        {
            Ok(()) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Connection '{}' added successfully",
                params.name
            ))])),
            Err(err @ PoolError::InvalidUri(_)) => {
                Err(rmcp::ErrorData::invalid_params(err.to_string(), None))
            }
            Err(err) => Err(rmcp::ErrorData::internal_error(err.to_string(), None)),
        }
    }

    /// Removes a registered connection and closes its client.
    #[tool]
    async fn remove_connection(
        &self,
        Parameters(params): Parameters<RemoveConnectionParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        if self.pool.get(&params.name).await.is_none() {
            return Err(self.connection_not_found(&params.name).await);
        }

        self.pool.remove(&params.name).await;

        Ok(CallToolResult::success(vec![Content::text(format!(
            "Connection '{}' removed successfully",
            params.name
        ))]))
    }

    /// Lists the databases visible on a connection.
    ///
    /// Returns name, on-disk size and the empty flag per database.
    /// Infrastructure databases (admin, local) are filtered out.
    #[tool]
    async fn list_databases(
        &self,
        Parameters(params): Parameters<ListDatabasesParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let connection = self.require_connection(&params.connection_name).await?;

        let databases = discovery::list_databases(&connection)
            .await
            .map_err(store_error)?;

        let response = serde_json::json!({
            "connection": params.connection_name,
            "databases": databases,
            "count": databases.len()
        });

        Ok(CallToolResult::success(vec![Content::text(
            serde_json::to_string_pretty(&response).unwrap(),
        )]))
    }

    /// Lists databases with their collection names, as a navigation tree.
    ///
    /// IMPORTANT: Database and collection names are CASE-SENSITIVE in
    /// MongoDB! Use the names returned here verbatim in other tools.
    /// Pass `database` to restrict the tree to a single database.
    #[tool]
    async fn database_tree(
        &self,
        Parameters(params): Parameters<DatabaseTreeParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let connection = self.require_connection(&params.connection_name).await?;

        let tree = discovery::sidebar_tree(&connection, params.database.as_deref())
            .await
            .map_err(store_error)?;

        let response = serde_json::json!({
            "connection": params.connection_name,
            "databases": tree,
            "count": tree.len()
        });

        Ok(CallToolResult::success(vec![Content::text(
            serde_json::to_string_pretty(&response).unwrap(),
        )]))
    }

    /// Collects storage statistics for every database on a connection.
    ///
    /// Walks all visible databases concurrently and reports size and
    /// document count per collection. Collections whose stats cannot be
    /// fetched in time report zeros; databases that cannot be listed are
    /// omitted.
    #[tool]
    async fn cluster_stats(
        &self,
        Parameters(params): Parameters<ClusterStatsParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let connection = self.require_connection(&params.connection_name).await?;

        let databases = discovery::cluster_stats(&connection)
            .await
            .map_err(store_error)?;

        let response = serde_json::json!({
            "connection": params.connection_name,
            "databases": databases,
            "count": databases.len()
        });

        Ok(CallToolResult::success(vec![Content::text(
            serde_json::to_string_pretty(&response).unwrap(),
        )]))
    }

    /// Collects storage statistics for the collections of one database.
    #[tool]
    async fn database_stats(
        &self,
        Parameters(params): Parameters<DatabaseStatsParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let connection = self.require_connection(&params.connection_name).await?;

        let collections = discovery::database_stats(&connection, &params.database)
            .await
            .map_err(store_error)?;

        let response = serde_json::json!({
            "database": params.database,
            "collections": collections,
            "count": collections.len()
        });

        Ok(CallToolResult::success(vec![Content::text(
            serde_json::to_string_pretty(&response).unwrap(),
        )]))
    }

    /// Reports the serverStatus document of the deployment behind a
    /// connection: version, uptime, current connections and more.
    #[tool]
    async fn server_status(
        &self,
        Parameters(params): Parameters<ServerStatusParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let connection = self.require_connection(&params.connection_name).await?;

        let status = discovery::server_status(&connection)
            .await
            .map_err(store_error)?;

        Ok(CallToolResult::success(vec![Content::text(
            serde_json::to_string_pretty(&document_json(status)).unwrap(),
        )]))
    }

    /// Pages through the documents of a collection, unfiltered.
    ///
    /// Pages are 1-based; page size defaults to 25 and is capped at 200.
    /// Documents are rendered as relaxed Extended JSON.
    #[tool]
    async fn find_documents(
        &self,
        Parameters(params): Parameters<FindDocumentsParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let connection = self.require_connection(&params.connection_name).await?;

        let (page, skip, limit) = page_window(params.page, params.limit);

        let documents = connection
            .store
            .find_documents(&params.database, &params.collection_name, skip, limit)
            .await
            .map_err(store_error)?;

        let rendered: Vec<serde_json::Value> = documents.into_iter().map(document_json).collect();

        let response = serde_json::json!({
            "database": params.database,
            "collection": params.collection_name,
            "page": page,
            "page_size": limit,
            "count": rendered.len(),
            "documents": rendered
        });

        Ok(CallToolResult::success(vec![Content::text(
            serde_json::to_string_pretty(&response).unwrap(),
        )]))
    }

    /// Fetches a single document by its identifier.
    ///
    /// The identifier text is tried as an ObjectId hex string, then as a
    /// 64-bit integer, then as a plain string _id; the first match wins.
    /// The response reports which type matched.
    #[tool]
    async fn get_document(
        &self,
        Parameters(params): Parameters<GetDocumentParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let connection = self.require_connection(&params.connection_name).await?;

        let resolved = resolver::resolve(
            &connection,
            &params.database,
            &params.collection_name,
            &params.document_id,
        )
        .await
        .map_err(|err| match err {
            ResolveError::NotFound => rmcp::ErrorData::invalid_params(
                format!(
                    "No document with _id '{}' in {}.{} (tried every supported identifier type)",
                    params.document_id, params.database, params.collection_name
                ),
                None,
            ),
            ResolveError::Store(err) => store_error(err),
        })?;

        let response = serde_json::json!({
            "id": resolved.raw,
            "id_type": resolved.id_type,
            "document": resolved.document.map(document_json),
        });

        Ok(CallToolResult::success(vec![Content::text(
            serde_json::to_string_pretty(&response).unwrap(),
        )]))
    }
}

#[tool_handler]
impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: rmcp::model::Implementation {
                name: self.name.clone(),
                version: self.version.clone(),
                ..Default::default()
            },
            instructions: Some(
                "MongoDB cluster administration server. Workflow: \
                 1) list_connections to see registered connections, \
                 2) database_tree to discover databases and collections (case-sensitive!), \
                 3) cluster_stats or database_stats for storage and document counts, \
                 4) find_documents to page through a collection, \
                 get_document to fetch one document by id. \
                 Manage the pool with add_connection and remove_connection; \
                 server_status reports deployment health."
                    .to_string(),
            ),
            ..Default::default()
        }
    }
}

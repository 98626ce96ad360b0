//! MongoDB connection management with pool configuration and health checking

use bson::{doc, Document as BsonDocument};
use datakit_common::{DataKitError, Result};
use mongodb::{
    options::{ClientOptions, ServerApi, ServerApiVersion},
    Client, Collection, Database,
};
use std::time::Duration;

use crate::dbset::DbSet;
use crate::validation::ValidatedCollectionName;

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of connections kept in the pool
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool
    pub max_pool_size: Option<u32>,
    /// Maximum time a connection can remain idle before being closed
    pub max_idle_time: Option<Duration>,
    /// Connection timeout
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: Some(5),
            max_pool_size: Some(20),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("datakit".to_string()),
        }
    }
}

/// MongoDB connection manager with pooling support
///
/// Holds one client and the default database from the connection string;
/// `DbSet` façades handed out by `db_set`/`transactional_db_set` share the
/// underlying pool.
pub struct Connection {
    client: Client,
    database: Database,
    database_name: String,
}

impl Connection {
    /// Connect with default pool settings
    pub async fn new(connection_string: &str) -> Result<Self> {
        Self::with_config(connection_string, PoolConfig::default()).await
    }

    /// Connect with custom pool configuration
    pub async fn with_config(connection_string: &str, config: PoolConfig) -> Result<Self> {
        let mut client_options = ClientOptions::parse(connection_string).await?;

        client_options.min_pool_size = config.min_pool_size.or(client_options.min_pool_size);
        client_options.max_pool_size = config.max_pool_size.or(client_options.max_pool_size);
        client_options.max_idle_time = config.max_idle_time.or(client_options.max_idle_time);
        client_options.connect_timeout = config.connect_timeout.or(client_options.connect_timeout);
        client_options.server_selection_timeout = config
            .server_selection_timeout
            .or(client_options.server_selection_timeout);
        client_options.app_name = config.app_name.or(client_options.app_name);

        // Pin the stable server API for cross-version compatibility
        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        let client = Client::with_options(client_options)?;

        let database = client.default_database().ok_or_else(|| {
            DataKitError::Connection(
                "No default database specified in connection string".to_string(),
            )
        })?;

        let database_name = database.name().to_string();
        tracing::debug!(database = %database_name, "MongoDB connection configured");

        Ok(Self {
            client,
            database,
            database_name,
        })
    }

    /// Reference to the default database
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Name of the default database
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// Reference to the underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Untyped collection handle
    pub fn collection(&self, name: &str) -> Collection<BsonDocument> {
        self.database.collection(name)
    }

    /// Sessionless `DbSet` over one collection
    pub fn db_set(&self, name: &str) -> Result<DbSet> {
        let name = ValidatedCollectionName::new(name)?;
        let collection = self.database.collection(name.as_str());
        Ok(DbSet::new(name, collection))
    }

    /// `DbSet` owning a fresh session, for transactional use
    ///
    /// The session is released when the `DbSet` is dropped.
    pub async fn transactional_db_set(&self, name: &str) -> Result<DbSet> {
        let name = ValidatedCollectionName::new(name)?;
        let collection = self.database.collection(name.as_str());
        let session = self.client.start_session().await?;
        Ok(DbSet::with_session(name, collection, session))
    }

    /// Check connection health by pinging the server
    pub async fn ping(&self) -> Result<bool> {
        match self.database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => Ok(true),
            Err(e) => Err(DataKitError::Connection(format!("Ping failed: {}", e))),
        }
    }

    /// Raw `serverStatus` document, for health dashboards
    pub async fn server_status(&self) -> Result<bson::Document> {
        let status = self.database.run_command(doc! { "serverStatus": 1 }).await?;
        Ok(status)
    }

    /// List all collection names in the default database
    pub async fn list_collection_names(&self) -> Result<Vec<String>> {
        let names = self.database.list_collection_names().await?;
        Ok(names)
    }
}

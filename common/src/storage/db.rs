use crate::error::AppError;

use super::types::{chunk::StoredChunk, StoredObject};
use std::ops::Deref;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};
use tracing::debug;

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// # Initialize a new database client
    ///
    /// Embedded engines (`mem://`, `surrealkv://`) need no credentials; remote
    /// servers are signed into as root when credentials are supplied.
    pub async fn new(
        address: &str,
        credentials: Option<(&str, &str)>,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        if let Some((username, password)) = credentials {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(namespace).use_db(database).await?;

        debug!(address, namespace, database, "Connected to SurrealDB");
        Ok(SurrealDbClient { client: db })
    }

    pub async fn ensure_initialized(&self) -> Result<(), AppError> {
        self.client
            .query(format!(
                "DEFINE TABLE IF NOT EXISTS {} SCHEMALESS",
                StoredChunk::table_name()
            ))
            .await?
            .check()?;
        Ok(())
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn initialization_is_idempotent() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        db.ensure_initialized()
            .await
            .expect("Failed to initialize schema");
        db.ensure_initialized()
            .await
            .expect("Failed to re-run initialization");

        let mut response = db
            .query(format!("SELECT * FROM {}", StoredChunk::table_name()))
            .await
            .expect("Failed to query chunk table");
        let rows: Vec<serde_json::Value> = response.take(0).expect("rows");
        assert!(rows.is_empty());
    }
}

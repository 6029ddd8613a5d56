use std::sync::Arc;

use async_trait::async_trait;
use surrealdb::sql::Thing;
use tracing::{debug, instrument};

use crate::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            chunk::{RetrievedChunk, StoredChunk},
            metadata::{Metadata, MetadataFilter},
            StoredObject,
        },
    },
    utils::embedding::EmbeddingProvider,
};

/// Narrow boundary to the embedding-backed chunk store.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Best `k` matches for `query`, restricted to chunks admitted by `filter`.
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievedChunk>, AppError>;

    /// Stores one chunk per text and returns the new identifiers in input order.
    async fn batch_insert(
        &self,
        texts: Vec<String>,
        metadatas: Vec<Metadata>,
    ) -> Result<Vec<String>, AppError>;

    /// Deletes the given chunks. Fails with [`AppError::NotFound`] without
    /// deleting anything when some identifier is unknown.
    async fn delete(&self, ids: &[String]) -> Result<(), AppError>;

    /// Drops every stored chunk.
    async fn delete_collection(&self) -> Result<(), AppError>;
}

pub struct SurrealVectorStore {
    db: Arc<SurrealDbClient>,
    embedder: Arc<EmbeddingProvider>,
}

impl SurrealVectorStore {
    pub fn new(db: Arc<SurrealDbClient>, embedder: Arc<EmbeddingProvider>) -> Self {
        Self { db, embedder }
    }

    fn records(ids: &[String]) -> Vec<Thing> {
        ids.iter()
            .map(|id| Thing::from((StoredChunk::table_name(), id.as_str())))
            .collect()
    }
}

#[async_trait]
impl VectorStore for SurrealVectorStore {
    #[instrument(skip_all, fields(k = k))]
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievedChunk>, AppError> {
        let embedding = self.embedder.embed(query).await?;

        let clauses: Vec<_> = filter
            .map(|filter| filter.active_clauses().collect())
            .unwrap_or_default();

        // Keys are bound, never interpolated.
        let conditions: Vec<String> = (0..clauses.len())
            .map(|index| format!("metadata[$key_{index}] IN $filter_{index}"))
            .collect();
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT meta::id(id) AS id, text, metadata, \
             vector::similarity::cosine(embedding, $embedding) AS score \
             FROM {table} {where_clause} ORDER BY score DESC LIMIT {k}",
            table = StoredChunk::table_name(),
        );
        debug!(filters = conditions.len(), "Executing similarity search");

        let mut request = self.db.query(sql).bind(("embedding", embedding));
        for (index, (key, clause)) in clauses.into_iter().enumerate() {
            request = request
                .bind((format!("key_{index}"), key.clone()))
                .bind((format!("filter_{index}"), clause.allowed.clone()));
        }

        let mut response = request.await?;
        let results: Vec<RetrievedChunk> = response.take(0)?;
        Ok(results)
    }

    #[instrument(skip_all, fields(count = texts.len()))]
    async fn batch_insert(
        &self,
        texts: Vec<String>,
        metadatas: Vec<Metadata>,
    ) -> Result<Vec<String>, AppError> {
        if texts.len() != metadatas.len() {
            return Err(AppError::Validation(format!(
                "got {} texts but {} metadata records",
                texts.len(),
                metadatas.len()
            )));
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self.embedder.embed_batch(texts.clone()).await?;
        if embeddings.len() != texts.len() {
            return Err(AppError::InternalError(format!(
                "embedding backend returned {} vectors for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }

        let rows: Vec<StoredChunk> = texts
            .into_iter()
            .zip(metadatas)
            .zip(embeddings)
            .map(|((text, metadata), embedding)| StoredChunk::new(text, metadata, embedding))
            .collect();
        let ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();

        self.db
            .query(format!("INSERT INTO {} $rows", StoredChunk::table_name()))
            .bind(("rows", rows))
            .await?
            .check()?;

        debug!(inserted = ids.len(), "Stored chunk batch");
        Ok(ids)
    }

    #[instrument(skip_all, fields(count = ids.len()))]
    async fn delete(&self, ids: &[String]) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }
        let records = Self::records(ids);

        let mut response = self
            .db
            .query("SELECT VALUE meta::id(id) FROM $records")
            .bind(("records", records.clone()))
            .await?;
        let found: Vec<String> = response.take(0)?;
        if found.len() < ids.len() {
            let missing: Vec<&String> = ids.iter().filter(|id| !found.contains(*id)).collect();
            return Err(AppError::NotFound(format!(
                "{} chunk id(s) not in the store, e.g. {:?}",
                missing.len(),
                missing.first()
            )));
        }

        self.db
            .query("DELETE $records")
            .bind(("records", records))
            .await?
            .check()?;
        Ok(())
    }

    async fn delete_collection(&self) -> Result<(), AppError> {
        self.db
            .query(format!("DELETE {}", StoredChunk::table_name()))
            .await?
            .check()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    async fn store() -> SurrealVectorStore {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized().await.expect("schema");
        SurrealVectorStore::new(Arc::new(db), Arc::new(EmbeddingProvider::new_hashed(64)))
    }

    fn meta(year: &str) -> Metadata {
        [("year".to_string(), json!(year))].into_iter().collect()
    }

    #[tokio::test]
    async fn insert_then_search_respects_filter() {
        let store = store().await;
        let ids = store
            .batch_insert(
                vec![
                    "revenue grew strongly in europe".into(),
                    "revenue grew strongly in asia".into(),
                    "the cat sat on the mat".into(),
                ],
                vec![meta("2023"), meta("2024"), meta("2024")],
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 3);

        let all = store
            .similarity_search("revenue grew", 10, None)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert!(all[0].text.contains("revenue"));

        let filter = MetadataFilter::new().with_clause("year", vec![json!("2024")]);
        let filtered = store
            .similarity_search("revenue grew", 10, Some(&filter))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(filtered
            .iter()
            .all(|chunk| chunk.metadata["year"] == json!("2024")));
        assert_eq!(filtered[0].id, ids[1]);

        let top_one = store.similarity_search("cat", 1, None).await.unwrap();
        assert_eq!(top_one.len(), 1);
    }

    #[tokio::test]
    async fn mismatched_lengths_are_rejected() {
        let store = store().await;
        let result = store
            .batch_insert(vec!["a".into()], vec![meta("2023"), meta("2024")])
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn filter_keys_with_punctuation_and_unicode_match() {
        let store = store().await;
        let tagged: Metadata = [
            ("fiscal-year".to_string(), json!("2024")),
            ("部门".to_string(), json!("销售")),
        ]
        .into_iter()
        .collect();
        let ids = store
            .batch_insert(
                vec!["sales report".into(), "sales forecast".into()],
                vec![tagged, meta("2024")],
            )
            .await
            .unwrap();

        let filter = MetadataFilter::new()
            .with_clause("fiscal-year", vec![json!("2024")])
            .with_clause("部门", vec![json!("销售")]);
        let hits = store
            .similarity_search("sales", 10, Some(&filter))
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, ids[0]);
    }

    #[tokio::test]
    async fn filter_keys_cannot_inject_statements() {
        let store = store().await;
        store
            .batch_insert(vec!["kept".into()], vec![meta("2024")])
            .await
            .unwrap();

        let filter = MetadataFilter::new().with_clause("year; DELETE rag_chunk", vec![json!("x")]);
        let hits = store
            .similarity_search("kept", 3, Some(&filter))
            .await
            .unwrap();

        assert!(hits.is_empty());
        assert_eq!(store.similarity_search("kept", 3, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_reports_unknown_ids_without_deleting() {
        let store = store().await;
        let ids = store
            .batch_insert(vec!["one".into(), "two".into()], vec![meta("1"), meta("2")])
            .await
            .unwrap();

        let mut with_unknown = ids.clone();
        with_unknown.push("missing".into());
        let result = store.delete(&with_unknown).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(store.similarity_search("one", 10, None).await.unwrap().len(), 2);

        store.delete(&ids[..1]).await.unwrap();
        let remaining = store.similarity_search("one", 10, None).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, ids[1]);

        store.delete_collection().await.unwrap();
        assert!(store.similarity_search("two", 10, None).await.unwrap().is_empty());
    }
}

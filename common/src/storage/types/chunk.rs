use uuid::Uuid;

use super::metadata::Metadata;
use crate::stored_object;

stored_object!(StoredChunk, "rag_chunk", {
    text: String,
    #[serde(default)]
    metadata: Metadata,
    embedding: Vec<f32>
});

impl StoredChunk {
    pub fn new(text: String, metadata: Metadata, embedding: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            text,
            metadata,
            embedding,
        }
    }
}

/// A chunk returned by a similarity search, best match first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub score: f32,
}

impl fmt::Display for RetrievedChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metadata = serde_json::to_string(&self.metadata).map_err(|_| fmt::Error)?;
        write!(f, "Source: {metadata}\nContent: {}", self.text)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn new_chunk_gets_a_fresh_id() {
        let first = StoredChunk::new("a".into(), Metadata::new(), vec![0.0]);
        let second = StoredChunk::new("a".into(), Metadata::new(), vec![0.0]);

        assert_ne!(first.id, second.id);
        assert_eq!(StoredChunk::table_name(), "rag_chunk");
    }

    #[test]
    fn retrieved_chunk_renders_source_block() {
        let chunk = RetrievedChunk {
            id: "1".into(),
            text: "Revenue was 10".into(),
            metadata: [("year".to_string(), json!("2024"))].into_iter().collect(),
            score: 0.9,
        };

        assert_eq!(
            chunk.to_string(),
            "Source: {\"year\":\"2024\"}\nContent: Revenue was 10"
        );
    }
}

use std::{collections::HashSet, sync::Arc};

use tracing::{error, info, warn};

use common::{
    error::AppError,
    storage::{
        filter_store::MetadataFilterStore, ledger::ProcessedFileLedger,
        types::metadata::MetadataFilter, vector_store::VectorStore,
    },
};

use crate::pipeline::IngestionTuning;

/// Removes every ledger entry admitted by the active filter, together with its chunks.
pub struct DeletionPipeline {
    store: Arc<dyn VectorStore>,
    ledger: Arc<ProcessedFileLedger>,
    filters: MetadataFilterStore,
    batch_size: usize,
}

impl DeletionPipeline {
    pub fn new(
        store: Arc<dyn VectorStore>,
        ledger: Arc<ProcessedFileLedger>,
        filters: MetadataFilterStore,
        tuning: &IngestionTuning,
    ) -> Self {
        Self {
            store,
            ledger,
            filters,
            batch_size: tuning.delete_batch_size.max(1),
        }
    }

    /// Deletes the entries selected by the persisted filter and returns the
    /// number of chunk identifiers targeted.
    #[tracing::instrument(skip_all, fields(component = "deletion"))]
    pub async fn delete_by_active_filter(&self) -> Result<usize, AppError> {
        let filter = self.filters.read().await;
        self.delete_matching(&filter).await
    }

    pub async fn delete_matching(&self, filter: &MetadataFilter) -> Result<usize, AppError> {
        let entries = self.ledger.get_all().await?;

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut selected = Vec::new();
        for (key, entry) in entries {
            if !filter.matches(&entry.metadata) {
                continue;
            }
            for id in entry.ids {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
            selected.push(key);
        }

        info!(
            files = selected.len(),
            chunks = ids.len(),
            "Deleting chunks selected by filter"
        );

        for (index, batch) in ids.chunks(self.batch_size).enumerate() {
            if let Err(err) = self.store.delete(batch).await {
                let start = index * self.batch_size;
                error!(
                    start,
                    end = start + batch.len(),
                    error = %err,
                    "Batch delete failed, deleting ids individually"
                );
                self.delete_individually(batch).await;
            }
        }

        for key in &selected {
            if !self.ledger.remove_key(key).await? {
                error!(key = %key, "Selected file vanished from ledger before removal");
            }
        }

        info!(
            files = selected.len(),
            chunks = ids.len(),
            "Deleted chunks and ledger entries"
        );
        Ok(ids.len())
    }

    async fn delete_individually(&self, batch: &[String]) {
        for id in batch {
            match self.store.delete(std::slice::from_ref(id)).await {
                Ok(()) => {}
                Err(AppError::NotFound(_)) => {
                    warn!(id = %id, "Chunk not found (possibly already deleted), skipping");
                }
                Err(err) => {
                    error!(id = %id, error = %err, "Failed to delete chunk");
                }
            }
        }
    }
}

mod batching;
mod config;

pub use batching::{batch_size, partition};
pub use config::IngestionTuning;

use std::{
    collections::HashSet,
    fmt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use futures::future::join_all;
use serde_json::Value;
use tokio::time::sleep;
use tokio_retry::{strategy::FixedInterval, Retry};
use tracing::{debug, error, info, warn};

use common::{
    error::AppError,
    storage::{
        ledger::{ledger_key, LedgerEntry, ProcessedFileLedger},
        types::metadata::{Metadata, FILENAME_KEY, IDS_KEY},
        vector_store::VectorStore,
    },
};

use crate::splitter::{ChunkList, DocumentSplitter};

/// Result of ingesting one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InsertOutcome {
    Inserted,
    AlreadyProcessed,
    NotFound,
    /// Nothing could be stored; the file has been removed from disk.
    Empty,
}

impl InsertOutcome {
    fn urgency(self) -> u8 {
        match self {
            InsertOutcome::Empty => 0,
            InsertOutcome::Inserted => 1,
            InsertOutcome::AlreadyProcessed => 2,
            InsertOutcome::NotFound => 3,
        }
    }
}

impl fmt::Display for InsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InsertOutcome::Inserted => "inserted",
            InsertOutcome::AlreadyProcessed => "already processed",
            InsertOutcome::NotFound => "not found",
            InsertOutcome::Empty => "empty",
        };
        f.write_str(label)
    }
}

/// Tally over a multi-file ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchInsertSummary {
    pub inserted: usize,
    pub already_processed: usize,
    pub not_found: usize,
    pub empty: usize,
    pub failed: usize,
    /// `NotFound` beats `AlreadyProcessed` beats `Inserted`; empty files don't count.
    pub most_urgent: Option<InsertOutcome>,
}

impl BatchInsertSummary {
    fn record(&mut self, outcome: InsertOutcome) {
        match outcome {
            InsertOutcome::Inserted => self.inserted += 1,
            InsertOutcome::AlreadyProcessed => self.already_processed += 1,
            InsertOutcome::NotFound => self.not_found += 1,
            InsertOutcome::Empty => {
                self.empty += 1;
                return;
            }
        }
        if self
            .most_urgent
            .is_none_or(|current| outcome.urgency() > current.urgency())
        {
            self.most_urgent = Some(outcome);
        }
    }
}

#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    store: Arc<dyn VectorStore>,
    ledger: Arc<ProcessedFileLedger>,
    splitter: DocumentSplitter,
    tuning: IngestionTuning,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn VectorStore>,
        ledger: Arc<ProcessedFileLedger>,
    ) -> Result<Self, AppError> {
        Self::with_tuning(store, ledger, IngestionTuning::default())
    }

    pub fn with_tuning(
        store: Arc<dyn VectorStore>,
        ledger: Arc<ProcessedFileLedger>,
        tuning: IngestionTuning,
    ) -> Result<Self, AppError> {
        let splitter = DocumentSplitter::new(tuning.chunk_size, tuning.chunk_overlap)?;
        Ok(Self {
            store,
            ledger,
            splitter,
            tuning,
        })
    }

    /// Splits `path`, stores every chunk list and records the successful
    /// variants in the ledger.
    #[tracing::instrument(skip_all, fields(component = "ingestion", path = %path.display()))]
    pub async fn insert(&self, path: &Path, metadata: Metadata) -> Result<InsertOutcome, AppError> {
        if self.ledger.exists(path).await? {
            warn!("File has already been processed, skipping");
            return Ok(InsertOutcome::AlreadyProcessed);
        }
        if !tokio::fs::try_exists(path).await? {
            error!("File not found");
            return Ok(InsertOutcome::NotFound);
        }

        let started = Instant::now();
        let lists = self.splitter.split(path).await?;
        let total = lists.len();

        let mut staged: Vec<(PathBuf, LedgerEntry)> = Vec::with_capacity(total);
        for (index, list) in lists.into_iter().enumerate() {
            let ChunkList {
                source,
                derived,
                cleanup,
                chunks,
            } = list;

            let mut variant_metadata = metadata.clone();
            variant_metadata.remove(IDS_KEY);
            variant_metadata.insert(FILENAME_KEY.into(), Value::String(ledger_key(&source)));

            let chunk_count = chunks.len();
            let ids = self.insert_chunk_list(chunks, &variant_metadata).await;

            if ids.is_empty() {
                error!(
                    variant = index + 1,
                    of = total,
                    derived,
                    chunk_count,
                    "No chunks stored for file variant, removing it from disk"
                );
                for file in &cleanup {
                    self.remove_file_with_retry(file).await;
                }
                continue;
            }

            info!(
                variant = index + 1,
                of = total,
                derived,
                stored = ids.len(),
                "File variant inserted"
            );
            staged.push((source, LedgerEntry::new(variant_metadata, ids)));
        }

        if staged.is_empty() {
            return Ok(InsertOutcome::Empty);
        }

        for (source, entry) in staged {
            self.ledger.put(&source, entry).await?;
        }

        info!(
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "File ingested"
        );
        Ok(InsertOutcome::Inserted)
    }

    /// Ingests several files concurrently, each with its own copy of `metadata`.
    #[tracing::instrument(skip_all, fields(component = "ingestion", files = paths.len()))]
    pub async fn insert_many(
        &self,
        paths: &[PathBuf],
        metadata: &Metadata,
    ) -> BatchInsertSummary {
        let total = paths.len();
        let done = AtomicUsize::new(0);

        let results = join_all(paths.iter().map(|path| {
            let done = &done;
            async move {
                let result = self.insert(path, metadata.clone()).await;
                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                match &result {
                    Ok(outcome) => {
                        info!(path = %path.display(), %outcome, progress = %format!("{finished}/{total}"), "File processed");
                    }
                    Err(err) => {
                        error!(path = %path.display(), error = %err, progress = %format!("{finished}/{total}"), "File failed");
                    }
                }
                result
            }
        }))
        .await;

        let mut summary = BatchInsertSummary::default();
        for result in results {
            match result {
                Ok(outcome) => summary.record(outcome),
                Err(_) => summary.failed += 1,
            }
        }

        info!(
            inserted = summary.inserted,
            already_processed = summary.already_processed,
            not_found = summary.not_found,
            empty = summary.empty,
            failed = summary.failed,
            "Batch ingestion finished"
        );
        summary
    }

    /// Drops the ledger and the entire vector collection.
    #[tracing::instrument(skip_all, fields(component = "ingestion"))]
    pub async fn reset_all(&self) -> Result<(), AppError> {
        self.ledger.reset().await?;
        self.store.delete_collection().await?;
        warn!("All ingested data has been reset");
        Ok(())
    }

    /// Stores one chunk list in concurrent batches and returns the
    /// deduplicated identifiers of everything that made it in.
    async fn insert_chunk_list(&self, chunks: Vec<String>, metadata: &Metadata) -> Vec<String> {
        if chunks.is_empty() {
            return Vec::new();
        }

        let size = batch_size(chunks.len(), &self.tuning);
        let batches = partition(chunks, size);
        let batch_count = batches.len();
        debug!(batch_size = size, batch_count, "Submitting chunk batches");

        let results = join_all(
            batches
                .into_iter()
                .enumerate()
                .map(|(index, batch)| self.insert_batch_with_retries(index, batch, metadata)),
        )
        .await;

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut dropped = 0usize;
        for result in results {
            match result {
                Some(batch_ids) => {
                    for id in batch_ids {
                        if seen.insert(id.clone()) {
                            ids.push(id);
                        }
                    }
                }
                None => dropped += 1,
            }
        }

        if dropped > 0 {
            error!(dropped, batch_count, "Some chunk batches were dropped after retries");
        }
        ids
    }

    async fn insert_batch_with_retries(
        &self,
        index: usize,
        batch: Vec<String>,
        metadata: &Metadata,
    ) -> Option<Vec<String>> {
        let attempts = self.tuning.insert_attempts.max(1);
        let strategy =
            FixedInterval::from_millis(self.tuning.insert_retry_delay_ms).take(attempts - 1);
        let attempt = AtomicUsize::new(0);
        let batch_len = batch.len();

        let result = Retry::spawn(strategy, || {
            let current = attempt.fetch_add(1, Ordering::Relaxed) + 1;
            let store = Arc::clone(&self.store);
            let texts = batch.clone();
            let metadatas = vec![metadata.clone(); texts.len()];
            async move {
                store
                    .batch_insert(texts, metadatas)
                    .await
                    .inspect_err(|err| {
                        warn!(batch = index, attempt = current, error = %err, "Chunk batch insert failed");
                    })
            }
        })
        .await;

        match result {
            Ok(ids) => Some(ids),
            Err(err) => {
                error!(
                    batch = index,
                    attempts,
                    chunks = batch_len,
                    error = %err,
                    "Chunk batch dropped after final attempt"
                );
                None
            }
        }
    }

    /// Deletes `path`, retrying while the file is locked, up to the configured cap.
    async fn remove_file_with_retry(&self, path: &Path) {
        let max_attempts = self.tuning.max_locked_file_attempts.max(1);
        for attempt in 1..=max_attempts {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {
                    warn!(path = %path.display(), "Deleted file without usable content");
                    return;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        attempt,
                        error = %err,
                        "Delete failed, file may be in use; retrying"
                    );
                    if attempt < max_attempts {
                        sleep(Duration::from_millis(self.tuning.locked_file_retry_ms)).await;
                    }
                }
            }
        }
        error!(path = %path.display(), max_attempts, "Giving up on deleting file");
    }
}

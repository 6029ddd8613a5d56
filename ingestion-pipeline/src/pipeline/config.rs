use crate::pipeline::batching::DEFAULT_TARGET_BATCHES;

#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub target_batches: usize,
    pub min_batch_size: usize,
    pub insert_attempts: usize,
    pub insert_retry_delay_ms: u64,
    pub delete_batch_size: usize,
    pub locked_file_retry_ms: u64,
    pub max_locked_file_attempts: usize,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            target_batches: DEFAULT_TARGET_BATCHES,
            min_batch_size: 20,
            insert_attempts: 3,
            insert_retry_delay_ms: 20_000,
            delete_batch_size: 1_000,
            locked_file_retry_ms: 5_000,
            max_locked_file_attempts: 60,
        }
    }
}

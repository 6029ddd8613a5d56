use super::config::IngestionTuning;

pub const DEFAULT_TARGET_BATCHES: usize = 30;

/// Number of chunks per `batch_insert` call for a list of `chunk_count` chunks.
///
/// Aims for about `target_batches` concurrent calls, never goes below
/// `min_batch_size` and never above half the chunk size.
pub fn batch_size(chunk_count: usize, tuning: &IngestionTuning) -> usize {
    let target = tuning.target_batches.max(1);
    let ceiling = (tuning.chunk_size / 2).max(1);
    (chunk_count / target + 1)
        .max(tuning.min_batch_size)
        .min(ceiling)
}

/// Consecutive slices of at most `size` items.
pub fn partition(items: Vec<String>, size: usize) -> Vec<Vec<String>> {
    let size = size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(size));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(size).collect());
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("chunk {i}")).collect()
    }

    #[test]
    fn small_lists_use_the_minimum_batch_size() {
        let tuning = IngestionTuning::default();
        assert_eq!(batch_size(45, &tuning), 20);

        let batches = partition(texts(45), batch_size(45, &tuning));
        assert_eq!(
            batches.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![20, 20, 5]
        );
        assert_eq!(batches[2][0], "chunk 40");
    }

    #[test]
    fn large_lists_aim_for_target_batch_count() {
        let tuning = IngestionTuning::default();
        let size = batch_size(3_000, &tuning);
        assert_eq!(size, 101);
        assert_eq!(partition(texts(3_000), size).len(), 30);
    }

    #[test]
    fn batch_size_is_capped_at_half_the_chunk_size() {
        let tuning = IngestionTuning {
            chunk_size: 100,
            ..IngestionTuning::default()
        };
        assert_eq!(batch_size(100_000, &tuning), 50);
    }

    #[test]
    fn empty_input_has_no_batches() {
        assert!(partition(Vec::new(), 20).is_empty());
    }
}

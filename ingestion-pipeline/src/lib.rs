#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod deletion;
pub mod pipeline;
pub mod splitter;
pub mod utils;

pub use deletion::DeletionPipeline;
pub use pipeline::{BatchInsertSummary, IngestionPipeline, IngestionTuning, InsertOutcome};
pub use splitter::{ChunkList, DocumentSplitter};

use serde::{Deserialize, Serialize};

/// Knobs for the answer step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalTuning {
    /// Chunks returned per `retrieve` call.
    pub top_k: usize,
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self { top_k: 10 }
    }
}

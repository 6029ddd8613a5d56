#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod answer_retrieval;
pub mod config;
pub mod conversation;
pub mod llm;
pub mod tools;

pub use answer_retrieval::{RetrievalPipeline, Response};
pub use config::RetrievalTuning;
pub use llm::{ChatMessage, ChatModel, OpenAiChatModel, TokenUsage};

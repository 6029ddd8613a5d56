use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info};

use common::{
    error::AppError,
    storage::{types::metadata::MetadataFilter, vector_store::VectorStore},
};

use crate::{
    config::RetrievalTuning,
    conversation::ConversationStore,
    llm::{ChatMessage, ChatModel, ChatRole, TokenUsage},
    tools::ToolRegistry,
};

const SYSTEM_PROMPT: &str = "You are an assistant for question-answering tasks. \
Use the following pieces of retrieved context to answer the question, and supplement it \
with your own knowledge whenever necessary. \
Retrieved context of tables is stored in this format: (row header, column header): cell value. \
Use the provided tools to calculate statistics instead of doing it yourself. \
If you don't know the answer, say that you don't know. \
Use as long a response as you see fit. \
Use statistical data and numbers whenever possible to back up your claims. \
Do not use LaTeX formulas in the output. \
Only include variance data when analyzing relatively small statistics. \
Cite all references from the original text verbatim, in the appropriate location in the response.";

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub answer: String,
    /// Summed over every model call made for this turn.
    pub usage: TokenUsage,
}

pub struct RetrievalPipeline {
    model: Arc<dyn ChatModel>,
    store: Arc<dyn VectorStore>,
    conversations: ConversationStore,
    tuning: RetrievalTuning,
}

impl RetrievalPipeline {
    pub fn new(model: Arc<dyn ChatModel>, store: Arc<dyn VectorStore>) -> Self {
        Self::with_tuning(model, store, RetrievalTuning::default())
    }

    pub fn with_tuning(
        model: Arc<dyn ChatModel>,
        store: Arc<dyn VectorStore>,
        tuning: RetrievalTuning,
    ) -> Self {
        Self {
            model,
            store,
            conversations: ConversationStore::new(),
            tuning,
        }
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Answers `query` within `session_id`, letting the model retrieve
    /// context scoped to `filter` before it replies.
    #[tracing::instrument(skip_all, fields(component = "retrieval", session = %session_id))]
    pub async fn respond(
        &self,
        session_id: &str,
        query: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<Response, AppError> {
        debug!(query = %query, ?filter, "User submitted query");

        let registry = ToolRegistry::for_query(
            Arc::clone(&self.store),
            filter.cloned(),
            self.tuning.top_k,
        );

        let mut messages = self.conversations.history(session_id).await;
        let turn_start = messages.len();
        messages.push(ChatMessage::user(query));

        let mut usage = TokenUsage::default();
        let first = self.model.complete(&messages, &registry.specs()).await?;
        usage += first.usage;
        let reply = first.message;
        let needs_tools = reply.requests_tools();
        messages.push(reply.clone());

        if !needs_tools {
            info!(total_tokens = usage.total_tokens, "Answered without tools");
            self.conversations
                .append(session_id, messages.split_off(turn_start))
                .await;
            return Ok(Response {
                answer: reply.content,
                usage,
            });
        }

        let outputs = join_all(reply.tool_calls.iter().map(|call| registry.run(call))).await;
        for (call, output) in reply.tool_calls.iter().zip(outputs) {
            messages.push(ChatMessage::tool(call.id.clone(), output));
        }
        info!(tool_calls = reply.tool_calls.len(), "Tool calls executed");

        let prompt = generation_prompt(&messages);
        let generated = self.model.complete(&prompt, &[]).await?;
        usage += generated.usage;
        let answer = generated.message.content.clone();
        messages.push(generated.message);

        info!(total_tokens = usage.total_tokens, "Generated answer");
        self.conversations
            .append(session_id, messages.split_off(turn_start))
            .await;

        Ok(Response { answer, usage })
    }
}

/// Builds the final prompt: the instructions plus the latest run of tool
/// results, followed by the conversation without tool traffic.
pub fn generation_prompt(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let recent_tools = messages
        .iter()
        .rev()
        .take_while(|message| message.role == ChatRole::Tool)
        .count();
    let docs = messages[messages.len() - recent_tools..]
        .iter()
        .map(|message| message.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut prompt = vec![ChatMessage::system(format!("{SYSTEM_PROMPT}\n\n{docs}"))];
    prompt.extend(
        messages
            .iter()
            .filter(|message| match message.role {
                ChatRole::System | ChatRole::User => true,
                ChatRole::Assistant => !message.requests_tools(),
                ChatRole::Tool => false,
            })
            .cloned(),
    );
    prompt
}

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::llm::ChatMessage;

/// In-memory message history keyed by session id.
#[derive(Default)]
pub struct ConversationStore {
    sessions: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a session's messages; empty for unknown sessions.
    pub async fn history(&self, session_id: &str) -> Vec<ChatMessage> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn append(&self, session_id: &str, messages: impl IntoIterator<Item = ChatMessage>) {
        self.sessions
            .lock()
            .await
            .entry(session_id.to_string())
            .or_default()
            .extend(messages);
    }

    pub async fn clear(&self, session_id: &str) -> bool {
        self.sessions.lock().await.remove(session_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = ConversationStore::new();
        store
            .append("a", [ChatMessage::user("hi"), ChatMessage::assistant("hello")])
            .await;
        store.append("b", [ChatMessage::user("other")]).await;
        store.append("a", [ChatMessage::user("again")]).await;

        let history = store.history("a").await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].content, "again");
        assert_eq!(store.history("b").await.len(), 1);
        assert!(store.history("missing").await.is_empty());
    }

    #[tokio::test]
    async fn clear_forgets_a_session() {
        let store = ConversationStore::new();
        store.append("a", [ChatMessage::user("hi")]).await;

        assert!(store.clear("a").await);
        assert!(!store.clear("a").await);
        assert!(store.history("a").await.is_empty());
    }
}

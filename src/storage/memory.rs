//! In-Memory Conversation Storage
//!
//! Information Hiding:
//! - HashMap storage structure hidden from users
//! - Thread-safe access via RwLock hidden behind async interface
//! - Data is lost when the process terminates

use super::{ConversationStore, StoreError, SYSTEM_PROMPT};
use crate::core::llm::ChatMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct InMemoryStore {
    conversations: Arc<RwLock<HashMap<String, Vec<ChatMessage>>>>,
    max_stored_turns: usize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
            max_stored_turns: 0,
        }
    }

    /// Cap stored turns per user. The seed turn is always retained, so the
    /// effective minimum is 2 (seed plus the latest turn).
    pub fn with_max_stored_turns(mut self, max: usize) -> Self {
        self.max_stored_turns = if max == 0 { 0 } else { max.max(2) };
        self
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn get_or_create(&self, user_id: &str) -> Vec<ChatMessage> {
        if let Some(history) = self.conversations.read().await.get(user_id) {
            return history.clone();
        }

        // Re-check under the write lock: another task may have seeded it.
        let mut conversations = self.conversations.write().await;
        let history = conversations.entry(user_id.to_string()).or_insert_with(|| {
            tracing::debug!("[InMemoryStore] Seeding conversation for user '{}'", user_id);
            vec![ChatMessage::system(SYSTEM_PROMPT)]
        });
        history.clone()
    }

    async fn append(&self, user_id: &str, turn: ChatMessage) -> Result<(), StoreError> {
        let mut conversations = self.conversations.write().await;
        let history = conversations
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))?;

        history.push(turn);

        if self.max_stored_turns > 0 && history.len() > self.max_stored_turns {
            let excess = history.len() - self.max_stored_turns;
            history.drain(1..1 + excess);
        }

        tracing::debug!(
            "[InMemoryStore] User '{}' now has {} turns",
            user_id,
            history.len()
        );
        Ok(())
    }

    async fn windowed_history(&self, user_id: &str, limit: usize) -> Vec<ChatMessage> {
        let conversations = self.conversations.read().await;
        conversations
            .get(user_id)
            .map(|history| {
                let start = history.len().saturating_sub(limit);
                history[start..].to_vec()
            })
            .unwrap_or_default()
    }

    async fn len(&self, user_id: &str) -> usize {
        self.conversations
            .read()
            .await
            .get(user_id)
            .map_or(0, Vec::len)
    }

    async fn list_users(&self) -> Vec<String> {
        self.conversations.read().await.keys().cloned().collect()
    }
}

//! Conversation Storage Abstraction
//!
//! Information Hiding:
//! - Backend data structures hidden behind the trait
//! - The relay only sees turns, never the map that holds them
//! - A durable backend can replace the in-memory one without touching the relay

use crate::core::llm::ChatMessage;
use async_trait::async_trait;
use thiserror::Error;

pub mod memory;

pub use memory::InMemoryStore;

/// Seed turn inserted once per user on first contact
pub const SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant that fixes WordPress and PHP issues.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("conversation not found for user '{0}'")]
    NotFound(String),
}

/// Per-user ordered turn history
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Return the user's conversation, seeding it with the system turn if absent
    async fn get_or_create(&self, user_id: &str) -> Vec<ChatMessage>;

    /// Append a turn to an existing conversation
    async fn append(&self, user_id: &str, turn: ChatMessage) -> Result<(), StoreError>;

    /// Last `limit` turns in original order. Unknown users yield an empty view.
    async fn windowed_history(&self, user_id: &str, limit: usize) -> Vec<ChatMessage>;

    /// Number of stored turns for a user, 0 if unknown
    async fn len(&self, user_id: &str) -> usize;

    async fn list_users(&self) -> Vec<String>;
}

//! WP Agent - relay between a WordPress diagnostic plugin and an LLM
//!
//! Error reports are triaged and, when fatal, forwarded for a fix suggestion.
//! Chat messages keep a per-user conversation in memory and send a bounded
//! window of it upstream.

mod config;
pub mod core;
pub mod relay;
pub mod server;
pub mod storage;

pub mod cli;

pub use config::{LLMConfig, LoggingConfig, MemoryConfig, ServerConfig, Settings};
pub use core::llm::{ChatMessage, CompletionError, CompletionProvider, LLMClient, Role};
pub use relay::{CompletionRelay, ErrorReport};
pub use server::{router, AppState};
pub use storage::{ConversationStore, InMemoryStore};

use std::sync::Arc;

/// Wire the production relay from settings and the provider credential.
pub fn build_relay(settings: &Settings, api_key: String) -> CompletionRelay {
    let provider = Arc::new(LLMClient::new(api_key, settings.llm.clone()));
    let store = Arc::new(InMemoryStore::new().with_max_stored_turns(settings.memory.max_stored_turns));

    CompletionRelay::new(provider, store).with_history_window(settings.memory.history_window)
}

//! Completion Relay
//!
//! Turns plugin requests into completion calls and normalizes every provider
//! outcome into reply text. Provider failures never surface as errors; only
//! store faults do.

mod locks;

pub use locks::UserLocks;

use crate::core::llm::{ChatMessage, CompletionError, CompletionProvider};
use crate::storage::{ConversationStore, SYSTEM_PROMPT};
use anyhow::Result;
use serde::Deserialize;
use std::sync::Arc;

pub const NOT_FOUND_REPLY: &str = "Check permalink structure or page slug";
pub const NO_LOG_REPLY: &str = "No error log provided.";
pub const UNHANDLED_REPLY: &str = "Unhandled issue";
pub const TIMEOUT_REPLY: &str = "The AI model timed out, please try again.";
pub const LOADING_REPLY: &str = "The AI model is still loading, please retry in ~20 seconds.";
pub const MALFORMED_REPLY: &str = "Unexpected response format from the AI model.";

pub const DEFAULT_HISTORY_WINDOW: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorReport {
    pub error_type: String,
    #[serde(default)]
    pub error_log: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Fatal,
    NotFound,
    Unhandled,
}

impl ErrorCategory {
    pub fn parse(error_type: &str) -> Self {
        match error_type.trim().to_ascii_lowercase().as_str() {
            "fatal" | "fatal_error" | "e_error" => Self::Fatal,
            "404" | "not_found" => Self::NotFound,
            _ => Self::Unhandled,
        }
    }
}

/// User-facing text for a failed completion call
pub fn fallback_reply(err: &CompletionError) -> String {
    match err {
        CompletionError::Status(code) => {
            format!("The AI model is unavailable right now (status {}).", code)
        }
        CompletionError::Timeout => TIMEOUT_REPLY.to_string(),
        CompletionError::ModelLoading => LOADING_REPLY.to_string(),
        CompletionError::Provider(msg) => format!("The AI model returned an error: {}", msg),
        CompletionError::MalformedResponse => MALFORMED_REPLY.to_string(),
        CompletionError::Transport(msg) => {
            format!("Error communicating with the AI model: {}", msg)
        }
    }
}

fn fix_prompt(error_log: &str) -> String {
    format!("Fix this WordPress PHP code issue:\n{}", error_log)
}

pub struct CompletionRelay {
    provider: Arc<dyn CompletionProvider>,
    store: Arc<dyn ConversationStore>,
    locks: UserLocks,
    history_window: usize,
}

impl CompletionRelay {
    pub fn new(provider: Arc<dyn CompletionProvider>, store: Arc<dyn ConversationStore>) -> Self {
        Self {
            provider,
            store,
            locks: UserLocks::new(),
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Triage a plugin error report. Only fatal reports with a log reach the provider.
    pub async fn relay_error(&self, report: &ErrorReport) -> String {
        let category = ErrorCategory::parse(&report.error_type);
        tracing::info!(
            "[Relay] Error report type='{}' category={:?}",
            report.error_type,
            category
        );

        match category {
            ErrorCategory::NotFound => NOT_FOUND_REPLY.to_string(),
            ErrorCategory::Unhandled => UNHANDLED_REPLY.to_string(),
            ErrorCategory::Fatal => {
                let error_log = report.error_log.as_deref().unwrap_or("").trim();
                if error_log.is_empty() {
                    return NO_LOG_REPLY.to_string();
                }

                let messages = vec![
                    ChatMessage::system(SYSTEM_PROMPT),
                    ChatMessage::user(fix_prompt(error_log)),
                ];
                self.complete_or_fallback(messages).await.0
            }
        }
    }

    /// Run one chat turn for `user_id`. Calls for the same user are serialized
    /// so their turns never interleave. Turns are stored only once the provider
    /// has answered, so a failed or abandoned call leaves the history untouched.
    pub async fn relay_message(&self, user_id: &str, message: &str) -> Result<String> {
        let _guard = self.locks.acquire(user_id).await;

        self.store.get_or_create(user_id).await;

        let user_turn = ChatMessage::user(message);
        let mut history = self
            .store
            .windowed_history(user_id, self.history_window - 1)
            .await;
        history.push(user_turn.clone());
        tracing::debug!(
            "[Relay] Sending {} turns for user '{}'",
            history.len(),
            user_id
        );

        let (reply, succeeded) = self.complete_or_fallback(history).await;
        if succeeded {
            self.store.append(user_id, user_turn).await?;
            self.store
                .append(user_id, ChatMessage::assistant(reply.clone()))
                .await?;
        }
        Ok(reply)
    }

    async fn complete_or_fallback(&self, messages: Vec<ChatMessage>) -> (String, bool) {
        match self.provider.complete(messages).await {
            Ok(reply) => (reply, true),
            Err(err) => {
                match &err {
                    CompletionError::Transport(_) => {
                        tracing::error!("[Relay] Completion failed: {:?}", err)
                    }
                    _ => tracing::warn!("[Relay] Completion failed: {}", err),
                }
                (fallback_reply(&err), false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::llm::Role;
    use crate::storage::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    type Outcome = Result<String, CompletionError>;

    /// Echoes the last user turn, or returns a fixed failure.
    struct StubProvider {
        calls: AtomicUsize,
        failure: Option<CompletionError>,
        first_call_delay: Duration,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl StubProvider {
        fn echo() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failure: None,
                first_call_delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing(err: CompletionError) -> Self {
            Self {
                failure: Some(err),
                ..Self::echo()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionProvider for StubProvider {
        async fn complete(&self, messages: Vec<ChatMessage>) -> Outcome {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(messages.clone());
            if n == 0 && !self.first_call_delay.is_zero() {
                tokio::time::sleep(self.first_call_delay).await;
            }
            if let Some(err) = &self.failure {
                return Err(err.clone());
            }
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(format!("re: {}", last))
        }
    }

    fn relay_with(provider: Arc<StubProvider>) -> CompletionRelay {
        CompletionRelay::new(provider, Arc::new(InMemoryStore::new()))
    }

    fn report(error_type: &str, error_log: Option<&str>) -> ErrorReport {
        ErrorReport {
            error_type: error_type.to_string(),
            error_log: error_log.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_not_found_skips_provider() {
        let provider = Arc::new(StubProvider::echo());
        let relay = relay_with(provider.clone());

        let reply = relay.relay_error(&report("404", None)).await;
        assert_eq!(reply, NOT_FOUND_REPLY);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_fatal_without_log_skips_provider() {
        let provider = Arc::new(StubProvider::echo());
        let relay = relay_with(provider.clone());

        assert_eq!(relay.relay_error(&report("fatal", Some(""))).await, NO_LOG_REPLY);
        assert_eq!(relay.relay_error(&report("fatal", None)).await, NO_LOG_REPLY);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_type_is_unhandled() {
        let provider = Arc::new(StubProvider::echo());
        let relay = relay_with(provider.clone());

        let reply = relay.relay_error(&report("warning", Some("x"))).await;
        assert_eq!(reply, UNHANDLED_REPLY);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_fatal_forwards_log_in_prompt() {
        let provider = Arc::new(StubProvider::echo());
        let relay = relay_with(provider.clone());

        let log = "PHP Fatal error: Call to undefined function foo()";
        let reply = relay.relay_error(&report("FATAL", Some(log))).await;

        assert_eq!(provider.calls(), 1);
        assert!(reply.starts_with("re: Fix this WordPress PHP code issue:"));
        assert!(reply.contains(log));
        // Error triage does not touch conversation memory.
        assert!(relay.store().list_users().await.is_empty());
    }

    #[tokio::test]
    async fn test_message_appends_user_and_assistant_turns() {
        let provider = Arc::new(StubProvider::echo());
        let relay = relay_with(provider.clone());

        let reply = relay.relay_message("alice", "hello").await.unwrap();
        assert_eq!(reply, "re: hello");

        let history = relay.store().get_or_create("alice").await;
        let roles: Vec<_> = history.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(history[2].content, "re: hello");
    }

    #[tokio::test]
    async fn test_message_sends_windowed_history() {
        let provider = Arc::new(StubProvider::echo());
        let relay = relay_with(provider.clone()).with_history_window(4);

        for i in 0..3 {
            relay.relay_message("bob", &format!("m{}", i)).await.unwrap();
        }

        let seen = provider.seen.lock().unwrap();
        let last = seen.last().unwrap();
        assert_eq!(last.len(), 4);
        assert_eq!(last.last().unwrap().content, "m2");
        assert_eq!(last[0].content, "re: m0");
        assert_eq!(last[1].content, "m1");
    }

    #[tokio::test]
    async fn test_status_failure_becomes_text() {
        let provider = Arc::new(StubProvider::failing(CompletionError::Status(503)));
        let relay = relay_with(provider);

        let reply = relay.relay_message("carol", "hi").await.unwrap();
        assert!(reply.contains("503"));

        // A failed call stores neither turn.
        let history = relay.store().get_or_create("carol").await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::System);
    }

    #[tokio::test]
    async fn test_retry_after_failure_sends_single_user_turn() {
        let provider = Arc::new(StubProvider::failing(CompletionError::Status(503)));
        let relay = relay_with(provider.clone());

        relay.relay_message("carol", "hi").await.unwrap();
        relay.relay_message("carol", "hi again").await.unwrap();

        let seen = provider.seen.lock().unwrap();
        let roles: Vec<_> = seen[1].iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User]);
        assert_eq!(seen[1][1].content, "hi again");
    }

    #[tokio::test]
    async fn test_abandoned_call_leaves_history_untouched() {
        let provider = Arc::new(StubProvider {
            first_call_delay: Duration::from_secs(5),
            ..StubProvider::echo()
        });
        let relay = relay_with(provider.clone());

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), relay.relay_message("frank", "hi"))
                .await;
        assert!(abandoned.is_err());
        assert_eq!(provider.calls(), 1);

        let history = relay.store().get_or_create("frank").await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::System);

        // The per-user lock was released with the dropped call.
        let reply = relay.relay_message("frank", "retry").await.unwrap();
        assert_eq!(reply, "re: retry");
        assert_eq!(relay.store().len("frank").await, 3);
    }

    #[tokio::test]
    async fn test_timeout_becomes_text() {
        let provider = Arc::new(StubProvider::failing(CompletionError::Timeout));
        let relay = relay_with(provider);

        let reply = relay.relay_message("dave", "hi").await.unwrap();
        assert_eq!(reply, TIMEOUT_REPLY);
    }

    #[test]
    fn test_fallback_replies() {
        assert_eq!(fallback_reply(&CompletionError::ModelLoading), LOADING_REPLY);
        assert_eq!(
            fallback_reply(&CompletionError::MalformedResponse),
            MALFORMED_REPLY
        );
        assert!(fallback_reply(&CompletionError::Provider("quota".into())).contains("quota"));
        assert!(fallback_reply(&CompletionError::Transport("reset".into())).contains("reset"));
    }

    #[tokio::test]
    async fn test_concurrent_messages_same_user_do_not_interleave() {
        let provider = Arc::new(StubProvider {
            first_call_delay: Duration::from_millis(100),
            ..StubProvider::echo()
        });
        let relay = relay_with(provider.clone());

        let (a, b) = tokio::join!(
            relay.relay_message("erin", "first"),
            relay.relay_message("erin", "second")
        );
        assert_eq!(a.unwrap(), "re: first");
        assert_eq!(b.unwrap(), "re: second");

        let history = relay.store().get_or_create("erin").await;
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].role, Role::System);
        for pair in history[1..].chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert_eq!(pair[1].content, format!("re: {}", pair[0].content));
        }
        assert_eq!(provider.calls(), 2);
    }
}

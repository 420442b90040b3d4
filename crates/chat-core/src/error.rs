use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SessionLifecycleState;

/// Broad error category used for user-facing handling and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatErrorCategory {
    /// Invalid input, unsupported state, or other configuration issue.
    Config,
    /// Authentication/authorization failure.
    Auth,
    /// Transient network failure or 5xx response.
    Network,
    /// Rate-limited by the backend.
    RateLimited,
    /// Serialization/deserialization failure.
    Serialization,
    /// Live connection failure.
    Transport,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable error payload emitted across the command/event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ChatError {
    /// High-level error category.
    pub category: ChatErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl ChatError {
    /// Construct a new error.
    pub fn new(
        category: ChatErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: SessionLifecycleState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ChatErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while session is in state {current:?}"),
        )
    }

    /// Error for commands that need a selected chatroom.
    pub fn no_chatroom_selected(action: &str) -> Self {
        Self::new(
            ChatErrorCategory::Config,
            "no_chatroom_selected",
            format!("cannot run '{action}' without a selected chatroom"),
        )
    }

    /// Error for a chatroom id missing from the loaded list.
    pub fn unknown_chatroom(chatroom_id: &str) -> Self {
        Self::new(
            ChatErrorCategory::Config,
            "unknown_chatroom",
            format!("chatroom '{chatroom_id}' is not in the chatroom list"),
        )
    }

    pub fn empty_message() -> Self {
        Self::new(
            ChatErrorCategory::Config,
            "empty_message",
            "message content is empty",
        )
    }

    /// Error for chatroom commands issued before a user is attached.
    pub fn not_signed_in() -> Self {
        Self::new(
            ChatErrorCategory::Auth,
            "not_signed_in",
            "session has no user; send Start first",
        )
    }

    /// Whether the caller may reasonably retry the failed operation.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.category, ChatErrorCategory::Internal)
    }
}

/// Map HTTP status codes to error categories.
pub fn classify_http_status(status: u16) -> ChatErrorCategory {
    match status {
        401 | 403 => ChatErrorCategory::Auth,
        408 | 429 => ChatErrorCategory::RateLimited,
        400..=499 => ChatErrorCategory::Config,
        500..=599 => ChatErrorCategory::Network,
        _ => ChatErrorCategory::Internal,
    }
}

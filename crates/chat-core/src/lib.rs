//! Core chat session contract shared between runtime and frontend consumers.
//!
//! This crate defines the command/event protocol, lifecycle and connection
//! state machines, the chatroom/message/search stores, retry and reconnect
//! policies, and the backend seams implemented by adapters.

/// Backend seams (`ChatApi`, `LiveTransport`, `LiveConnection`).
pub mod api;
/// Async command/event channel primitives.
pub mod channel;
/// Chatroom list store with generation-tagged loads.
pub mod chatrooms;
/// Message composition limits.
pub mod draft;
/// Stable error types and HTTP classification helpers.
pub mod error;
/// Message history store with load tickets and optimistic reconciliation.
pub mod messages;
/// Boundary validation and event normalization helpers.
pub mod normalization;
/// Backoff and reconnect policies.
pub mod retry;
/// At-bottom tracking for the message view.
pub mod scroll;
/// Debounced contact search.
pub mod search;
/// Session lifecycle and live connection state machines.
pub mod state_machine;
/// Frontend-facing protocol types (commands, events, payloads).
pub mod types;

pub use api::{ChatApi, Credential, LiveConnection, LiveTransport};
pub use channel::{EventStream, SessionChannelError, SessionChannels};
pub use chatrooms::{ChatroomListStore, CreateOutcome};
pub use draft::{MessageDraft, clamp_message_content, compose_message_content};
pub use error::{ChatError, ChatErrorCategory, classify_http_status};
pub use messages::{AppendOutcome, DEFAULT_MAX_ITEMS, LoadTicket, MessageStore};
pub use normalization::{
    LOGIN_SYNC_FAILED_MESSAGE, SendOutcome, encode_live_frame, normalize_chatrooms,
    normalize_history, normalize_send_outcome, parse_live_frame,
};
pub use retry::{ReconnectPolicy, RetryPolicy};
pub use scroll::{ScrollMetrics, ScrollTracker};
pub use search::{ContactSearch, DEFAULT_QUIET_PERIOD, SearchAction, SearchRequest};
pub use state_machine::{ConnectionStateMachine, SessionStateMachine};
pub use types::{
    Chatroom, ConnectionState, Contact, Delivery, ErrorScope, MAX_MESSAGE_CHARS, Member, Message,
    MessageId, SearchSnapshot, SearchStatus, SelectionSnapshot, SendAck, SessionCommand,
    SessionEvent, SessionLifecycleState, TimelineEntry, TimelineSnapshot, User,
};

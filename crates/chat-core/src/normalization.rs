use std::collections::HashSet;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    draft::clamp_message_content,
    error::{ChatError, ChatErrorCategory},
    types::{Chatroom, ErrorScope, Message, MessageId, SendAck, SessionEvent, parse_timestamp},
};

/// User-facing text for a failed login sync.
pub const LOGIN_SYNC_FAILED_MESSAGE: &str =
    "Failed to retrieve user data from server. Please try again later.";

/// Internal helper describing send command success/failure before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Send succeeded and the message was appended under `message_id`.
    Success { message_id: MessageId },
    /// Send failed with error details.
    Failure { error: ChatError },
}

/// Convert a send command outcome to a stable `SessionEvent::SendAck`.
pub fn normalize_send_outcome(
    client_txn_id: impl Into<String>,
    chatroom_id: impl Into<String>,
    outcome: SendOutcome,
) -> SessionEvent {
    let client_txn_id = client_txn_id.into();
    let chatroom_id = chatroom_id.into();
    match outcome {
        SendOutcome::Success { message_id } => SessionEvent::SendAck(SendAck {
            client_txn_id,
            chatroom_id,
            message_id: Some(message_id),
            error_code: None,
        }),
        SendOutcome::Failure { error } => SessionEvent::SendAck(SendAck {
            client_txn_id,
            chatroom_id,
            message_id: None,
            error_code: Some(error.code),
        }),
    }
}

/// Convert an error into a `FatalError` session event.
pub fn normalize_fatal_error(error: ChatError) -> SessionEvent {
    SessionEvent::FatalError {
        code: error.code,
        message: error.message,
    }
}

/// Inline error event for `scope`, using the scope's user-facing text.
pub fn inline_error(scope: ErrorScope) -> SessionEvent {
    SessionEvent::InlineError {
        scope,
        message: Some(scope.user_message().to_owned()),
    }
}

/// Inline error event that clears `scope`.
pub fn clear_inline_error(scope: ErrorScope) -> SessionEvent {
    SessionEvent::InlineError {
        scope,
        message: None,
    }
}

/// Validate a chatroom list response.
///
/// Chatrooms with a blank id are dropped, repeated ids keep their first
/// occurrence and last-message previews are clamped.
pub fn normalize_chatrooms(chatrooms: Vec<Chatroom>) -> Vec<Chatroom> {
    let mut seen = HashSet::new();
    chatrooms
        .into_iter()
        .filter_map(|mut chatroom| {
            if chatroom.id.trim().is_empty() {
                warn!("dropping chatroom with blank id");
                return None;
            }
            if !seen.insert(chatroom.id.clone()) {
                debug!(chatroom_id = %chatroom.id, "dropping duplicate chatroom");
                return None;
            }
            if let Some(last) = chatroom.last_message.as_mut() {
                last.content = clamp_message_content(&last.content);
            }
            Some(chatroom)
        })
        .collect()
}

/// Validate a message history response for `chatroom_id`.
pub fn normalize_history(chatroom_id: &str, messages: Vec<Message>) -> Vec<Message> {
    messages
        .into_iter()
        .filter_map(|mut message| {
            if message.chatroom_id != chatroom_id {
                warn!(
                    chatroom_id,
                    other = %message.chatroom_id,
                    "dropping history message for another chatroom"
                );
                return None;
            }
            message.content = clamp_message_content(&message.content);
            Some(message)
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct LiveFrame {
    #[serde(default)]
    id: Option<MessageId>,
    chatroom_id: String,
    user_id: String,
    content: String,
    #[serde(default)]
    created_at: Option<String>,
}

/// Parse one inbound text frame from the connection bound to `expected_chatroom`.
///
/// Returns `Ok(None)` for frames addressed to a different chatroom. Frames
/// without an id get a fresh client id; a missing or unreadable timestamp
/// becomes the receive time.
pub fn parse_live_frame(expected_chatroom: &str, raw: &str) -> Result<Option<Message>, ChatError> {
    let frame: LiveFrame = serde_json::from_str(raw).map_err(|err| {
        ChatError::new(
            ChatErrorCategory::Serialization,
            "invalid_live_frame",
            format!("could not decode live frame: {err}"),
        )
    })?;

    if frame.chatroom_id != expected_chatroom {
        debug!(
            chatroom_id = expected_chatroom,
            frame_chatroom_id = %frame.chatroom_id,
            "discarding frame for another chatroom"
        );
        return Ok(None);
    }

    let created_at = frame
        .created_at
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now);

    Ok(Some(Message {
        id: frame.id.unwrap_or_else(MessageId::new_client),
        chatroom_id: frame.chatroom_id,
        user_id: frame.user_id,
        content: clamp_message_content(&frame.content),
        created_at,
    }))
}

/// Encode an outbound frame for the live connection.
pub fn encode_live_frame(message: &Message) -> Result<String, ChatError> {
    serde_json::to_string(message).map_err(|err| {
        ChatError::new(
            ChatErrorCategory::Serialization,
            "invalid_live_frame",
            format!("could not encode live frame: {err}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MAX_MESSAGE_CHARS, Member};

    fn chatroom(id: &str, name: &str) -> Chatroom {
        Chatroom {
            id: id.to_owned(),
            name: Some(name.to_owned()),
            members: vec![Member {
                user_id: "alice".into(),
                display_name: Some("Alice".into()),
                email: None,
                profile_pic_url: None,
            }],
            last_message: None,
            picture_url: None,
        }
    }

    #[test]
    fn maps_success_to_send_ack() {
        let event = normalize_send_outcome(
            "txn-1",
            "room-a",
            SendOutcome::Success {
                message_id: MessageId::Client("txn-1".into()),
            },
        );

        match event {
            SessionEvent::SendAck(ack) => {
                assert_eq!(ack.client_txn_id, "txn-1");
                assert_eq!(ack.chatroom_id, "room-a");
                assert_eq!(ack.message_id, Some(MessageId::Client("txn-1".into())));
                assert_eq!(ack.error_code, None);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn maps_failure_to_send_ack_with_stable_error_code() {
        let event = normalize_send_outcome(
            "txn-2",
            "room-a",
            SendOutcome::Failure {
                error: ChatError::new(ChatErrorCategory::RateLimited, "rate_limited", "slow down"),
            },
        );

        match event {
            SessionEvent::SendAck(ack) => {
                assert_eq!(ack.message_id, None);
                assert_eq!(ack.error_code.as_deref(), Some("rate_limited"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn drops_blank_and_duplicate_chatrooms() {
        let normalized = normalize_chatrooms(vec![
            chatroom("r1", "first"),
            chatroom("  ", "blank"),
            chatroom("r2", "second"),
            chatroom("r1", "again"),
        ]);

        let names: Vec<_> = normalized
            .iter()
            .map(|chatroom| chatroom.name.as_deref().unwrap_or_default())
            .collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn parses_backend_shaped_frame() {
        let message = parse_live_frame(
            "room-a",
            r#"{"id": 12, "chatroom_id": "room-a", "user_id": "bob", "content": " hey ", "created_at": "2024-05-01T08:00:00"}"#,
        )
        .expect("frame should parse")
        .expect("frame is for this chatroom");

        assert_eq!(message.id, MessageId::Server(12));
        assert_eq!(message.content, "hey");
    }

    #[test]
    fn assigns_client_id_when_frame_has_none() {
        let message = parse_live_frame(
            "room-a",
            r#"{"chatroom_id": "room-a", "user_id": "bob", "content": "hey"}"#,
        )
        .expect("frame should parse")
        .expect("frame is for this chatroom");

        assert!(message.id.is_client());
    }

    #[test]
    fn discards_frame_for_other_chatroom() {
        let parsed = parse_live_frame(
            "room-a",
            r#"{"id": 1, "chatroom_id": "room-b", "user_id": "bob", "content": "hey"}"#,
        )
        .expect("frame should parse");
        assert_eq!(parsed, None);
    }

    #[test]
    fn rejects_malformed_frame() {
        let err = parse_live_frame("room-a", "not json").expect_err("must fail");
        assert_eq!(err.code, "invalid_live_frame");
        assert_eq!(err.category, ChatErrorCategory::Serialization);
    }

    #[test]
    fn clamps_oversized_frame_content() {
        let raw = serde_json::json!({
            "chatroom_id": "room-a",
            "user_id": "bob",
            "content": "q".repeat(MAX_MESSAGE_CHARS + 40),
        })
        .to_string();
        let message = parse_live_frame("room-a", &raw)
            .expect("frame should parse")
            .expect("frame is for this chatroom");
        assert_eq!(message.content.chars().count(), MAX_MESSAGE_CHARS);
    }

    #[test]
    fn encoded_frame_parses_back_with_same_id() {
        let original = Message {
            id: MessageId::Client("tx-9".into()),
            chatroom_id: "room-a".into(),
            user_id: "alice".into(),
            content: "hi".into(),
            created_at: Utc::now(),
        };
        let raw = encode_live_frame(&original).expect("encode");
        let parsed = parse_live_frame("room-a", &raw)
            .expect("decode")
            .expect("same chatroom");
        assert_eq!(parsed.id, original.id);
        assert_eq!(parsed.content, "hi");
    }

    #[test]
    fn history_keeps_only_the_requested_chatroom_and_clamps() {
        let history_message = |id: i64, chatroom_id: &str, content: String| Message {
            id: MessageId::Server(id),
            chatroom_id: chatroom_id.into(),
            user_id: "bob".into(),
            content,
            created_at: Utc::now(),
        };
        let history = vec![
            history_message(1, "room-a", "hello".into()),
            history_message(2, "room-b", "wrong room".into()),
            history_message(3, "room-a", format!("  {}  ", "w".repeat(MAX_MESSAGE_CHARS + 10))),
        ];

        let normalized = normalize_history("room-a", history);
        let ids: Vec<_> = normalized.iter().map(|message| message.id.clone()).collect();
        assert_eq!(ids, vec![MessageId::Server(1), MessageId::Server(3)]);
        assert_eq!(normalized[1].content, "w".repeat(MAX_MESSAGE_CHARS));
    }
}

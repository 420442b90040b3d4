use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Maximum message length in characters, measured after trimming.
pub const MAX_MESSAGE_CHARS: usize = 250;

/// Fallback label for chatrooms without a name or a named peer.
pub const UNNAMED_CHATROOM: &str = "Unnamed Chat";

/// Sidebar preview shown for chatrooms that have no messages yet.
pub const DRAFT_PREVIEW: &str = "Draft";

/// Signed-in user as supplied by the identity collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Stable user ID shared with the backend.
    pub id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Optional avatar URL.
    pub photo_url: Option<String>,
}

/// Chatroom member as returned by the chatroom list/create endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    /// Member user ID.
    pub user_id: String,
    /// Display name; absent in create responses.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Contact email, when the backend includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Avatar URL, when the backend includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_pic_url: Option<String>,
}

/// Conversation thread between two or more users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chatroom {
    /// Backend chatroom ID, unique within a chatroom list.
    pub id: String,
    /// Optional explicit name. Blank names count as absent.
    #[serde(default)]
    pub name: Option<String>,
    /// Chatroom members, including the signed-in user.
    #[serde(default)]
    pub members: Vec<Member>,
    /// Most recent message, used for list previews.
    #[serde(default)]
    pub last_message: Option<Message>,
    /// Picture URL (the peer's avatar for direct chats).
    #[serde(default, rename = "chatroom_pic_url")]
    pub picture_url: Option<String>,
}

impl Chatroom {
    /// Best-effort display name from the point of view of `own_user_id`.
    pub fn display_name(&self, own_user_id: &str) -> String {
        if let Some(name) = non_blank(self.name.as_deref()) {
            return name.to_owned();
        }

        self.members
            .iter()
            .find(|member| member.user_id != own_user_id)
            .and_then(|member| non_blank(member.display_name.as_deref()))
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| UNNAMED_CHATROOM.to_owned())
    }

    /// Preview text for chatroom lists.
    pub fn preview(&self) -> &str {
        self.last_message
            .as_ref()
            .map(|message| message.content.as_str())
            .unwrap_or(DRAFT_PREVIEW)
    }

    /// Whether this is the two-member chatroom between `own_user_id` and `contact_id`.
    pub fn is_direct_between(&self, own_user_id: &str, contact_id: &str) -> bool {
        self.members.len() == 2
            && self.has_member(own_user_id)
            && self.has_member(contact_id)
    }

    fn has_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|member| member.user_id == user_id)
    }
}

/// Message identifier.
///
/// History and list responses carry integer IDs assigned by the backend.
/// Optimistic entries and live frames without an ID use client strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    /// Backend-assigned row ID.
    Server(i64),
    /// Client-assigned ID.
    Client(String),
}

impl MessageId {
    /// Generate a fresh client-side ID.
    pub fn new_client() -> Self {
        Self::Client(Uuid::new_v4().to_string())
    }

    /// Whether the ID was assigned by a client.
    pub fn is_client(&self) -> bool {
        matches!(self, Self::Client(_))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => write!(f, "{id}"),
            Self::Client(id) => f.write_str(id),
        }
    }
}

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub chatroom_id: String,
    pub user_id: String,
    pub content: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
}

/// Contact search result. Lives only as long as the search dialog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub email: String,
}

/// Session lifecycle reported to frontends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionLifecycleState {
    /// No session has been started yet.
    Idle,
    /// Backend login sync is in flight.
    Authenticating,
    /// Login sync succeeded; chatroom commands are accepted.
    Ready,
    /// Session was torn down by sign-out.
    SignedOut,
    /// Critical failure; the session cannot be trusted to proceed.
    Fatal,
}

/// Live connection state for the selected chatroom.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Opening,
    Open,
}

/// Area an inline (non-fatal) error belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorScope {
    /// Chatroom list load failure.
    ChatroomList,
    /// Message history load failure.
    MessageHistory,
    /// Contact search failure.
    ContactSearch,
    /// Chatroom creation failure.
    ChatroomCreate,
    /// Message send failure.
    MessageSend,
}

impl ErrorScope {
    /// User-facing text shown inline for this scope.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::ChatroomList => "Failed to fetch chatrooms. Please try again.",
            Self::MessageHistory => "Failed to load messages. Please try again.",
            Self::ContactSearch => "Failed to search contacts",
            Self::ChatroomCreate => "Failed to create chatroom. Please try again.",
            Self::MessageSend => "Failed to send message",
        }
    }
}

/// Contact search indicator state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SearchStatus {
    /// Nothing typed (or query cleared).
    Idle,
    /// A query is scheduled or in flight.
    Searching,
    /// Last query returned at least one contact.
    Results,
    /// Last query completed with zero contacts.
    NoContacts,
    /// Last query failed.
    Failed,
}

/// Contact search dialog snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchSnapshot {
    pub open: bool,
    pub query: String,
    pub status: SearchStatus,
    pub contacts: Vec<Contact>,
    pub error: Option<String>,
}

/// Delivery state of a timeline entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Delivery {
    /// Appended locally and not yet seen on the live connection.
    Pending,
    /// Loaded from history or delivered by the live connection.
    Confirmed,
}

/// Message plus its delivery state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelineEntry {
    pub message: Message,
    pub delivery: Delivery,
}

/// Full message-history replacement for the selected chatroom.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelineSnapshot {
    /// Chatroom the entries belong to.
    pub chatroom_id: Option<String>,
    /// Entries in append order.
    pub entries: Vec<TimelineEntry>,
    /// Whether a history load is in flight.
    pub loading: bool,
    /// History load error text.
    pub error: Option<String>,
}

/// Selected chatroom and "new chat" mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SelectionSnapshot {
    pub chatroom_id: Option<String>,
    pub new_chat_mode: bool,
    /// Contact picked from search while its chatroom is being created.
    pub pending_contact: Option<Contact>,
}

/// Acknowledgement for `SessionCommand::SendMessage`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendAck {
    /// Original frontend transaction ID.
    pub client_txn_id: String,
    /// Target chatroom.
    pub chatroom_id: String,
    /// ID of the optimistic entry on success.
    pub message_id: Option<MessageId>,
    /// Stable error code on failure.
    pub error_code: Option<String>,
}

/// Command channel input accepted by the session controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionCommand {
    /// Run backend login sync for the identity's current user, then load chatrooms.
    Start,
    /// Reload the chatroom list.
    RefreshChatrooms,
    /// Select a chatroom from the list.
    SelectChatroom { chatroom_id: String },
    /// Open the new-chat search dialog.
    OpenSearch,
    /// Close the new-chat search dialog and discard its results.
    CloseSearch,
    /// Search input changed.
    SearchInput { text: String },
    /// Start (or resume) a direct chat with a search result.
    StartChatWith { contact: Contact },
    /// Send a message to the selected chatroom.
    SendMessage {
        /// Frontend-provided transaction ID, reused as the optimistic message ID.
        client_txn_id: String,
        /// Raw composed text; trimmed and limited before sending.
        content: String,
    },
    /// Tear the session down.
    SignOut,
}

/// Event channel output emitted by the session controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionEvent {
    /// Session lifecycle transition.
    StateChanged { state: SessionLifecycleState },
    /// Full chatroom list replacement.
    ChatroomListUpdated { chatrooms: Vec<Chatroom> },
    /// Selection or new-chat mode changed.
    SelectionChanged(SelectionSnapshot),
    /// Live connection transition.
    ConnectionChanged {
        chatroom_id: Option<String>,
        state: ConnectionState,
        /// Set when a reconnect is scheduled after a remote close.
        retry_in_ms: Option<u64>,
    },
    /// Timeline replacement for the selected chatroom.
    Timeline(TimelineSnapshot),
    /// Contact search dialog state.
    Search(SearchSnapshot),
    /// Send acknowledgement.
    SendAck(SendAck),
    /// Inline error set (`Some`) or cleared (`None`) for a scope.
    InlineError {
        scope: ErrorScope,
        message: Option<String>,
    },
    /// Session-blocking failure.
    FatalError { code: String, message: String },
    /// A command was rejected or its handler failed.
    CommandFailed {
        code: String,
        message: String,
        recoverable: bool,
    },
}

/// Parse an RFC 3339 or naive ISO-8601 timestamp. Naive values are UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{raw}'")))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn member(user_id: &str, display_name: Option<&str>) -> Member {
        Member {
            user_id: user_id.to_owned(),
            display_name: display_name.map(ToOwned::to_owned),
            email: None,
            profile_pic_url: None,
        }
    }

    fn chatroom(name: Option<&str>, members: Vec<Member>) -> Chatroom {
        Chatroom {
            id: "room-1".to_owned(),
            name: name.map(ToOwned::to_owned),
            members,
            last_message: None,
            picture_url: None,
        }
    }

    #[test]
    fn display_name_prefers_explicit_name() {
        let room = chatroom(
            Some("Team"),
            vec![member("alice", Some("Alice")), member("bob", Some("Bob"))],
        );
        assert_eq!(room.display_name("alice"), "Team");
    }

    #[test]
    fn blank_name_falls_back_to_other_member() {
        let room = chatroom(
            Some("   "),
            vec![member("alice", Some("Alice")), member("bob", Some("Bob"))],
        );
        assert_eq!(room.display_name("alice"), "Bob");
        assert_eq!(room.display_name("bob"), "Alice");
    }

    #[test]
    fn unnamed_when_peer_has_no_display_name() {
        let room = chatroom(None, vec![member("alice", None), member("bob", None)]);
        assert_eq!(room.display_name("alice"), UNNAMED_CHATROOM);
        assert_eq!(room.preview(), DRAFT_PREVIEW);
    }

    #[test]
    fn direct_chat_requires_exactly_both_members() {
        let direct = chatroom(None, vec![member("alice", None), member("bob", None)]);
        assert!(direct.is_direct_between("alice", "bob"));
        assert!(!direct.is_direct_between("alice", "carol"));

        let group = chatroom(
            None,
            vec![
                member("alice", None),
                member("bob", None),
                member("carol", None),
            ],
        );
        assert!(!group.is_direct_between("alice", "bob"));
    }

    #[test]
    fn decodes_backend_message_with_naive_timestamp() {
        let message: Message = serde_json::from_str(
            r#"{"id": 42, "chatroom_id": "r1", "user_id": "u1", "content": "hey", "created_at": "2024-03-01T10:15:30"}"#,
        )
        .expect("message should decode");

        assert_eq!(message.id, MessageId::Server(42));
        assert_eq!(
            message.created_at,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 30).unwrap()
        );
    }

    #[test]
    fn decodes_client_frame_with_rfc3339_timestamp() {
        let message: Message = serde_json::from_str(
            r#"{"id": "c-1", "chatroom_id": "r1", "user_id": "u1", "content": "yo", "created_at": "2024-03-01T10:15:30.250Z"}"#,
        )
        .expect("message should decode");

        assert_eq!(message.id, MessageId::Client("c-1".to_owned()));
        assert!(message.id.is_client());
    }

    #[test]
    fn rejects_unparseable_timestamp() {
        let err = serde_json::from_str::<Message>(
            r#"{"id": 1, "chatroom_id": "r1", "user_id": "u1", "content": "x", "created_at": "yesterday"}"#,
        )
        .expect_err("bad timestamp must fail");
        assert!(err.to_string().contains("invalid timestamp"));
    }

    #[test]
    fn chatroom_decodes_create_response_members_without_names() {
        let room: Chatroom = serde_json::from_str(
            r#"{"id": "r9", "name": "", "created_by": "alice", "members": [{"user_id": "alice"}, {"user_id": "bob"}], "last_message": null}"#,
        )
        .expect("chatroom should decode");

        assert_eq!(room.members.len(), 2);
        assert_eq!(room.members[1].display_name, None);
        assert_eq!(room.display_name("alice"), UNNAMED_CHATROOM);
    }
}

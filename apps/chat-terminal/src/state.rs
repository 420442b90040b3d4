//! View-state reducer for `chat-terminal`.

use std::collections::{HashMap, HashSet};

use chat_core::{
    Chatroom, ConnectionState, Contact, Delivery, ErrorScope, ScrollMetrics, ScrollTracker,
    SearchSnapshot, SearchStatus, SelectionSnapshot, SendAck, SessionEvent,
    SessionLifecycleState, TimelineSnapshot,
};
use tracing::{debug, trace, warn};

/// Virtual height of one rendered row, used to express row offsets as scroll metrics.
const ROW_HEIGHT: f64 = 20.0;

const SCOPE_ORDER: [ErrorScope; 5] = [
    ErrorScope::ChatroomList,
    ErrorScope::ChatroomCreate,
    ErrorScope::MessageHistory,
    ErrorScope::MessageSend,
    ErrorScope::ContactSearch,
];

/// Chatroom list row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatroomView {
    pub display_name: String,
    pub preview: String,
    pub is_selected: bool,
}

/// Timeline row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub sender: String,
    pub body: String,
    pub time: String,
    pub is_own: bool,
    pub pending: bool,
}

/// Contact search dialog as rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchView {
    pub query: String,
    pub status: SearchStatus,
    pub contacts: Vec<Contact>,
}

/// Full view snapshot produced after every state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalSnapshot {
    pub status_text: String,
    pub connection_text: Option<String>,
    pub sidebar_visible: bool,
    pub chatrooms: Vec<ChatroomView>,
    pub header: Option<String>,
    pub messages: Vec<MessageView>,
    pub loading: bool,
    pub more_above: bool,
    pub more_below: bool,
    pub search: Option<SearchView>,
    pub errors: Vec<String>,
    pub fatal_error: Option<String>,
    pub notice: Option<String>,
    pub can_send: bool,
}

/// Mutable view state fed by session events and local input.
#[derive(Debug, Clone)]
pub struct TerminalState {
    own_user_id: String,
    viewport_rows: usize,
    narrow_columns: u16,
    columns: u16,
    lifecycle: SessionLifecycleState,
    chatrooms: Vec<Chatroom>,
    selection: SelectionSnapshot,
    connection: ConnectionState,
    retry_in_ms: Option<u64>,
    timeline: Option<TimelineSnapshot>,
    scroll: ScrollTracker,
    scroll_top: usize,
    search: Option<SearchSnapshot>,
    inline_errors: HashMap<ErrorScope, String>,
    fatal_error: Option<String>,
    notice: Option<String>,
    pending_sends: HashSet<String>,
}

impl TerminalState {
    pub fn new(
        own_user_id: impl Into<String>,
        viewport_rows: usize,
        narrow_columns: u16,
        columns: u16,
    ) -> Self {
        Self {
            own_user_id: own_user_id.into(),
            viewport_rows: viewport_rows.max(1),
            narrow_columns,
            columns,
            lifecycle: SessionLifecycleState::Idle,
            chatrooms: Vec::new(),
            selection: SelectionSnapshot::default(),
            connection: ConnectionState::Closed,
            retry_in_ms: None,
            timeline: None,
            scroll: ScrollTracker::default(),
            scroll_top: 0,
            search: None,
            inline_errors: HashMap::new(),
            fatal_error: None,
            notice: None,
            pending_sends: HashSet::new(),
        }
    }

    pub fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::StateChanged { state } => {
                debug!(?state, "session state changed");
                self.lifecycle = state;
                if state == SessionLifecycleState::SignedOut {
                    self.pending_sends.clear();
                    self.inline_errors.clear();
                    self.notice = None;
                }
            }
            SessionEvent::ChatroomListUpdated { chatrooms } => {
                debug!(chatroom_count = chatrooms.len(), "chatroom list replaced");
                self.chatrooms = chatrooms;
            }
            SessionEvent::SelectionChanged(selection) => {
                if selection.chatroom_id != self.selection.chatroom_id {
                    self.connection = ConnectionState::Closed;
                    self.retry_in_ms = None;
                }
                self.selection = selection;
            }
            SessionEvent::ConnectionChanged {
                chatroom_id,
                state,
                retry_in_ms,
            } => {
                if self.selection.chatroom_id == chatroom_id {
                    self.connection = state;
                    self.retry_in_ms = retry_in_ms;
                } else {
                    trace!(?chatroom_id, ?state, "connection change for unselected chatroom");
                }
            }
            SessionEvent::Timeline(snapshot) => self.apply_timeline(snapshot),
            SessionEvent::Search(snapshot) => {
                self.search = snapshot.open.then_some(snapshot);
            }
            SessionEvent::SendAck(ack) => self.handle_send_ack(ack),
            SessionEvent::InlineError { scope, message } => match message {
                Some(message) => {
                    self.inline_errors.insert(scope, message);
                }
                None => {
                    self.inline_errors.remove(&scope);
                }
            },
            SessionEvent::FatalError { code, message } => {
                warn!(%code, "fatal session error");
                self.fatal_error = Some(message);
            }
            SessionEvent::CommandFailed { code, message, .. } => {
                debug!(%code, "command failed");
                self.notice = Some(message);
            }
        }
    }

    pub fn set_notice(&mut self, notice: impl Into<String>) {
        self.notice = Some(notice.into());
    }

    pub fn clear_notice(&mut self) {
        self.notice = None;
    }

    pub fn mark_send_requested(&mut self, client_txn_id: String) {
        self.pending_sends.insert(client_txn_id);
    }

    pub fn selected_chatroom_id(&self) -> Option<&str> {
        self.selection.chatroom_id.as_deref()
    }

    /// Chatroom ID at a zero-based list position.
    pub fn chatroom_id_at(&self, index: usize) -> Option<String> {
        self.chatrooms.get(index).map(|chatroom| chatroom.id.clone())
    }

    /// Contact at a zero-based position in the open search dialog.
    pub fn contact_at(&self, index: usize) -> Option<Contact> {
        self.search.as_ref()?.contacts.get(index).cloned()
    }

    pub fn scroll_up(&mut self, rows: usize) {
        self.scroll_top = self.scroll_top.saturating_sub(rows);
        self.scroll.on_scroll(self.metrics());
    }

    pub fn scroll_down(&mut self, rows: usize) {
        self.scroll_top = (self.scroll_top + rows).min(self.bottom_row());
        self.scroll.on_scroll(self.metrics());
    }

    /// The chatroom list is always shown on wide terminals. On narrow ones it
    /// is shown only while nothing is selected.
    pub fn sidebar_visible(&self) -> bool {
        self.columns >= self.narrow_columns || self.selection.chatroom_id.is_none()
    }

    pub fn snapshot(&self) -> TerminalSnapshot {
        let entries = self
            .timeline
            .as_ref()
            .map(|timeline| timeline.entries.as_slice())
            .unwrap_or_default();
        let end = (self.scroll_top + self.viewport_rows).min(entries.len());
        let start = self.scroll_top.min(end);
        let selected = self.selected_chatroom();

        let messages = entries[start..end]
            .iter()
            .map(|entry| MessageView {
                sender: self.sender_name(selected, &entry.message.user_id),
                body: entry.message.content.clone(),
                time: entry.message.created_at.format("%H:%M").to_string(),
                is_own: entry.message.user_id == self.own_user_id,
                pending: entry.delivery == Delivery::Pending,
            })
            .collect();

        let mut errors: Vec<String> = SCOPE_ORDER
            .iter()
            .filter_map(|scope| self.inline_errors.get(scope).cloned())
            .collect();
        if let Some(error) = self.timeline.as_ref().and_then(|timeline| timeline.error.clone())
            && !errors.contains(&error)
        {
            errors.push(error);
        }

        TerminalSnapshot {
            status_text: self.status_text(),
            connection_text: self.connection_text(),
            sidebar_visible: self.sidebar_visible(),
            chatrooms: self
                .chatrooms
                .iter()
                .map(|chatroom| ChatroomView {
                    display_name: chatroom.display_name(&self.own_user_id),
                    preview: chatroom.preview().to_owned(),
                    is_selected: self.selection.chatroom_id.as_deref()
                        == Some(chatroom.id.as_str()),
                })
                .collect(),
            header: self.header(selected),
            messages,
            loading: self.timeline.as_ref().is_some_and(|timeline| timeline.loading),
            more_above: start > 0,
            more_below: end < entries.len(),
            search: self.search.as_ref().map(|search| SearchView {
                query: search.query.clone(),
                status: search.status,
                contacts: search.contacts.clone(),
            }),
            errors,
            fatal_error: self.fatal_error.clone(),
            notice: self.notice.clone(),
            can_send: self.lifecycle == SessionLifecycleState::Ready
                && self.selection.chatroom_id.is_some(),
        }
    }

    fn apply_timeline(&mut self, snapshot: TimelineSnapshot) {
        let switched = self
            .timeline
            .as_ref()
            .is_none_or(|previous| previous.chatroom_id != snapshot.chatroom_id);
        if switched {
            self.scroll.reset();
            self.scroll_top = 0;
        }

        trace!(
            chatroom_id = snapshot.chatroom_id.as_deref().unwrap_or(""),
            entries = snapshot.entries.len(),
            loading = snapshot.loading,
            "timeline updated"
        );
        self.timeline = Some(snapshot);

        let metrics = self.metrics();
        match self.scroll.on_content_changed(metrics) {
            Some(offset) => self.scroll_top = (offset / ROW_HEIGHT).round() as usize,
            None => self.scroll_top = self.scroll_top.min(self.bottom_row()),
        }
    }

    fn handle_send_ack(&mut self, ack: SendAck) {
        if !self.pending_sends.remove(&ack.client_txn_id) {
            trace!(client_txn_id = %ack.client_txn_id, "ack for unknown send");
        }
        if let Some(code) = ack.error_code {
            self.notice = Some(format!("Message was not sent ({code})."));
        }
    }

    fn entry_count(&self) -> usize {
        self.timeline
            .as_ref()
            .map_or(0, |timeline| timeline.entries.len())
    }

    fn bottom_row(&self) -> usize {
        self.entry_count().saturating_sub(self.viewport_rows)
    }

    fn metrics(&self) -> ScrollMetrics {
        ScrollMetrics {
            scroll_height: self.entry_count() as f64 * ROW_HEIGHT,
            scroll_top: self.scroll_top as f64 * ROW_HEIGHT,
            client_height: self.viewport_rows as f64 * ROW_HEIGHT,
        }
    }

    fn selected_chatroom(&self) -> Option<&Chatroom> {
        let chatroom_id = self.selection.chatroom_id.as_deref()?;
        self.chatrooms
            .iter()
            .find(|chatroom| chatroom.id == chatroom_id)
    }

    fn sender_name(&self, chatroom: Option<&Chatroom>, user_id: &str) -> String {
        if user_id == self.own_user_id {
            return "you".to_owned();
        }
        chatroom
            .and_then(|chatroom| {
                chatroom
                    .members
                    .iter()
                    .find(|member| member.user_id == user_id)
            })
            .and_then(|member| member.display_name.clone())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| user_id.to_owned())
    }

    fn header(&self, selected: Option<&Chatroom>) -> Option<String> {
        if self.selection.new_chat_mode {
            let target = self
                .selection
                .pending_contact
                .as_ref()
                .map(|contact| contact.display_name.as_str())
                .unwrap_or("new chat");
            return Some(format!("Starting chat with {target}"));
        }
        selected.map(|chatroom| chatroom.display_name(&self.own_user_id))
    }

    fn status_text(&self) -> String {
        match self.lifecycle {
            SessionLifecycleState::Idle => "Not signed in",
            SessionLifecycleState::Authenticating => "Signing in...",
            SessionLifecycleState::Ready => "Ready",
            SessionLifecycleState::SignedOut => "Signed out",
            SessionLifecycleState::Fatal => "Unavailable",
        }
        .to_owned()
    }

    fn connection_text(&self) -> Option<String> {
        self.selection.chatroom_id.as_ref()?;
        let text = match (self.connection, self.retry_in_ms) {
            (ConnectionState::Open, _) => "live".to_owned(),
            (ConnectionState::Opening, _) => "connecting".to_owned(),
            (ConnectionState::Closed, Some(ms)) => format!("offline, retrying in {ms} ms"),
            (ConnectionState::Closed, None) => "offline".to_owned(),
        };
        Some(text)
    }
}

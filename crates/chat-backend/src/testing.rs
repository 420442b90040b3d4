//! In-process fakes for the backend seams. Latency is simulated with
//! `tokio::time::sleep`, so tests run on a paused clock.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use chat_core::{
    ChatApi, ChatError, ChatErrorCategory, Chatroom, Contact, Credential, LiveConnection,
    LiveTransport, Member, Message, MessageId, User,
};
use chrono::Utc;
use tokio::sync::mpsc;

pub(crate) fn user(id: &str) -> User {
    User {
        id: id.to_owned(),
        display_name: id.to_uppercase(),
        photo_url: None,
    }
}

pub(crate) fn contact(id: &str) -> Contact {
    Contact {
        id: id.to_owned(),
        display_name: id.to_uppercase(),
        email: format!("{id}@example.org"),
    }
}

pub(crate) fn direct_chatroom(id: &str, own: &str, other: &str) -> Chatroom {
    Chatroom {
        id: id.to_owned(),
        name: None,
        members: [own, other]
            .into_iter()
            .map(|user_id| Member {
                user_id: user_id.to_owned(),
                display_name: Some(user_id.to_uppercase()),
                email: None,
                profile_pic_url: None,
            })
            .collect(),
        last_message: None,
        picture_url: None,
    }
}

pub(crate) fn server_message(id: i64, chatroom_id: &str, user_id: &str, content: &str) -> Message {
    Message {
        id: MessageId::Server(id),
        chatroom_id: chatroom_id.to_owned(),
        user_id: user_id.to_owned(),
        content: content.to_owned(),
        created_at: Utc::now(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ApiCall {
    SyncLogin,
    ListChatrooms,
    CreateChatroom { contact_id: String },
    ListMessages { chatroom_id: String },
    SendMessage { chatroom_id: String, content: String },
    SearchContacts { query: String },
}

#[derive(Default)]
struct FakeApiState {
    calls: Vec<ApiCall>,
    tokens: Vec<String>,
    chatrooms: Vec<Chatroom>,
    histories: HashMap<String, Vec<Message>>,
    history_delays: HashMap<String, Duration>,
    contacts: HashMap<String, Vec<Contact>>,
    created: HashMap<String, Chatroom>,
    search_delay: Duration,
    failing: HashSet<&'static str>,
}

/// Scriptable `ChatApi`. Clones share state.
#[derive(Clone, Default)]
pub(crate) struct FakeApi {
    state: Arc<Mutex<FakeApiState>>,
}

impl FakeApi {
    fn with_state<R>(&self, f: impl FnOnce(&mut FakeApiState) -> R) -> R {
        let mut state = self.state.lock().expect("fake api lock");
        f(&mut state)
    }

    pub(crate) fn set_chatrooms(&self, chatrooms: Vec<Chatroom>) {
        self.with_state(|state| state.chatrooms = chatrooms);
    }

    pub(crate) fn set_history(&self, chatroom_id: &str, messages: Vec<Message>) {
        self.with_state(|state| {
            state.histories.insert(chatroom_id.to_owned(), messages);
        });
    }

    pub(crate) fn set_history_delay(&self, chatroom_id: &str, delay: Duration) {
        self.with_state(|state| {
            state.history_delays.insert(chatroom_id.to_owned(), delay);
        });
    }

    pub(crate) fn set_contacts(&self, query: &str, contacts: Vec<Contact>) {
        self.with_state(|state| {
            state.contacts.insert(query.to_owned(), contacts);
        });
    }

    pub(crate) fn set_search_delay(&self, delay: Duration) {
        self.with_state(|state| state.search_delay = delay);
    }

    pub(crate) fn set_created(&self, contact_id: &str, chatroom: Chatroom) {
        self.with_state(|state| {
            state.created.insert(contact_id.to_owned(), chatroom);
        });
    }

    /// Make every call to `operation` fail with a 500-style error.
    pub(crate) fn fail(&self, operation: &'static str) {
        self.with_state(|state| {
            state.failing.insert(operation);
        });
    }

    pub(crate) fn calls(&self) -> Vec<ApiCall> {
        self.with_state(|state| state.calls.clone())
    }

    /// Bearer tokens in the order calls were made.
    pub(crate) fn tokens(&self) -> Vec<String> {
        self.with_state(|state| state.tokens.clone())
    }

    fn record(
        &self,
        credential: &Credential,
        call: ApiCall,
        operation: &'static str,
    ) -> Result<(), ChatError> {
        self.with_state(|state| {
            state.calls.push(call);
            state.tokens.push(credential.token.clone());
            if state.failing.contains(operation) {
                Err(ChatError::new(
                    ChatErrorCategory::Network,
                    "http_status",
                    format!("{operation} failed"),
                ))
            } else {
                Ok(())
            }
        })
    }
}

impl ChatApi for FakeApi {
    async fn sync_login(&self, credential: &Credential) -> Result<(), ChatError> {
        self.record(credential, ApiCall::SyncLogin, "sync_login")
    }

    async fn list_chatrooms(&self, credential: &Credential) -> Result<Vec<Chatroom>, ChatError> {
        self.record(credential, ApiCall::ListChatrooms, "list_chatrooms")?;
        Ok(self.with_state(|state| state.chatrooms.clone()))
    }

    async fn create_chatroom(
        &self,
        credential: &Credential,
        contact_id: &str,
    ) -> Result<Chatroom, ChatError> {
        self.record(
            credential,
            ApiCall::CreateChatroom {
                contact_id: contact_id.to_owned(),
            },
            "create_chatroom",
        )?;
        Ok(self.with_state(|state| {
            state.created.get(contact_id).cloned().unwrap_or_else(|| {
                direct_chatroom(
                    &format!("room-{contact_id}"),
                    &credential.user_id,
                    contact_id,
                )
            })
        }))
    }

    async fn list_messages(
        &self,
        credential: &Credential,
        chatroom_id: &str,
    ) -> Result<Vec<Message>, ChatError> {
        let outcome = self.record(
            credential,
            ApiCall::ListMessages {
                chatroom_id: chatroom_id.to_owned(),
            },
            "list_messages",
        );
        let delay = self.with_state(|state| {
            state
                .history_delays
                .get(chatroom_id)
                .copied()
                .unwrap_or_default()
        });
        tokio::time::sleep(delay).await;

        outcome?;
        Ok(self.with_state(|state| {
            state
                .histories
                .get(chatroom_id)
                .cloned()
                .unwrap_or_default()
        }))
    }

    async fn send_message(
        &self,
        credential: &Credential,
        chatroom_id: &str,
        content: &str,
    ) -> Result<(), ChatError> {
        self.record(
            credential,
            ApiCall::SendMessage {
                chatroom_id: chatroom_id.to_owned(),
                content: content.to_owned(),
            },
            "send_message",
        )
    }

    async fn search_contacts(
        &self,
        credential: &Credential,
        query: &str,
    ) -> Result<Vec<Contact>, ChatError> {
        let outcome = self.record(
            credential,
            ApiCall::SearchContacts {
                query: query.to_owned(),
            },
            "search_contacts",
        );
        let delay = self.with_state(|state| state.search_delay);
        tokio::time::sleep(delay).await;

        outcome?;
        Ok(self.with_state(|state| state.contacts.get(query).cloned().unwrap_or_default()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TransportLog {
    Connect(String),
    Opened(String),
    Sent(String, String),
    Closed(String),
    RemoteClosed(String),
}

#[derive(Default)]
struct FakeTransportState {
    log: Vec<TransportLog>,
    open: usize,
    max_open: usize,
    connect_delay: Duration,
    failing_connects: HashMap<String, u32>,
    peers: HashMap<String, mpsc::UnboundedSender<Option<String>>>,
}

/// Scriptable `LiveTransport` that records an ordered connect/close log.
#[derive(Clone, Default)]
pub(crate) struct FakeTransport {
    state: Arc<Mutex<FakeTransportState>>,
}

impl FakeTransport {
    fn with_state<R>(&self, f: impl FnOnce(&mut FakeTransportState) -> R) -> R {
        let mut state = self.state.lock().expect("fake transport lock");
        f(&mut state)
    }

    pub(crate) fn log(&self) -> Vec<TransportLog> {
        self.with_state(|state| state.log.clone())
    }

    pub(crate) fn max_open(&self) -> usize {
        self.with_state(|state| state.max_open)
    }

    pub(crate) fn open_now(&self) -> usize {
        self.with_state(|state| state.open)
    }

    pub(crate) fn set_connect_delay(&self, delay: Duration) {
        self.with_state(|state| state.connect_delay = delay);
    }

    pub(crate) fn fail_connects(&self, chatroom_id: &str, times: u32) {
        self.with_state(|state| {
            state.failing_connects.insert(chatroom_id.to_owned(), times);
        });
    }

    /// Deliver a raw frame on the newest connection for `chatroom_id`.
    pub(crate) fn push_frame(&self, chatroom_id: &str, raw: impl Into<String>) -> bool {
        self.with_state(|state| {
            state
                .peers
                .get(chatroom_id)
                .is_some_and(|peer| peer.send(Some(raw.into())).is_ok())
        })
    }

    pub(crate) fn close_remote(&self, chatroom_id: &str) -> bool {
        self.with_state(|state| {
            state
                .peers
                .get(chatroom_id)
                .is_some_and(|peer| peer.send(None).is_ok())
        })
    }

    pub(crate) fn count(&self, pred: impl Fn(&TransportLog) -> bool) -> usize {
        self.log().iter().filter(|entry| pred(entry)).count()
    }
}

impl LiveTransport for FakeTransport {
    type Connection = FakeConnection;

    async fn connect(&self, chatroom_id: &str) -> Result<FakeConnection, ChatError> {
        let delay = self.with_state(|state| {
            state.log.push(TransportLog::Connect(chatroom_id.to_owned()));
            state.connect_delay
        });
        tokio::time::sleep(delay).await;

        self.with_state(|state| {
            if let Some(remaining) = state.failing_connects.get_mut(chatroom_id)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(ChatError::new(
                    ChatErrorCategory::Transport,
                    "live_connect_failed",
                    "connection refused",
                ));
            }

            let (peer, inbound) = mpsc::unbounded_channel();
            state.peers.insert(chatroom_id.to_owned(), peer);
            state.open += 1;
            state.max_open = state.max_open.max(state.open);
            state.log.push(TransportLog::Opened(chatroom_id.to_owned()));
            Ok(FakeConnection {
                chatroom_id: chatroom_id.to_owned(),
                inbound,
                transport: self.clone(),
                closed: false,
            })
        })
    }
}

pub(crate) struct FakeConnection {
    chatroom_id: String,
    inbound: mpsc::UnboundedReceiver<Option<String>>,
    transport: FakeTransport,
    closed: bool,
}

impl FakeConnection {
    fn mark_closed(&mut self, entry: TransportLog) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.transport.with_state(|state| {
            state.open -= 1;
            state.log.push(entry);
        });
    }
}

impl LiveConnection for FakeConnection {
    async fn next_frame(&mut self) -> Option<Result<String, ChatError>> {
        match self.inbound.recv().await {
            Some(Some(raw)) => Some(Ok(raw)),
            Some(None) | None => {
                let entry = TransportLog::RemoteClosed(self.chatroom_id.clone());
                self.mark_closed(entry);
                None
            }
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), ChatError> {
        let entry = TransportLog::Sent(self.chatroom_id.clone(), text);
        self.transport.with_state(|state| state.log.push(entry));
        Ok(())
    }

    async fn close(&mut self) {
        let entry = TransportLog::Closed(self.chatroom_id.clone());
        self.mark_closed(entry);
    }
}

use std::{future::Future, sync::Arc, time::Duration};

use chat_core::{
    AppendOutcome, ChatApi, ChatError, Chatroom, ChatroomListStore, Contact,
    ContactSearch, CreateOutcome, Credential, DEFAULT_MAX_ITEMS, DEFAULT_QUIET_PERIOD,
    ErrorScope, EventStream, LOGIN_SYNC_FAILED_MESSAGE, LiveTransport, LoadTicket, Message,
    MessageId, MessageStore, ReconnectPolicy, SearchAction, SelectionSnapshot, SendAck,
    SendOutcome, SessionChannelError, SessionChannels, SessionCommand, SessionEvent,
    SessionStateMachine, User, compose_message_content, encode_live_frame, normalize_chatrooms,
    normalize_history, normalize_send_outcome, parse_live_frame,
    normalization::{clear_inline_error, inline_error, normalize_fatal_error},
};
use chat_platform::{IdentityProvider, current_credential};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};

use crate::connection::{ConnectionManager, LinkEvent, LinkUpdate};

const COMMAND_BUFFER: usize = 128;
const EVENT_BUFFER: usize = 512;

/// Tunables for one session controller.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub search_quiet_period: Duration,
    pub max_timeline_items: usize,
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            search_quiet_period: DEFAULT_QUIET_PERIOD,
            max_timeline_items: DEFAULT_MAX_ITEMS,
            reconnect: ReconnectPolicy::None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionHandle {
    channels: SessionChannels,
}

impl SessionHandle {
    pub async fn send(&self, command: SessionCommand) -> Result<(), SessionChannelError> {
        self.channels.send_command(command).await
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }
}

/// Spawn the session controller task and return its handle.
///
/// The task ends once every handle has been dropped.
pub fn spawn_session<A, T, I>(
    config: SessionConfig,
    api: Arc<A>,
    transport: Arc<T>,
    identity: Arc<I>,
) -> SessionHandle
where
    A: ChatApi,
    T: LiveTransport,
    I: IdentityProvider + 'static,
{
    let (channels, command_rx) = SessionChannels::new(COMMAND_BUFFER, EVENT_BUFFER);
    let runtime = SessionRuntime::new(
        config,
        channels.event_sender(),
        command_rx,
        api,
        transport,
        identity,
    );
    tokio::spawn(async move {
        runtime.run().await;
    });

    SessionHandle { channels }
}

/// Results posted back to the controller by spawned work.
enum Completion {
    LoginSynced {
        session: u64,
        result: Result<(), ChatError>,
    },
    ChatroomsLoaded {
        generation: u64,
        result: Result<Vec<Chatroom>, ChatError>,
    },
    ChatroomCreated {
        session: u64,
        contact: Contact,
        result: Result<Chatroom, ChatError>,
    },
    HistoryLoaded {
        ticket: LoadTicket,
        result: Result<Vec<Message>, ChatError>,
    },
    MessageSent {
        session: u64,
        chatroom_id: String,
        client_txn_id: String,
        content: String,
        result: Result<(), ChatError>,
    },
    SearchDue {
        token: u64,
    },
    SearchFinished {
        token: u64,
        result: Result<Vec<Contact>, ChatError>,
    },
}

enum Step {
    Command(Option<SessionCommand>),
    Completion(Completion),
    Link(LinkEvent),
}

struct SessionRuntime<A, T: LiveTransport, I> {
    events: broadcast::Sender<SessionEvent>,
    command_rx: mpsc::Receiver<SessionCommand>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    api: Arc<A>,
    identity: Arc<I>,
    state_machine: SessionStateMachine,
    session: u64,
    user: Option<User>,
    chatrooms: ChatroomListStore,
    messages: MessageStore,
    search: ContactSearch,
    search_timer: Option<JoinHandle<()>>,
    connection: ConnectionManager<T>,
    selection: SelectionSnapshot,
}

impl<A, T, I> SessionRuntime<A, T, I>
where
    A: ChatApi,
    T: LiveTransport,
    I: IdentityProvider + 'static,
{
    fn new(
        config: SessionConfig,
        events: broadcast::Sender<SessionEvent>,
        command_rx: mpsc::Receiver<SessionCommand>,
        api: Arc<A>,
        transport: Arc<T>,
        identity: Arc<I>,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (connection, link_rx) = ConnectionManager::new(transport, config.reconnect);
        Self {
            events,
            command_rx,
            completion_tx,
            completion_rx,
            link_rx,
            api,
            identity,
            state_machine: SessionStateMachine::default(),
            session: 0,
            user: None,
            chatrooms: ChatroomListStore::default(),
            messages: MessageStore::new(config.max_timeline_items),
            search: ContactSearch::new(config.search_quiet_period),
            search_timer: None,
            connection,
            selection: SelectionSnapshot::default(),
        }
    }

    async fn run(mut self) {
        loop {
            let step = tokio::select! {
                command = self.command_rx.recv() => Step::Command(command),
                Some(completion) = self.completion_rx.recv() => Step::Completion(completion),
                Some(event) = self.link_rx.recv() => Step::Link(event),
            };

            match step {
                Step::Command(Some(command)) => self.dispatch(command),
                Step::Command(None) => break,
                Step::Completion(completion) => self.handle_completion(completion),
                Step::Link(event) => self.handle_link_event(event),
            }
        }

        debug!("session command channel closed, shutting down");
        self.cancel_search_timer();
        self.connection.close();
    }

    fn dispatch(&mut self, command: SessionCommand) {
        let send_txn = match &command {
            SessionCommand::SendMessage { client_txn_id, .. } => Some(client_txn_id.clone()),
            _ => None,
        };

        if let Err(err) = self.handle_command(command) {
            debug!(code = %err.code, message = %err.message, "command rejected");
            if let Some(client_txn_id) = send_txn {
                let chatroom_id = self.selection.chatroom_id.clone().unwrap_or_default();
                self.emit(normalize_send_outcome(
                    client_txn_id,
                    chatroom_id,
                    SendOutcome::Failure { error: err },
                ));
                return;
            }
            self.emit(SessionEvent::CommandFailed {
                recoverable: err.is_recoverable(),
                code: err.code,
                message: err.message,
            });
        }
    }

    fn handle_command(&mut self, command: SessionCommand) -> Result<(), ChatError> {
        match command {
            SessionCommand::Start => return self.handle_start(),
            SessionCommand::SignOut => return self.handle_sign_out(),
            ref other => {
                self.state_machine.apply(other)?;
            }
        }

        match command {
            SessionCommand::RefreshChatrooms => self.load_chatrooms(),
            SessionCommand::SelectChatroom { chatroom_id } => self.select_chatroom(chatroom_id),
            SessionCommand::OpenSearch => {
                self.cancel_search_timer();
                self.search.open();
                self.emit_search();
                Ok(())
            }
            SessionCommand::CloseSearch => {
                self.close_search();
                Ok(())
            }
            SessionCommand::SearchInput { text } => {
                self.handle_search_input(&text);
                Ok(())
            }
            SessionCommand::StartChatWith { contact } => self.handle_start_chat_with(contact),
            SessionCommand::SendMessage {
                client_txn_id,
                content,
            } => self.handle_send_message(client_txn_id, content),
            SessionCommand::Start | SessionCommand::SignOut => Ok(()),
        }
    }

    fn handle_start(&mut self) -> Result<(), ChatError> {
        let (candidate, events) = self.validate_transition(SessionCommand::Start)?;
        let (user, credential) = current_credential(self.identity.as_ref())?;
        self.commit_transition(candidate, events);

        info!(user_id = %user.id, "starting session");
        self.user = Some(user);

        let api = self.api.clone();
        let session = self.session;
        self.spawn_completion(async move {
            let result = api.sync_login(&credential).await;
            Completion::LoginSynced { session, result }
        });
        Ok(())
    }

    fn handle_sign_out(&mut self) -> Result<(), ChatError> {
        let (candidate, events) = self.validate_transition(SessionCommand::SignOut)?;

        self.session += 1;
        self.cancel_search_timer();
        if let Some(event) = self.connection.close() {
            self.emit(event);
        }
        self.chatrooms.clear();
        self.messages.clear();
        self.search.close();
        self.selection = SelectionSnapshot::default();
        self.user = None;
        self.commit_transition(candidate, events);

        info!("session signed out");
        self.emit(SessionEvent::ChatroomListUpdated {
            chatrooms: Vec::new(),
        });
        self.emit_selection();
        self.emit_timeline();
        self.emit_search();
        Ok(())
    }

    fn load_chatrooms(&mut self) -> Result<(), ChatError> {
        let credential = self.require_credential()?;
        let generation = self.chatrooms.begin_load();
        debug!(generation, "loading chatrooms");

        let api = self.api.clone();
        self.spawn_completion(async move {
            let result = api.list_chatrooms(&credential).await;
            Completion::ChatroomsLoaded { generation, result }
        });
        Ok(())
    }

    /// Clear new-chat mode, rebind the live connection, then reload history.
    fn select_chatroom(&mut self, chatroom_id: String) -> Result<(), ChatError> {
        if self.chatrooms.get(&chatroom_id).is_none() {
            return Err(ChatError::unknown_chatroom(&chatroom_id));
        }
        let credential = self.require_credential()?;

        let was_new_chat = self.selection.new_chat_mode || self.selection.pending_contact.is_some();
        self.selection.new_chat_mode = false;
        self.selection.pending_contact = None;

        if self.selection.chatroom_id.as_deref() == Some(chatroom_id.as_str())
            && self.connection.is_active_for(&chatroom_id)
        {
            trace!(chatroom_id = %chatroom_id, "chatroom already selected");
            if was_new_chat {
                self.emit_selection();
            }
            return Ok(());
        }

        info!(chatroom_id = %chatroom_id, "selecting chatroom");
        self.selection.chatroom_id = Some(chatroom_id.clone());
        self.emit_selection();

        for event in self.connection.rebind(&chatroom_id) {
            self.emit(event);
        }

        let ticket = self.messages.begin_load(&chatroom_id);
        self.emit_timeline();

        let api = self.api.clone();
        self.spawn_completion(async move {
            let result = api.list_messages(&credential, &ticket.chatroom_id).await;
            Completion::HistoryLoaded { ticket, result }
        });
        Ok(())
    }

    fn handle_search_input(&mut self, text: &str) {
        self.cancel_search_timer();
        match self.search.on_input(text) {
            SearchAction::Cleared => {
                self.emit_search();
                self.emit(clear_inline_error(ErrorScope::ContactSearch));
            }
            SearchAction::Scheduled(request) => {
                self.emit_search();
                trace!(token = request.token, "search scheduled");
                let completions = self.completion_tx.clone();
                self.search_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(request.delay).await;
                    let _ = completions.send(Completion::SearchDue {
                        token: request.token,
                    });
                }));
            }
        }
    }

    fn close_search(&mut self) {
        self.cancel_search_timer();
        self.search.close();
        self.emit_search();
        self.emit(clear_inline_error(ErrorScope::ContactSearch));
    }

    fn handle_start_chat_with(&mut self, contact: Contact) -> Result<(), ChatError> {
        let credential = self.require_credential()?;
        self.close_search();

        self.selection.new_chat_mode = true;
        self.selection.pending_contact = Some(contact.clone());
        self.emit_selection();

        let existing = self
            .chatrooms
            .find_direct_with(&credential.user_id, &contact.id)
            .map(|chatroom| chatroom.id.clone());
        if let Some(chatroom_id) = existing {
            debug!(contact_id = %contact.id, chatroom_id = %chatroom_id, "reusing direct chatroom");
            self.chatrooms.clear_create_error();
            return self.select_chatroom(chatroom_id);
        }

        debug!(contact_id = %contact.id, "creating chatroom");
        let api = self.api.clone();
        let session = self.session;
        self.spawn_completion(async move {
            let result = api.create_chatroom(&credential, &contact.id).await;
            Completion::ChatroomCreated {
                session,
                contact,
                result,
            }
        });
        Ok(())
    }

    fn handle_send_message(&mut self, client_txn_id: String, content: String) -> Result<(), ChatError> {
        let chatroom_id = self
            .selection
            .chatroom_id
            .clone()
            .ok_or_else(|| ChatError::no_chatroom_selected("send_message"))?;
        let content = compose_message_content(&content).ok_or_else(ChatError::empty_message)?;
        let credential = self.require_credential()?;

        let api = self.api.clone();
        let session = self.session;
        self.spawn_completion(async move {
            let result = api.send_message(&credential, &chatroom_id, &content).await;
            Completion::MessageSent {
                session,
                chatroom_id,
                client_txn_id,
                content,
                result,
            }
        });
        Ok(())
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::LoginSynced { session, result } => self.on_login_synced(session, result),
            Completion::ChatroomsLoaded { generation, result } => {
                self.on_chatrooms_loaded(generation, result)
            }
            Completion::ChatroomCreated {
                session,
                contact,
                result,
            } => self.on_chatroom_created(session, contact, result),
            Completion::HistoryLoaded { ticket, result } => self.on_history_loaded(ticket, result),
            Completion::MessageSent {
                session,
                chatroom_id,
                client_txn_id,
                content,
                result,
            } => self.on_message_sent(session, chatroom_id, client_txn_id, content, result),
            Completion::SearchDue { token } => self.on_search_due(token),
            Completion::SearchFinished { token, result } => self.on_search_finished(token, result),
        }
    }

    fn on_login_synced(&mut self, session: u64, result: Result<(), ChatError>) {
        if session != self.session {
            trace!(session, "ignoring login result from a previous session");
            return;
        }

        let Ok(state_event) = self.state_machine.on_login_result(result.is_ok()) else {
            return;
        };
        self.emit(state_event);

        match result {
            Ok(()) => {
                info!("login sync complete");
                if let Err(err) = self.load_chatrooms() {
                    warn!(code = %err.code, "could not load chatrooms after login");
                }
            }
            Err(err) => {
                warn!(code = %err.code, message = %err.message, "login sync failed");
                self.emit(normalize_fatal_error(ChatError::new(
                    err.category,
                    err.code,
                    LOGIN_SYNC_FAILED_MESSAGE,
                )));
            }
        }
    }

    fn on_chatrooms_loaded(&mut self, generation: u64, result: Result<Vec<Chatroom>, ChatError>) {
        let result = result.map(normalize_chatrooms).map_err(|err| {
            warn!(code = %err.code, message = %err.message, "chatroom list load failed");
            ErrorScope::ChatroomList.user_message().to_owned()
        });
        let succeeded = result.is_ok();

        if !self.chatrooms.finish_load(generation, result) {
            trace!(generation, "dropping superseded chatroom list");
            return;
        }

        if succeeded {
            self.emit(SessionEvent::ChatroomListUpdated {
                chatrooms: self.chatrooms.chatrooms().to_vec(),
            });
            self.emit(clear_inline_error(ErrorScope::ChatroomList));
        } else {
            self.emit(inline_error(ErrorScope::ChatroomList));
        }
    }

    fn on_chatroom_created(
        &mut self,
        session: u64,
        contact: Contact,
        result: Result<Chatroom, ChatError>,
    ) {
        if session != self.session {
            return;
        }
        let still_pending = self
            .selection
            .pending_contact
            .as_ref()
            .is_some_and(|pending| pending.id == contact.id);

        match result {
            Ok(chatroom) => {
                let outcome = self.chatrooms.apply_created(chatroom);
                if matches!(outcome, CreateOutcome::Inserted(_)) {
                    self.emit(SessionEvent::ChatroomListUpdated {
                        chatrooms: self.chatrooms.chatrooms().to_vec(),
                    });
                }
                self.emit(clear_inline_error(ErrorScope::ChatroomCreate));

                if !still_pending {
                    debug!(contact_id = %contact.id, "chatroom created after selection moved on");
                    return;
                }
                if let Err(err) = self.select_chatroom(outcome.chatroom().id.clone()) {
                    self.emit(SessionEvent::CommandFailed {
                        recoverable: err.is_recoverable(),
                        code: err.code,
                        message: err.message,
                    });
                }
            }
            Err(err) => {
                warn!(contact_id = %contact.id, code = %err.code, "chatroom create failed");
                let message = ErrorScope::ChatroomCreate.user_message();
                self.chatrooms.fail_create(message);
                self.emit(inline_error(ErrorScope::ChatroomCreate));
                if still_pending {
                    self.selection.pending_contact = None;
                    self.emit_selection();
                }
            }
        }
    }

    fn on_history_loaded(&mut self, ticket: LoadTicket, result: Result<Vec<Message>, ChatError>) {
        let result = result
            .map(|messages| normalize_history(&ticket.chatroom_id, messages))
            .map_err(|err| {
                warn!(
                    chatroom_id = %ticket.chatroom_id,
                    code = %err.code,
                    message = %err.message,
                    "history load failed"
                );
                ErrorScope::MessageHistory.user_message().to_owned()
            });
        let succeeded = result.is_ok();

        if !self.messages.finish_load(&ticket, result) {
            trace!(
                chatroom_id = %ticket.chatroom_id,
                generation = ticket.generation,
                "dropping stale history"
            );
            return;
        }

        self.emit_timeline();
        if succeeded {
            self.emit(clear_inline_error(ErrorScope::MessageHistory));
        } else {
            self.emit(inline_error(ErrorScope::MessageHistory));
        }
    }

    fn on_message_sent(
        &mut self,
        session: u64,
        chatroom_id: String,
        client_txn_id: String,
        content: String,
        result: Result<(), ChatError>,
    ) {
        if session != self.session {
            return;
        }

        if let Err(err) = result {
            warn!(chatroom_id = %chatroom_id, code = %err.code, "message send failed");
            self.emit(inline_error(ErrorScope::MessageSend));
            self.emit(normalize_send_outcome(
                client_txn_id,
                chatroom_id,
                SendOutcome::Failure { error: err },
            ));
            return;
        }

        if self.messages.chatroom_id() != Some(chatroom_id.as_str()) {
            debug!(chatroom_id = %chatroom_id, "send acknowledged after selection changed");
            self.emit(SessionEvent::SendAck(SendAck {
                client_txn_id,
                chatroom_id,
                message_id: None,
                error_code: None,
            }));
            return;
        }

        let user_id = self
            .user
            .as_ref()
            .map(|user| user.id.clone())
            .unwrap_or_default();
        let message_id = MessageId::Client(client_txn_id.clone());
        let outcome = match self
            .messages
            .append_optimistic(message_id, &user_id, &content)
        {
            Ok(message) => {
                self.emit_timeline();
                match encode_live_frame(&message) {
                    Ok(frame) => {
                        if !self.connection.send_frame(frame) {
                            debug!(chatroom_id = %chatroom_id, "live echo not written");
                        }
                    }
                    Err(err) => debug!(code = %err.code, "could not encode live frame"),
                }
                self.emit(clear_inline_error(ErrorScope::MessageSend));
                SendOutcome::Success {
                    message_id: message.id,
                }
            }
            Err(error) => SendOutcome::Failure { error },
        };
        self.emit(normalize_send_outcome(client_txn_id, chatroom_id, outcome));
    }

    fn on_search_due(&mut self, token: u64) {
        let Some(query) = self.search.due(token) else {
            trace!(token, "search timer superseded");
            return;
        };
        let credential = match self.require_credential() {
            Ok(credential) => credential,
            Err(err) => {
                self.on_search_finished(token, Err(err));
                return;
            }
        };

        debug!(token, "issuing contact search");
        let api = self.api.clone();
        self.spawn_completion(async move {
            let result = api.search_contacts(&credential, &query).await;
            Completion::SearchFinished { token, result }
        });
    }

    fn on_search_finished(&mut self, token: u64, result: Result<Vec<Contact>, ChatError>) {
        let result = result.map_err(|err| {
            warn!(code = %err.code, message = %err.message, "contact search failed");
            ErrorScope::ContactSearch.user_message().to_owned()
        });
        let succeeded = result.is_ok();

        if !self.search.finish(token, result) {
            trace!(token, "dropping stale search response");
            return;
        }

        self.emit_search();
        if succeeded {
            self.emit(clear_inline_error(ErrorScope::ContactSearch));
        } else {
            self.emit(inline_error(ErrorScope::ContactSearch));
        }
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match self.connection.on_link_event(event) {
            LinkUpdate::State(event) => self.emit(event),
            LinkUpdate::Frame { chatroom_id, raw } => match parse_live_frame(&chatroom_id, &raw) {
                Ok(Some(message)) => match self.messages.append_from_connection(message) {
                    AppendOutcome::Appended | AppendOutcome::Confirmed => self.emit_timeline(),
                    AppendOutcome::Ignored => trace!(chatroom_id = %chatroom_id, "ignoring live message"),
                },
                Ok(None) => {}
                Err(err) => warn!(chatroom_id = %chatroom_id, message = %err.message, "bad live frame"),
            },
            LinkUpdate::Stale => {}
        }
    }

    fn validate_transition(
        &self,
        command: SessionCommand,
    ) -> Result<(SessionStateMachine, Vec<SessionEvent>), ChatError> {
        let mut candidate = self.state_machine.clone();
        let events = candidate.apply(&command)?;
        Ok((candidate, events))
    }

    fn commit_transition(&mut self, candidate: SessionStateMachine, events: Vec<SessionEvent>) {
        self.state_machine = candidate;
        for event in events {
            self.emit(event);
        }
    }

    /// Session user plus a token fetched from the identity provider for this request.
    fn require_credential(&self) -> Result<Credential, ChatError> {
        let user = self.user.as_ref().ok_or_else(ChatError::not_signed_in)?;
        let token = self.identity.get_token()?;
        Ok(Credential {
            user_id: user.id.clone(),
            token,
        })
    }

    fn spawn_completion<F>(&self, work: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            let _ = completions.send(work.await);
        });
    }

    fn cancel_search_timer(&mut self) {
        if let Some(timer) = self.search_timer.take() {
            timer.abort();
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn emit_selection(&self) {
        self.emit(SessionEvent::SelectionChanged(self.selection.clone()));
    }

    fn emit_timeline(&self) {
        self.emit(SessionEvent::Timeline(self.messages.snapshot()));
    }

    fn emit_search(&self) {
        self.emit(SessionEvent::Search(self.search.snapshot()));
    }
}

//! Bridge that wires session events into view state and input into session commands.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chat_backend::SessionHandle;
use chat_core::{MAX_MESSAGE_CHARS, MessageDraft, SessionCommand, SessionEvent};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::{
    config::TerminalConfig,
    input::{HELP_TEXT, InputAction, SCROLL_STEP},
    state::{TerminalSnapshot, TerminalState},
};

/// Callback used to publish new view snapshots.
pub type RenderCallback = Arc<dyn Fn(TerminalSnapshot) + Send + Sync + 'static>;

/// Outcome of applying one input action to local state.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Command(SessionCommand),
    Redraw,
    Quit,
    Idle,
}

pub struct TerminalBridge {
    session: SessionHandle,
    state: Arc<Mutex<TerminalState>>,
    render: RenderCallback,
    event_task: JoinHandle<()>,
}

impl TerminalBridge {
    /// Start the event worker and publish the first frame.
    pub fn spawn(config: &TerminalConfig, session: SessionHandle, render: RenderCallback) -> Self {
        let own_user_id = config
            .identity
            .as_ref()
            .map(|identity| identity.user_id.clone())
            .unwrap_or_default();
        info!(
            viewport_rows = config.viewport_rows,
            columns = config.terminal_columns,
            "spawning terminal bridge"
        );

        let state = Arc::new(Mutex::new(TerminalState::new(
            own_user_id,
            config.viewport_rows,
            config.narrow_columns,
            config.terminal_columns,
        )));

        let state_for_events = Arc::clone(&state);
        let render_for_events = Arc::clone(&render);
        let mut events = session.subscribe();
        let event_task = tokio::spawn(async move {
            debug!("terminal event worker started");
            while let Some(event) = recv_event(&mut events).await {
                trace!(event = event_kind(&event), "received session event");
                let snapshot = {
                    let mut state = lock(&state_for_events);
                    state.handle_session_event(event);
                    state.snapshot()
                };
                (render_for_events)(snapshot);
            }
            warn!("terminal event worker exiting: session event stream closed");
        });

        let bridge = Self {
            session,
            state,
            render,
            event_task,
        };
        bridge.publish();
        bridge
    }

    pub async fn start(&self) {
        self.dispatch(SessionCommand::Start).await;
    }

    /// Apply one input action. Returns `false` once the user asked to quit.
    pub async fn apply(&self, action: InputAction) -> bool {
        let step = resolve(&mut lock(&self.state), action);
        match step {
            Step::Command(command) => {
                self.publish();
                self.dispatch(command).await;
            }
            Step::Redraw => self.publish(),
            Step::Quit => return false,
            Step::Idle => {}
        }
        true
    }

    async fn dispatch(&self, command: SessionCommand) {
        trace!(command = command_kind(&command), "dispatching session command");
        if let Err(err) = self.session.send(command).await {
            error!(error = %err, "session command channel closed");
            lock(&self.state).set_notice("Session is no longer running.");
            self.publish();
        }
    }

    fn publish(&self) {
        let snapshot = lock(&self.state).snapshot();
        (self.render)(snapshot);
    }
}

impl Drop for TerminalBridge {
    fn drop(&mut self) {
        self.event_task.abort();
    }
}

fn lock(state: &Mutex<TerminalState>) -> MutexGuard<'_, TerminalState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Map an input action onto local state, yielding the session command to send, if any.
fn resolve(state: &mut TerminalState, action: InputAction) -> Step {
    if action != InputAction::Nothing {
        state.clear_notice();
    }

    match action {
        InputAction::RefreshChatrooms => Step::Command(SessionCommand::RefreshChatrooms),
        InputAction::OpenChatroom(index) => match state.chatroom_id_at(index) {
            Some(chatroom_id) => Step::Command(SessionCommand::SelectChatroom { chatroom_id }),
            None => {
                state.set_notice(format!("There is no chatroom {}.", index + 1));
                Step::Redraw
            }
        },
        InputAction::OpenSearch => Step::Command(SessionCommand::OpenSearch),
        InputAction::Search(text) => Step::Command(SessionCommand::SearchInput { text }),
        InputAction::PickContact(index) => match state.contact_at(index) {
            Some(contact) => Step::Command(SessionCommand::StartChatWith { contact }),
            None => {
                state.set_notice(format!("There is no contact {}.", index + 1));
                Step::Redraw
            }
        },
        InputAction::CloseSearch => Step::Command(SessionCommand::CloseSearch),
        InputAction::ScrollUp => {
            state.scroll_up(SCROLL_STEP);
            Step::Redraw
        }
        InputAction::ScrollDown => {
            state.scroll_down(SCROLL_STEP);
            Step::Redraw
        }
        InputAction::SignOut => Step::Command(SessionCommand::SignOut),
        InputAction::Quit => Step::Quit,
        InputAction::Help => {
            state.set_notice(HELP_TEXT);
            Step::Redraw
        }
        InputAction::Send(text) => {
            if state.selected_chatroom_id().is_none() {
                state.set_notice("Open a chatroom first (/open N).");
                return Step::Redraw;
            }
            let mut draft = MessageDraft::default();
            if draft.set_text(&text) {
                state.set_notice(format!(
                    "Message shortened to {MAX_MESSAGE_CHARS} characters."
                ));
            }
            let Some(content) = draft.compose() else {
                return Step::Idle;
            };
            let client_txn_id = Uuid::new_v4().to_string();
            state.mark_send_requested(client_txn_id.clone());
            Step::Command(SessionCommand::SendMessage {
                client_txn_id,
                content,
            })
        }
        InputAction::Nothing => Step::Idle,
        InputAction::Invalid(message) => {
            state.set_notice(message);
            Step::Redraw
        }
    }
}

async fn recv_event(events: &mut broadcast::Receiver<SessionEvent>) -> Option<SessionEvent> {
    loop {
        match events.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "terminal event worker lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

fn command_kind(command: &SessionCommand) -> &'static str {
    match command {
        SessionCommand::Start => "Start",
        SessionCommand::RefreshChatrooms => "RefreshChatrooms",
        SessionCommand::SelectChatroom { .. } => "SelectChatroom",
        SessionCommand::OpenSearch => "OpenSearch",
        SessionCommand::CloseSearch => "CloseSearch",
        SessionCommand::SearchInput { .. } => "SearchInput",
        SessionCommand::StartChatWith { .. } => "StartChatWith",
        SessionCommand::SendMessage { .. } => "SendMessage",
        SessionCommand::SignOut => "SignOut",
    }
}

fn event_kind(event: &SessionEvent) -> &'static str {
    match event {
        SessionEvent::StateChanged { .. } => "StateChanged",
        SessionEvent::ChatroomListUpdated { .. } => "ChatroomListUpdated",
        SessionEvent::SelectionChanged(_) => "SelectionChanged",
        SessionEvent::ConnectionChanged { .. } => "ConnectionChanged",
        SessionEvent::Timeline(_) => "Timeline",
        SessionEvent::Search(_) => "Search",
        SessionEvent::SendAck(_) => "SendAck",
        SessionEvent::InlineError { .. } => "InlineError",
        SessionEvent::FatalError { .. } => "FatalError",
        SessionEvent::CommandFailed { .. } => "CommandFailed",
    }
}

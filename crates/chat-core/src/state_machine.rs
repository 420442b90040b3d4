use crate::{
    error::ChatError,
    types::{ConnectionState, SessionCommand, SessionEvent, SessionLifecycleState},
};

#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: SessionLifecycleState,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            state: SessionLifecycleState::Idle,
        }
    }
}

impl SessionStateMachine {
    pub fn state(&self) -> SessionLifecycleState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionLifecycleState::Ready
    }

    pub fn apply(&mut self, command: &SessionCommand) -> Result<Vec<SessionEvent>, ChatError> {
        use SessionCommand::*;

        match command {
            Start => self.transition_from_any_of(
                &[SessionLifecycleState::Idle, SessionLifecycleState::SignedOut],
                SessionLifecycleState::Authenticating,
                "start",
            ),
            SignOut => self.transition_from_any_of(
                &[
                    SessionLifecycleState::Idle,
                    SessionLifecycleState::Authenticating,
                    SessionLifecycleState::Ready,
                    SessionLifecycleState::Fatal,
                ],
                SessionLifecycleState::SignedOut,
                "sign_out",
            ),
            RefreshChatrooms
            | SelectChatroom { .. }
            | OpenSearch
            | CloseSearch
            | SearchInput { .. }
            | StartChatWith { .. }
            | SendMessage { .. } => {
                if self.is_ready() {
                    Ok(Vec::new())
                } else {
                    Err(ChatError::invalid_state(self.state, "chatroom command"))
                }
            }
        }
    }

    pub fn on_login_result(&mut self, success: bool) -> Result<SessionEvent, ChatError> {
        if self.state != SessionLifecycleState::Authenticating {
            return Err(ChatError::invalid_state(self.state, "on_login_result"));
        }

        let next = if success {
            SessionLifecycleState::Ready
        } else {
            SessionLifecycleState::Fatal
        };

        self.state = next;
        Ok(SessionEvent::StateChanged { state: next })
    }

    pub fn on_fatal(&mut self) -> SessionEvent {
        self.state = SessionLifecycleState::Fatal;
        SessionEvent::StateChanged {
            state: SessionLifecycleState::Fatal,
        }
    }

    fn transition_from_any_of(
        &mut self,
        expected: &[SessionLifecycleState],
        next: SessionLifecycleState,
        action: &str,
    ) -> Result<Vec<SessionEvent>, ChatError> {
        if !expected.contains(&self.state) {
            return Err(ChatError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(vec![SessionEvent::StateChanged { state: next }])
    }
}

/// Tracks the single live connection: `Closed -> Opening -> Open -> Closed`.
///
/// Every open is tagged with a fresh epoch. Transitions reported for any other
/// epoch are ignored, so a late event from a replaced connection can never
/// move the state of the current one.
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    chatroom_id: Option<String>,
    state: ConnectionState,
    epoch: u64,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self {
            chatroom_id: None,
            state: ConnectionState::Closed,
            epoch: 0,
        }
    }
}

impl ConnectionStateMachine {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn chatroom_id(&self) -> Option<&str> {
        self.chatroom_id.as_deref()
    }

    /// Whether a connection for `chatroom_id` is opening or open.
    pub fn is_active_for(&self, chatroom_id: &str) -> bool {
        self.state != ConnectionState::Closed && self.chatroom_id.as_deref() == Some(chatroom_id)
    }

    /// Close whatever is active and start opening a connection for `chatroom_id`.
    ///
    /// Returns the new epoch plus the transitions, with the close of the
    /// previous connection ordered before the new `Opening`.
    pub fn begin_open(&mut self, chatroom_id: &str) -> (u64, Vec<SessionEvent>) {
        let mut events = Vec::with_capacity(2);
        if let Some(closed) = self.release() {
            events.push(closed);
        }

        self.epoch += 1;
        self.chatroom_id = Some(chatroom_id.to_owned());
        self.state = ConnectionState::Opening;
        events.push(self.changed(None));
        (self.epoch, events)
    }

    pub fn on_opened(&mut self, epoch: u64) -> Option<SessionEvent> {
        if epoch != self.epoch || self.state != ConnectionState::Opening {
            return None;
        }
        self.state = ConnectionState::Open;
        Some(self.changed(None))
    }

    /// Remote close or failed dial. `retry_in_ms` is set when a reopen is scheduled.
    pub fn on_closed(&mut self, epoch: u64, retry_in_ms: Option<u64>) -> Option<SessionEvent> {
        if epoch != self.epoch || self.state == ConnectionState::Closed {
            return None;
        }
        self.state = ConnectionState::Closed;
        Some(self.changed(retry_in_ms))
    }

    /// Scheduled reconnect for the same epoch is starting.
    pub fn begin_reopen(&mut self, epoch: u64) -> Option<SessionEvent> {
        if epoch != self.epoch || self.state != ConnectionState::Closed {
            return None;
        }
        self.state = ConnectionState::Opening;
        Some(self.changed(None))
    }

    /// Local close. Idempotent; also invalidates the current epoch.
    pub fn release(&mut self) -> Option<SessionEvent> {
        if self.state == ConnectionState::Closed {
            return None;
        }
        self.state = ConnectionState::Closed;
        self.epoch += 1;
        Some(self.changed(None))
    }

    fn changed(&self, retry_in_ms: Option<u64>) -> SessionEvent {
        SessionEvent::ConnectionChanged {
            chatroom_id: self.chatroom_id.clone(),
            state: self.state,
            retry_in_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection_states(events: &[SessionEvent]) -> Vec<(Option<String>, ConnectionState)> {
        events
            .iter()
            .map(|event| match event {
                SessionEvent::ConnectionChanged {
                    chatroom_id, state, ..
                } => (chatroom_id.clone(), *state),
                other => panic!("unexpected event: {other:?}"),
            })
            .collect()
    }

    #[test]
    fn runs_happy_path_session_transitions() {
        let mut sm = SessionStateMachine::default();

        sm.apply(&SessionCommand::Start).expect("start must work");
        assert_eq!(sm.state(), SessionLifecycleState::Authenticating);

        sm.on_login_result(true).expect("login should resolve");
        assert_eq!(sm.state(), SessionLifecycleState::Ready);

        sm.apply(&SessionCommand::RefreshChatrooms)
            .expect("refresh is allowed when ready");

        sm.apply(&SessionCommand::SignOut)
            .expect("sign out should work");
        assert_eq!(sm.state(), SessionLifecycleState::SignedOut);

        sm.apply(&SessionCommand::Start)
            .expect("start works again after sign out");
    }

    #[test]
    fn failed_login_is_fatal_and_blocks_commands() {
        let mut sm = SessionStateMachine::default();
        sm.apply(&SessionCommand::Start).expect("start must work");
        sm.on_login_result(false).expect("login should resolve");
        assert_eq!(sm.state(), SessionLifecycleState::Fatal);

        let err = sm
            .apply(&SessionCommand::SelectChatroom {
                chatroom_id: "room-a".into(),
            })
            .expect_err("chatroom commands are rejected after a fatal error");
        assert_eq!(err.code, "invalid_state_transition");
    }

    #[test]
    fn rejects_chatroom_commands_before_ready() {
        let mut sm = SessionStateMachine::default();

        let err = sm
            .apply(&SessionCommand::SendMessage {
                client_txn_id: "tx-1".into(),
                content: "hello".into(),
            })
            .expect_err("send should fail before login sync");
        assert_eq!(err.code, "invalid_state_transition");

        let err = sm
            .on_login_result(true)
            .expect_err("login result is only valid while authenticating");
        assert_eq!(err.code, "invalid_state_transition");
    }

    #[test]
    fn rejects_double_start() {
        let mut sm = SessionStateMachine::default();
        sm.apply(&SessionCommand::Start).expect("start must work");
        sm.apply(&SessionCommand::Start)
            .expect_err("second start is rejected");
    }

    #[test]
    fn switching_chatrooms_closes_previous_before_opening() {
        let mut sm = ConnectionStateMachine::default();
        let (first, _) = sm.begin_open("room-a");
        sm.on_opened(first).expect("first connection opens");

        let (second, events) = sm.begin_open("room-b");
        assert!(second > first);
        assert_eq!(
            connection_states(&events),
            vec![
                (Some("room-a".to_owned()), ConnectionState::Closed),
                (Some("room-b".to_owned()), ConnectionState::Opening),
            ]
        );
        assert!(sm.is_active_for("room-b"));
        assert!(!sm.is_active_for("room-a"));
    }

    #[test]
    fn ignores_transitions_from_superseded_epochs() {
        let mut sm = ConnectionStateMachine::default();
        let (stale, _) = sm.begin_open("room-a");
        let (current, _) = sm.begin_open("room-b");

        assert_eq!(sm.on_opened(stale), None);
        assert_eq!(sm.on_closed(stale, None), None);
        assert_eq!(sm.state(), ConnectionState::Opening);

        sm.on_opened(current).expect("current epoch opens");
        assert_eq!(sm.state(), ConnectionState::Open);
    }

    #[test]
    fn release_is_idempotent() {
        let mut sm = ConnectionStateMachine::default();
        assert_eq!(sm.release(), None);

        let (epoch, _) = sm.begin_open("room-a");
        assert!(sm.release().is_some());
        assert_eq!(sm.release(), None);
        assert_eq!(sm.on_opened(epoch), None);
    }

    #[test]
    fn remote_close_then_reopen_keeps_epoch() {
        let mut sm = ConnectionStateMachine::default();
        let (epoch, _) = sm.begin_open("room-a");
        sm.on_opened(epoch).expect("opens");

        let closed = sm.on_closed(epoch, Some(500)).expect("closes");
        assert_eq!(
            closed,
            SessionEvent::ConnectionChanged {
                chatroom_id: Some("room-a".into()),
                state: ConnectionState::Closed,
                retry_in_ms: Some(500),
            }
        );
        assert_eq!(sm.on_closed(epoch, None), None);

        sm.begin_reopen(epoch).expect("reopen starts");
        sm.on_opened(epoch).expect("reopened");
        assert_eq!(sm.epoch(), epoch);
    }
}

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{SessionCommand, SessionEvent};

/// Broadcast event stream type used by frontend subscribers.
pub type EventStream = broadcast::Receiver<SessionEvent>;

/// Errors returned by session channel operations.
#[derive(Debug, Error)]
pub enum SessionChannelError {
    /// The command receiver side is closed.
    #[error("command channel is closed")]
    CommandChannelClosed,
}

/// Command/event channel pair shared by the session controller and frontends.
#[derive(Clone, Debug)]
pub struct SessionChannels {
    command_tx: mpsc::Sender<SessionCommand>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionChannels {
    /// Create a new channel set and return it with the command receiver.
    pub fn new(
        command_buffer: usize,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<SessionCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                command_tx,
                event_tx,
            },
            command_rx,
        )
    }

    /// Sender handed to the controller task that owns the session.
    pub fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.event_tx.clone()
    }

    /// Subscribe to emitted session events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Send one command to the controller.
    pub async fn send_command(&self, command: SessionCommand) -> Result<(), SessionChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| SessionChannelError::CommandChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionLifecycleState;

    #[tokio::test]
    async fn sends_commands_to_receiver() {
        let (channels, mut rx) = SessionChannels::new(8, 8);
        channels
            .send_command(SessionCommand::SelectChatroom {
                chatroom_id: "room-a".into(),
            })
            .await
            .expect("command send should work");

        let cmd = rx.recv().await.expect("receiver should have a command");
        match cmd {
            SessionCommand::SelectChatroom { chatroom_id } => assert_eq!(chatroom_id, "room-a"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fans_out_events_to_subscribers() {
        let (channels, _) = SessionChannels::new(4, 16);
        let mut a = channels.subscribe();
        let mut b = channels.subscribe();

        let events = channels.event_sender();
        let _ = events.send(SessionEvent::StateChanged {
            state: SessionLifecycleState::Authenticating,
        });

        let event_a = a.recv().await.expect("subscriber a should receive event");
        let event_b = b.recv().await.expect("subscriber b should receive event");
        assert_eq!(event_a, event_b);
    }

    #[tokio::test]
    async fn reports_closed_command_channel() {
        let (channels, rx) = SessionChannels::new(1, 1);
        drop(rx);

        let err = channels
            .send_command(SessionCommand::Start)
            .await
            .expect_err("send must fail once the receiver is gone");
        assert!(matches!(err, SessionChannelError::CommandChannelClosed));
    }
}

use std::{sync::Arc, time::Duration};

use chat_core::{
    ChatError, ConnectionState, ConnectionStateMachine, LiveConnection, LiveTransport,
    ReconnectPolicy, SessionEvent,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// What a link task reports back to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEventKind {
    Opened,
    Frame(String),
    /// Dial failed or the remote side closed. `retry_in` is set when a reopen is scheduled.
    Closed {
        reason: Option<String>,
        retry_in: Option<Duration>,
    },
    Reopening {
        attempt: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub epoch: u64,
    pub chatroom_id: String,
    pub kind: LinkEventKind,
}

/// Link event after the epoch check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkUpdate {
    State(SessionEvent),
    Frame { chatroom_id: String, raw: String },
    Stale,
}

struct ActiveLink {
    epoch: u64,
    stop: CancellationToken,
    outbound: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

/// Owns the single live connection for the selected chatroom.
///
/// Each connection runs in its own task. A replacement task waits for its
/// predecessor to finish closing before dialing, so two connections are
/// never open at once.
pub struct ConnectionManager<T: LiveTransport> {
    transport: Arc<T>,
    policy: ReconnectPolicy,
    state: ConnectionStateMachine,
    active: Option<ActiveLink>,
    retiring: Option<JoinHandle<()>>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
}

impl<T: LiveTransport> ConnectionManager<T> {
    pub fn new(
        transport: Arc<T>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        (
            Self {
                transport,
                policy,
                state: ConnectionStateMachine::default(),
                active: None,
                retiring: None,
                link_tx,
            },
            link_rx,
        )
    }

    pub fn state(&self) -> ConnectionState {
        self.state.state()
    }

    pub fn chatroom_id(&self) -> Option<&str> {
        self.state.chatroom_id()
    }

    pub fn is_active_for(&self, chatroom_id: &str) -> bool {
        self.state.is_active_for(chatroom_id)
    }

    /// Close the current connection (if any) and open one for `chatroom_id`.
    pub fn rebind(&mut self, chatroom_id: &str) -> Vec<SessionEvent> {
        self.retire_active();
        let (epoch, events) = self.state.begin_open(chatroom_id);

        let stop = CancellationToken::new();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let link = LinkTask {
            transport: self.transport.clone(),
            policy: self.policy,
            chatroom_id: chatroom_id.to_owned(),
            epoch,
            stop: stop.child_token(),
            outbound_rx,
            events: self.link_tx.clone(),
        };
        let previous = self.retiring.take();
        let task = tokio::spawn(link.run(previous));

        debug!(chatroom_id, epoch, "rebinding live connection");
        self.active = Some(ActiveLink {
            epoch,
            stop,
            outbound,
            task,
        });
        events
    }

    /// Close the current connection. Idempotent.
    pub fn close(&mut self) -> Option<SessionEvent> {
        self.retire_active();
        self.state.release()
    }

    /// Queue a text frame on the open connection. Returns `false` when nothing is open.
    pub fn send_frame(&self, text: String) -> bool {
        if self.state.state() != ConnectionState::Open {
            debug!("dropping outbound frame, connection is not open");
            return false;
        }
        match &self.active {
            Some(active) => active.outbound.send(text).is_ok(),
            None => false,
        }
    }

    pub fn on_link_event(&mut self, event: LinkEvent) -> LinkUpdate {
        if event.epoch != self.state.epoch() {
            trace!(epoch = event.epoch, current = self.state.epoch(), "stale link event");
            return LinkUpdate::Stale;
        }

        let update = match event.kind {
            LinkEventKind::Opened => self.state.on_opened(event.epoch),
            LinkEventKind::Frame(raw) => {
                if self.state.state() != ConnectionState::Open {
                    return LinkUpdate::Stale;
                }
                return LinkUpdate::Frame {
                    chatroom_id: event.chatroom_id,
                    raw,
                };
            }
            LinkEventKind::Closed { reason, retry_in } => {
                debug!(
                    chatroom_id = %event.chatroom_id,
                    epoch = event.epoch,
                    reason = reason.as_deref().unwrap_or("remote close"),
                    "live connection closed"
                );
                if retry_in.is_none() {
                    self.retire_active();
                }
                self.state
                    .on_closed(event.epoch, retry_in.map(|delay| delay.as_millis() as u64))
            }
            LinkEventKind::Reopening { attempt } => {
                debug!(chatroom_id = %event.chatroom_id, attempt, "reopening live connection");
                self.state.begin_reopen(event.epoch)
            }
        };

        update.map_or(LinkUpdate::Stale, LinkUpdate::State)
    }

    fn retire_active(&mut self) {
        if let Some(active) = self.active.take() {
            trace!(epoch = active.epoch, "retiring live connection task");
            active.stop.cancel();
            self.retiring = Some(active.task);
        }
    }
}

impl<T: LiveTransport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.stop.cancel();
        }
    }
}

struct LinkTask<T: LiveTransport> {
    transport: Arc<T>,
    policy: ReconnectPolicy,
    chatroom_id: String,
    epoch: u64,
    stop: CancellationToken,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

enum LinkStep {
    Stop,
    Inbound(Option<Result<String, ChatError>>),
    Outbound(String),
}

impl<T: LiveTransport> LinkTask<T> {
    async fn run(mut self, previous: Option<JoinHandle<()>>) {
        if let Some(previous) = previous {
            let _ = previous.await;
        }

        let mut attempt: u32 = 0;
        loop {
            let connected = tokio::select! {
                _ = self.stop.cancelled() => return,
                result = self.transport.connect(&self.chatroom_id) => result,
            };

            let reason = match connected {
                Ok(mut conn) => {
                    attempt = 0;
                    self.emit(LinkEventKind::Opened);
                    match self.pump(&mut conn).await {
                        Some(reason) => reason,
                        None => return,
                    }
                }
                Err(err) => {
                    warn!(chatroom_id = %self.chatroom_id, code = %err.code, "live connect failed");
                    Some(err.message)
                }
            };

            let retry_in = self.policy.delay_for_attempt(attempt);
            self.emit(LinkEventKind::Closed { reason, retry_in });
            let Some(delay) = retry_in else {
                return;
            };

            attempt = attempt.saturating_add(1);
            tokio::select! {
                _ = self.stop.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            self.emit(LinkEventKind::Reopening { attempt });
        }
    }

    /// Move frames until the connection ends. `None` means a local stop.
    async fn pump(&mut self, conn: &mut T::Connection) -> Option<Option<String>> {
        loop {
            let step = tokio::select! {
                _ = self.stop.cancelled() => LinkStep::Stop,
                frame = conn.next_frame() => LinkStep::Inbound(frame),
                Some(text) = self.outbound_rx.recv() => LinkStep::Outbound(text),
            };

            match step {
                LinkStep::Stop => {
                    conn.close().await;
                    return None;
                }
                LinkStep::Inbound(Some(Ok(raw))) => self.emit(LinkEventKind::Frame(raw)),
                LinkStep::Inbound(Some(Err(err))) => {
                    conn.close().await;
                    return Some(Some(err.message));
                }
                LinkStep::Inbound(None) => return Some(None),
                LinkStep::Outbound(text) => {
                    if let Err(err) = conn.send_text(text).await {
                        debug!(chatroom_id = %self.chatroom_id, code = %err.code, "live write failed");
                    }
                }
            }
        }
    }

    fn emit(&self, kind: LinkEventKind) {
        let _ = self.events.send(LinkEvent {
            epoch: self.epoch,
            chatroom_id: self.chatroom_id.clone(),
            kind,
        });
    }
}

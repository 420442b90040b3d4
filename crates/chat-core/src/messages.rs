use std::collections::HashSet;

use chrono::Utc;

use crate::{
    draft::clamp_message_content,
    error::ChatError,
    types::{Delivery, Message, MessageId, TimelineEntry, TimelineSnapshot},
};

/// Default retention cap for [`MessageStore`].
pub const DEFAULT_MAX_ITEMS: usize = 1200;

/// Identifies one history load. Completions carrying any other ticket are stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub chatroom_id: String,
    pub generation: u64,
}

/// Result of delivering a live message to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Added as a new confirmed entry.
    Appended,
    /// Matched a pending optimistic entry, which is now confirmed.
    Confirmed,
    /// Wrong chatroom or already present.
    Ignored,
}

/// Message history for the selected chatroom, in append order.
#[derive(Debug, Clone)]
pub struct MessageStore {
    chatroom_id: Option<String>,
    entries: Vec<TimelineEntry>,
    max_items: usize,
    generation: u64,
    in_flight: Option<LoadTicket>,
    error: Option<String>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITEMS)
    }
}

impl MessageStore {
    /// Create a store with an entry cap (`max_items >= 1`).
    pub fn new(max_items: usize) -> Self {
        Self {
            chatroom_id: None,
            entries: Vec::new(),
            max_items: max_items.max(1),
            generation: 0,
            in_flight: None,
            error: None,
        }
    }

    pub fn chatroom_id(&self) -> Option<&str> {
        self.chatroom_id.as_deref()
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Bind the store to `chatroom_id` and start a history load.
    ///
    /// The sequence is emptied immediately. Anything appended before the
    /// load finishes is kept and placed after the loaded history.
    pub fn begin_load(&mut self, chatroom_id: &str) -> LoadTicket {
        self.generation += 1;
        self.chatroom_id = Some(chatroom_id.to_owned());
        self.entries.clear();
        self.error = None;

        let ticket = LoadTicket {
            chatroom_id: chatroom_id.to_owned(),
            generation: self.generation,
        };
        self.in_flight = Some(ticket.clone());
        ticket
    }

    /// Apply a history load result. Returns `false` when `ticket` is stale.
    pub fn finish_load(
        &mut self,
        ticket: &LoadTicket,
        result: Result<Vec<Message>, String>,
    ) -> bool {
        if self.in_flight.as_ref() != Some(ticket) {
            return false;
        }
        self.in_flight = None;

        match result {
            Ok(history) => {
                let known: HashSet<MessageId> =
                    history.iter().map(|message| message.id.clone()).collect();
                let appended = std::mem::take(&mut self.entries);

                self.entries = history
                    .into_iter()
                    .map(|message| confirmed(clamped(message)))
                    .chain(
                        appended
                            .into_iter()
                            .filter(|entry| !known.contains(&entry.message.id)),
                    )
                    .collect();
                self.error = None;
                self.trim_to_max();
            }
            Err(message) => {
                self.entries.clear();
                self.error = Some(message);
            }
        }
        true
    }

    /// Append a locally authored message before its live delivery is seen.
    pub fn append_optimistic(
        &mut self,
        id: MessageId,
        user_id: &str,
        content: &str,
    ) -> Result<Message, ChatError> {
        let chatroom_id = self
            .chatroom_id
            .clone()
            .ok_or_else(|| ChatError::no_chatroom_selected("append_optimistic"))?;

        let content = clamp_message_content(content);
        if content.is_empty() {
            return Err(ChatError::empty_message());
        }

        let message = Message {
            id,
            chatroom_id,
            user_id: user_id.to_owned(),
            content,
            created_at: Utc::now(),
        };
        self.entries.push(TimelineEntry {
            message: message.clone(),
            delivery: Delivery::Pending,
        });
        self.trim_to_max();
        Ok(message)
    }

    /// Deliver an authoritative message from the live connection.
    pub fn append_from_connection(&mut self, message: Message) -> AppendOutcome {
        if self.chatroom_id.as_deref() != Some(message.chatroom_id.as_str()) {
            return AppendOutcome::Ignored;
        }

        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.message.id == message.id)
        {
            if entry.delivery == Delivery::Confirmed {
                return AppendOutcome::Ignored;
            }
            *entry = confirmed(clamped(message));
            return AppendOutcome::Confirmed;
        }

        self.entries.push(confirmed(clamped(message)));
        self.trim_to_max();
        AppendOutcome::Appended
    }

    pub fn snapshot(&self) -> TimelineSnapshot {
        TimelineSnapshot {
            chatroom_id: self.chatroom_id.clone(),
            entries: self.entries.clone(),
            loading: self.is_loading(),
            error: self.error.clone(),
        }
    }

    /// Unbind the store and invalidate any in-flight load.
    pub fn clear(&mut self) {
        self.generation += 1;
        self.chatroom_id = None;
        self.entries.clear();
        self.in_flight = None;
        self.error = None;
    }

    fn trim_to_max(&mut self) {
        if self.entries.len() <= self.max_items {
            return;
        }

        let excess = self.entries.len() - self.max_items;
        self.entries.drain(0..excess);
    }
}

fn clamped(mut message: Message) -> Message {
    message.content = clamp_message_content(&message.content);
    message
}

fn confirmed(message: Message) -> TimelineEntry {
    TimelineEntry {
        message,
        delivery: Delivery::Confirmed,
    }
}

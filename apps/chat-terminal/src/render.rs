//! Plain-text frame rendering for `chat-terminal`.

use std::fmt::Write;

use chat_core::SearchStatus;

use crate::state::TerminalSnapshot;

const RULE: &str = "----------------------------------------";

/// Render one full frame for `snapshot`.
pub fn render(snapshot: &TerminalSnapshot) -> String {
    let mut out = String::new();
    let status = match &snapshot.connection_text {
        Some(connection) => format!("[{}] [{connection}]", snapshot.status_text),
        None => format!("[{}]", snapshot.status_text),
    };
    let _ = writeln!(out, "{RULE}\n{status}");

    if let Some(fatal) = &snapshot.fatal_error {
        let _ = writeln!(out, "!! {fatal}");
        return out;
    }

    if snapshot.sidebar_visible {
        let _ = writeln!(out, "Chatrooms:");
        if snapshot.chatrooms.is_empty() {
            let _ = writeln!(out, "  (none)");
        }
        for (index, chatroom) in snapshot.chatrooms.iter().enumerate() {
            let marker = if chatroom.is_selected { '>' } else { ' ' };
            let _ = writeln!(
                out,
                "{marker} {}. {} - {}",
                index + 1,
                chatroom.display_name,
                chatroom.preview
            );
        }
    }

    if let Some(header) = &snapshot.header {
        let _ = writeln!(out, "== {header} ==");
        if snapshot.loading {
            let _ = writeln!(out, "  loading...");
        }
        if snapshot.more_above {
            let _ = writeln!(out, "  ...");
        }
        for message in &snapshot.messages {
            let marker = if message.is_own { '*' } else { ' ' };
            let pending = if message.pending { " (sending)" } else { "" };
            let _ = writeln!(
                out,
                "{marker} {} {}: {}{pending}",
                message.time, message.sender, message.body
            );
        }
        if snapshot.more_below {
            let _ = writeln!(out, "  ... (/down for newer)");
        }
    }

    if let Some(search) = &snapshot.search {
        let _ = writeln!(out, "Find a contact: {}", search.query);
        match search.status {
            SearchStatus::Idle => {}
            SearchStatus::Searching => {
                let _ = writeln!(out, "  searching...");
            }
            SearchStatus::NoContacts => {
                let _ = writeln!(out, "  no contact");
            }
            SearchStatus::Failed => {}
            SearchStatus::Results => {
                for (index, contact) in search.contacts.iter().enumerate() {
                    let _ = writeln!(
                        out,
                        "  {}. {} <{}>",
                        index + 1,
                        contact.display_name,
                        contact.email
                    );
                }
            }
        }
    }

    for error in &snapshot.errors {
        let _ = writeln!(out, "! {error}");
    }
    if let Some(notice) = &snapshot.notice {
        let _ = writeln!(out, "* {notice}");
    }
    if snapshot.can_send {
        let _ = write!(out, "> ");
    }
    out
}

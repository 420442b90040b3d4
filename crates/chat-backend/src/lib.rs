//! Backend adapters and the session controller runtime.
//!
//! `http` and `live` talk to the chat server over REST and WebSocket,
//! `connection` owns the single live connection for the selected chatroom,
//! and `runtime` drives the whole session from frontend commands.

pub mod connection;
pub mod http;
pub mod live;
pub mod runtime;

#[cfg(test)]
mod testing;

pub use connection::{ConnectionManager, LinkEvent, LinkEventKind, LinkUpdate};
pub use http::HttpChatApi;
pub use live::{WsConnection, WsTransport};
pub use runtime::{SessionConfig, SessionHandle, spawn_session};

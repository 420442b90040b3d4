use std::future::Future;

use crate::{
    error::ChatError,
    types::{Chatroom, Contact, Message},
};

/// Who is calling the backend and with which bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub user_id: String,
    pub token: String,
}

/// REST operations the session controller depends on.
///
/// Implementations must be cheap to share; the controller calls them from
/// spawned tasks through an `Arc`.
pub trait ChatApi: Send + Sync + 'static {
    /// Register or refresh the signed-in user on the backend.
    fn sync_login(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<(), ChatError>> + Send;

    fn list_chatrooms(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<Vec<Chatroom>, ChatError>> + Send;

    /// Create the direct chatroom between the caller and `contact_id`.
    fn create_chatroom(
        &self,
        credential: &Credential,
        contact_id: &str,
    ) -> impl Future<Output = Result<Chatroom, ChatError>> + Send;

    /// Full history of `chatroom_id`, oldest first.
    fn list_messages(
        &self,
        credential: &Credential,
        chatroom_id: &str,
    ) -> impl Future<Output = Result<Vec<Message>, ChatError>> + Send;

    fn send_message(
        &self,
        credential: &Credential,
        chatroom_id: &str,
        content: &str,
    ) -> impl Future<Output = Result<(), ChatError>> + Send;

    fn search_contacts(
        &self,
        credential: &Credential,
        query: &str,
    ) -> impl Future<Output = Result<Vec<Contact>, ChatError>> + Send;
}

/// Factory for per-chatroom live connections.
pub trait LiveTransport: Send + Sync + 'static {
    type Connection: LiveConnection;

    fn connect(
        &self,
        chatroom_id: &str,
    ) -> impl Future<Output = Result<Self::Connection, ChatError>> + Send;
}

/// One open live connection carrying JSON text frames.
pub trait LiveConnection: Send + 'static {
    /// Next inbound text frame. `None` once the remote side has closed.
    fn next_frame(&mut self) -> impl Future<Output = Option<Result<String, ChatError>>> + Send;

    fn send_text(&mut self, text: String) -> impl Future<Output = Result<(), ChatError>> + Send;

    /// Close the connection. Safe to call more than once.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

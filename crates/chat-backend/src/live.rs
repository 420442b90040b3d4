use chat_core::{ChatError, ChatErrorCategory, LiveConnection, LiveTransport};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage,
};
use tracing::{debug, trace};
use url::Url;

/// WebSocket transport deriving `ws(s)://<api base>/ws/chat/<chatroom_id>`.
#[derive(Debug, Clone)]
pub struct WsTransport {
    base_url: Url,
}

impl WsTransport {
    /// Build from the REST base URL; `http` maps to `ws` and `https` to `wss`.
    pub fn from_api_base(api_base: &Url) -> Result<Self, ChatError> {
        let scheme = match api_base.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(ChatError::new(
                    ChatErrorCategory::Config,
                    "unsupported_scheme",
                    format!("cannot derive a live URL from scheme '{other}'"),
                ));
            }
        };

        let mut base_url = api_base.clone();
        base_url.set_scheme(scheme).map_err(|()| {
            ChatError::new(
                ChatErrorCategory::Config,
                "unsupported_scheme",
                format!("cannot switch {api_base} to {scheme}"),
            )
        })?;
        Ok(Self { base_url })
    }

    pub fn chatroom_url(&self, chatroom_id: &str) -> Result<Url, ChatError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ChatError::new(
                    ChatErrorCategory::Config,
                    "invalid_live_url",
                    format!("{} cannot carry a path", self.base_url),
                )
            })?
            .pop_if_empty()
            .extend(["ws", "chat", chatroom_id]);
        Ok(url)
    }
}

impl LiveTransport for WsTransport {
    type Connection = WsConnection;

    async fn connect(&self, chatroom_id: &str) -> Result<WsConnection, ChatError> {
        let url = self.chatroom_url(chatroom_id)?;
        debug!(%url, "opening live connection");

        let (stream, _response) = connect_async(url.as_str()).await.map_err(|err| {
            ChatError::new(ChatErrorCategory::Transport, "live_connect_failed", err.to_string())
        })?;
        Ok(WsConnection {
            stream,
            closed: false,
        })
    }
}

pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

impl LiveConnection for WsConnection {
    async fn next_frame(&mut self) -> Option<Result<String, ChatError>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text)),
                Ok(WsMessage::Binary(bytes)) => {
                    return Some(String::from_utf8(bytes).map_err(|err| {
                        ChatError::new(
                            ChatErrorCategory::Serialization,
                            "invalid_live_frame",
                            format!("binary frame is not UTF-8: {err}"),
                        )
                    }));
                }
                Ok(WsMessage::Close(frame)) => {
                    debug!(?frame, "live connection closed by remote");
                    self.closed = true;
                    return None;
                }
                Ok(other) => trace!(?other, "skipping control frame"),
                Err(err) => {
                    return Some(Err(ChatError::new(
                        ChatErrorCategory::Transport,
                        "live_read_failed",
                        err.to_string(),
                    )));
                }
            }
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), ChatError> {
        self.stream
            .send(WsMessage::Text(text))
            .await
            .map_err(|err| {
                ChatError::new(ChatErrorCategory::Transport, "live_write_failed", err.to_string())
            })
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.stream.close(None).await {
            trace!(%err, "live close handshake failed");
        }
    }
}

use std::time::Duration;

use chat_core::{
    ChatApi, ChatError, ChatErrorCategory, Chatroom, Contact, Credential, Message,
    classify_http_status,
};
use reqwest::{Client, StatusCode, header::RETRY_AFTER};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use tracing::{debug, trace};
use url::Url;

const LOGIN_PATH: &str = "user/login";
const CHATROOM_LIST_PATH: &str = "chatroom/list";
const CHATROOM_CREATE_PATH: &str = "chatroom/create";
const MESSAGE_LIST_PATH: &str = "message/list";
const MESSAGE_SEND_PATH: &str = "message/send";
const CONTACT_SEARCH_PATH: &str = "user/new-chat/search";

#[derive(Debug, Deserialize)]
struct ChatroomListResponse {
    #[serde(default)]
    chatrooms: Vec<Chatroom>,
}

#[derive(Debug, Deserialize)]
struct ChatroomCreateResponse {
    chatroom: Chatroom,
}

#[derive(Debug, Deserialize)]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct ContactSearchResponse {
    #[serde(default)]
    contacts: Vec<Contact>,
}

/// REST client for the chat backend. All calls are bearer-authenticated JSON POSTs.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: Client,
    base_url: Url,
}

impl HttpChatApi {
    pub fn new(base_url: Url, request_timeout: Duration) -> Result<Self, ChatError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| {
                ChatError::new(
                    ChatErrorCategory::Config,
                    "http_client_build_error",
                    err.to_string(),
                )
            })?;

        Ok(Self {
            client,
            base_url: with_trailing_slash(base_url),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ChatError> {
        self.base_url.join(path).map_err(|err| {
            ChatError::new(
                ChatErrorCategory::Config,
                "invalid_endpoint",
                format!("cannot join '{path}' onto {}: {err}", self.base_url),
            )
        })
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        credential: &Credential,
        path: &str,
        body: &B,
    ) -> Result<String, ChatError> {
        let url = self.endpoint(path)?;
        trace!(%url, "POST");

        let response = self
            .client
            .post(url)
            .bearer_auth(&credential.token)
            .json(body)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned);
        let text = response.text().await.map_err(map_request_error)?;

        if !status.is_success() {
            debug!(path, status = status.as_u16(), "backend rejected request");
            return Err(map_status_error(status, retry_after.as_deref(), &text));
        }
        Ok(text)
    }

    async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        credential: &Credential,
        path: &str,
        body: &B,
    ) -> Result<R, ChatError> {
        let body = self.post(credential, path, body).await?;
        serde_json::from_str(&body).map_err(|err| {
            ChatError::new(
                ChatErrorCategory::Serialization,
                "invalid_response",
                format!("could not decode {path} response: {err}"),
            )
        })
    }
}

impl ChatApi for HttpChatApi {
    async fn sync_login(&self, credential: &Credential) -> Result<(), ChatError> {
        self.post(credential, LOGIN_PATH, &json!({ "user_id": credential.user_id }))
            .await
            .map(|_| ())
    }

    async fn list_chatrooms(&self, credential: &Credential) -> Result<Vec<Chatroom>, ChatError> {
        let response: ChatroomListResponse = self
            .post_json(
                credential,
                CHATROOM_LIST_PATH,
                &json!({ "user_id": credential.user_id }),
            )
            .await?;
        Ok(response.chatrooms)
    }

    async fn create_chatroom(
        &self,
        credential: &Credential,
        contact_id: &str,
    ) -> Result<Chatroom, ChatError> {
        let response: ChatroomCreateResponse = self
            .post_json(
                credential,
                CHATROOM_CREATE_PATH,
                &json!({ "user_id": credential.user_id, "contact_id": contact_id }),
            )
            .await?;
        Ok(response.chatroom)
    }

    async fn list_messages(
        &self,
        credential: &Credential,
        chatroom_id: &str,
    ) -> Result<Vec<Message>, ChatError> {
        let response: MessageListResponse = self
            .post_json(
                credential,
                MESSAGE_LIST_PATH,
                &json!({ "chatroom_id": chatroom_id, "user_id": credential.user_id }),
            )
            .await?;
        Ok(response.messages)
    }

    async fn send_message(
        &self,
        credential: &Credential,
        chatroom_id: &str,
        content: &str,
    ) -> Result<(), ChatError> {
        self.post(
            credential,
            MESSAGE_SEND_PATH,
            &json!({
                "chatroom_id": chatroom_id,
                "user_id": credential.user_id,
                "content": content,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn search_contacts(
        &self,
        credential: &Credential,
        query: &str,
    ) -> Result<Vec<Contact>, ChatError> {
        let response: ContactSearchResponse = self
            .post_json(
                credential,
                CONTACT_SEARCH_PATH,
                &json!({ "user_id": credential.user_id, "search": query }),
            )
            .await?;
        Ok(response.contacts)
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn map_request_error(err: reqwest::Error) -> ChatError {
    let code = if err.is_timeout() {
        "request_timeout"
    } else if err.is_connect() {
        "connect_failed"
    } else {
        "http_request_failed"
    };
    ChatError::new(ChatErrorCategory::Network, code, err.to_string())
}

fn map_status_error(status: StatusCode, retry_after: Option<&str>, body: &str) -> ChatError {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("detail")?.as_str().map(ToOwned::to_owned))
        .unwrap_or_else(|| body.trim().to_owned());

    let mut mapped = ChatError::new(
        classify_http_status(status.as_u16()),
        "http_status",
        format!("backend returned {status}: {detail}"),
    );
    if let Some(seconds) = retry_after.and_then(|value| value.trim().parse::<u64>().ok()) {
        mapped = mapped.with_retry_after(Duration::from_secs(seconds));
    }
    mapped
}

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::compose::ComposedMessage;
use crate::fetch::FetchSettings;
use crate::models::{Channel, CurrentUser, MessageHandle};

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{0}")]
    Request(String),
    #[error("{method} {path} failed ({status}): {body}")]
    Status {
        method: Method,
        path: String,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("failed to decode response: {0}")]
    Decode(String),
}

// ── Collaborator interface ───────────────────────────────────────────────────

/// What the relay needs from the chat platform.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn lookup_channel(&self, channel_id: &str) -> Result<Channel, ChatError>;

    async fn post_message(
        &self,
        channel_id: &str,
        message: &ComposedMessage,
    ) -> Result<MessageHandle, ChatError>;

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), ChatError>;
}

// ── REST implementation ──────────────────────────────────────────────────────

pub struct DiscordClient {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl DiscordClient {
    pub fn new(
        bot_token: impl Into<String>,
        api_base: &str,
        settings: &FetchSettings,
    ) -> Result<Self, ChatError> {
        let client = reqwest::ClientBuilder::new()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.timeout)
            .user_agent(concat!("fblink-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ChatError::Request(e.to_string()))?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
        })
    }

    pub async fn current_user(&self) -> Result<CurrentUser, ChatError> {
        let response = self.send(Method::GET, "/users/@me", |rb| rb).await?;
        decode(response).await
    }

    pub async fn send_text(
        &self,
        channel_id: &str,
        content: &str,
    ) -> Result<MessageHandle, ChatError> {
        let message = ComposedMessage {
            text: content.to_string(),
            attachment: None,
        };
        self.post_message(channel_id, &message).await
    }

    async fn send<F>(&self, method: Method, path: &str, build: F) -> Result<Response, ChatError>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let url = format!("{}{}", self.api_base, path);
        let request = self
            .client
            .request(method.clone(), &url)
            .header("Authorization", format!("Bot {}", self.bot_token));

        let response = build(request)
            .send()
            .await
            .map_err(|e| ChatError::Request(format!("{} {}: {}", method, path, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
            return Err(ChatError::Status {
                method,
                path: path.to_string(),
                status,
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatClient for DiscordClient {
    async fn lookup_channel(&self, channel_id: &str) -> Result<Channel, ChatError> {
        let path = format!("/channels/{channel_id}");
        let response = self.send(Method::GET, &path, |rb| rb).await?;
        decode(response).await
    }

    async fn post_message(
        &self,
        channel_id: &str,
        message: &ComposedMessage,
    ) -> Result<MessageHandle, ChatError> {
        let path = format!("/channels/{channel_id}/messages");
        // Reposted text is user- and page-supplied; it must not ping anyone.
        let payload = json!({
            "content": message.text,
            "allowed_mentions": { "parse": [] },
        });

        let response = match &message.attachment {
            None => {
                self.send(Method::POST, &path, |rb| rb.json(&payload))
                    .await?
            }
            Some(attachment) => {
                let part = reqwest::multipart::Part::bytes(attachment.data.to_vec())
                    .file_name(attachment.filename.clone())
                    .mime_str(&attachment.content_type)
                    .map_err(|e| ChatError::Request(e.to_string()))?;
                let form = reqwest::multipart::Form::new()
                    .text("payload_json", payload.to_string())
                    .part("files[0]", part);
                self.send(Method::POST, &path, |rb| rb.multipart(form))
                    .await?
            }
        };
        decode(response).await
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), ChatError> {
        let path = format!("/channels/{channel_id}/messages/{message_id}");
        self.send(Method::DELETE, &path, |rb| rb).await?;
        Ok(())
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ChatError> {
    response
        .json()
        .await
        .map_err(|e| ChatError::Decode(e.to_string()))
}

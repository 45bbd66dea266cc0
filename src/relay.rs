use bytes::Bytes;
use reqwest::StatusCode;
use tokio::sync::Semaphore;

use crate::compose::{compose, ComposedMessage};
use crate::discord::{ChatClient, ChatError};
use crate::extract::{self, ParseError};
use crate::fetch::{Fetch, FetchError};
use crate::link::{self, LinkMatch};
use crate::models::MessageCreate;

// ── Error type ───────────────────────────────────────────────────────────────

/// Failures that leave the triggering message in place.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("page fetch failed: {0}")]
    Fetch(#[source] FetchError),
    /// The status line doubles as the excerpt we would have shown.
    #[error("page returned {status}")]
    Status { status: String },
    #[error("page could not be parsed: {0}")]
    Parse(#[from] ParseError),
    #[error("posting replacement failed: {0}")]
    Post(#[source] ChatError),
}

/// Terminal state of one pipeline run.
#[derive(Debug)]
pub enum Outcome {
    IgnoredSelf,
    NoLink,
    /// The worker pool was closed before this run got a slot.
    Dropped,
    Retained(RelayError),
    Posted { message_id: String, deleted: bool },
}

// ── Relay ────────────────────────────────────────────────────────────────────

/// Turns a chat message carrying a Facebook link into a quoted summary.
///
/// Each call to [`Relay::handle_message`] owns all of its intermediate
/// state; the relay itself only holds read-only clients and the permits that
/// bound how many fetches run at once.
pub struct Relay<C, F> {
    chat: C,
    fetcher: F,
    bot_user_id: String,
    permits: Semaphore,
}

impl<C: ChatClient, F: Fetch> Relay<C, F> {
    /// `max_concurrent` of zero is treated as one.
    pub fn new(chat: C, fetcher: F, bot_user_id: impl Into<String>, max_concurrent: usize) -> Self {
        Self {
            chat,
            fetcher,
            bot_user_id: bot_user_id.into(),
            permits: Semaphore::new(max_concurrent.max(1)),
        }
    }

    /// Stop admitting new pipelines. Runs already past the permit finish.
    pub fn close(&self) {
        self.permits.close();
    }

    pub async fn handle_message(&self, msg: &MessageCreate) -> Outcome {
        if msg.author.id == self.bot_user_id {
            return Outcome::IgnoredSelf;
        }

        let Some(link) = link::detect(&msg.content) else {
            return Outcome::NoLink;
        };

        let Ok(_permit) = self.permits.acquire().await else {
            tracing::debug!(message_id = %msg.id, "worker pool closed; dropping trigger");
            return Outcome::Dropped;
        };

        let private = match self.chat.lookup_channel(&msg.channel_id).await {
            Ok(channel) => {
                tracing::debug!(channel_id = %channel.id, kind = channel.kind, "channel resolved");
                channel.is_private()
            }
            Err(e) => {
                tracing::warn!(channel_id = %msg.channel_id, error = %e, "unable to fetch channel");
                false
            }
        };

        tracing::info!(
            channel_id = %msg.channel_id,
            message_id = %msg.id,
            private,
            url = %link.sanitized_url,
            "link detected"
        );

        let reply = match self.build_reply(msg, &link).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(
                    channel_id = %msg.channel_id,
                    message_id = %msg.id,
                    url = %link.sanitized_url,
                    error = %e,
                    "extraction failed; keeping original message"
                );
                return Outcome::Retained(e);
            }
        };

        let posted = match self.chat.post_message(&msg.channel_id, &reply).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(
                    channel_id = %msg.channel_id,
                    message_id = %msg.id,
                    error = %e,
                    "failed to post replacement"
                );
                return Outcome::Retained(RelayError::Post(e));
            }
        };

        let deleted = match self.chat.delete_message(&msg.channel_id, &msg.id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    channel_id = %msg.channel_id,
                    message_id = %msg.id,
                    error = %e,
                    "failed to delete original message"
                );
                false
            }
        };

        tracing::info!(
            channel_id = %posted.channel_id,
            message_id = %posted.id,
            deleted,
            "replacement posted"
        );

        Outcome::Posted {
            message_id: posted.id,
            deleted,
        }
    }

    async fn build_reply(
        &self,
        msg: &MessageCreate,
        link: &LinkMatch,
    ) -> Result<ComposedMessage, RelayError> {
        let page = self
            .fetcher
            .fetch_page(&link.sanitized_url)
            .await
            .map_err(RelayError::Fetch)?;

        if page.status != StatusCode::OK {
            return Err(RelayError::Status {
                status: page.status_text(),
            });
        }

        let extraction = extract::extract_post(&page)?;

        let image = match extraction.image_url.as_deref() {
            Some(url) => self.fetch_image(url).await,
            None => None,
        };

        Ok(compose(
            msg.display_name(),
            &msg.content,
            link,
            &extraction.excerpt,
            image,
        ))
    }

    /// Single attempt; a failure just means the post goes out without a picture.
    async fn fetch_image(&self, url: &str) -> Option<Bytes> {
        tracing::debug!(url, "fetching image");
        match self.fetcher.fetch_image(url).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(url, error = %e, "image fetch failed; posting without it");
                None
            }
        }
    }
}

use serde::{Deserialize, Serialize};

/// A `MESSAGE_CREATE` payload as forwarded by the gateway relay.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageCreate {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub content: String,
    pub author: Author,
    #[serde(default)]
    pub member: Option<Member>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Author {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub nick: Option<String>,
}

impl MessageCreate {
    /// Per-channel nickname when set, global username otherwise.
    pub fn display_name(&self) -> &str {
        self.member
            .as_ref()
            .and_then(|m| m.nick.as_deref())
            .filter(|nick| !nick.is_empty())
            .unwrap_or(&self.author.username)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: u8,
}

impl Channel {
    pub fn is_private(&self) -> bool {
        self.kind == CHANNEL_TYPE_DM
    }
}

pub const CHANNEL_TYPE_DM: u8 = 1;

#[derive(Debug, Clone, Deserialize)]
pub struct MessageHandle {
    pub id: String,
    pub channel_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub status: &'static str,
}

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::fetch::FetchSettings;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Runtime configuration, read once at startup from flags or the environment.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "fblink-relay",
    version,
    about = "Replace Facebook links in chat with a quoted excerpt of the post"
)]
pub struct Config {
    /// Bot authentication token
    #[arg(short = 't', long, env = "DG_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Address the event endpoint listens on
    #[arg(long, env = "RELAY_LISTEN", default_value = "0.0.0.0:8000")]
    pub listen: SocketAddr,

    /// Base URL of the chat REST API
    #[arg(long, env = "DISCORD_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Our own user id; resolved through the API when omitted
    #[arg(long, env = "RELAY_BOT_USER_ID")]
    pub bot_user_id: Option<String>,

    /// Channel that receives the startup notice
    #[arg(long = "notify-channel", env = "RELAY_NOTIFY_CHANNEL")]
    pub notify_channel_id: Option<String>,

    /// Shared secret expected in the X-Relay-Secret header
    #[arg(long, env = "RELAY_SECRET", hide_env_values = true)]
    pub relay_secret: Option<String>,

    /// Upper bound on pipelines running at the same time
    #[arg(long = "max-concurrent", env = "RELAY_MAX_CONCURRENT", default_value_t = 16)]
    pub max_concurrent_pipelines: usize,

    /// Total timeout for each outbound request, in seconds
    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,

    /// Connect timeout for each outbound request, in seconds
    #[arg(long, default_value_t = 5)]
    pub connect_timeout_secs: u64,

    /// Largest image we will attach, in bytes
    #[arg(long, default_value_t = 8 * 1024 * 1024)]
    pub max_image_bytes: usize,

    /// Accept invalid TLS certificates (interception proxies only)
    #[arg(
        long,
        env = "RELAY_INSECURE_SSL",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub insecure_ssl: bool,
}

impl Config {
    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            max_image_bytes: self.max_image_bytes,
            insecure: self.insecure_ssl,
        }
    }
}

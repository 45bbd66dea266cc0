use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use serde_json::json;

mod compose;
mod config;
mod discord;
mod extract;
mod fetch;
mod link;
mod models;
mod relay;

use config::Config;
use discord::DiscordClient;
use fetch::HttpFetcher;
use models::{AcceptedResponse, MessageCreate};
use relay::{Outcome, Relay};

const RELAY_SECRET_HEADER: &str = "x-relay-secret";

type AppRelay = Relay<DiscordClient, HttpFetcher>;

#[derive(Clone)]
struct AppState {
    relay: Arc<AppRelay>,
    relay_secret: Option<Arc<str>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::parse();
    let settings = config.fetch_settings();

    let chat = DiscordClient::new(config.token.clone(), &config.api_base, &settings)
        .context("building chat client")?;
    let fetcher = HttpFetcher::new(&settings).context("building page fetcher")?;

    let bot_user_id = match config.bot_user_id.clone() {
        Some(id) => id,
        None => {
            let me = chat
                .current_user()
                .await
                .context("resolving bot identity")?;
            tracing::info!(user_id = %me.id, username = %me.username, "authenticated");
            me.id
        }
    };

    if let Some(channel_id) = config.notify_channel_id.as_deref() {
        let notice = format!("Bot v{} is ready", env!("CARGO_PKG_VERSION"));
        if let Err(e) = chat.send_text(channel_id, &notice).await {
            tracing::error!(channel_id, error = %e, "failed to post ready notice");
        }
    }

    let relay = Arc::new(Relay::new(
        chat,
        fetcher,
        bot_user_id,
        config.max_concurrent_pipelines,
    ));

    let state = AppState {
        relay: Arc::clone(&relay),
        relay_secret: config.relay_secret.as_deref().map(Arc::from),
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving events")?;

    relay.close();
    tracing::info!("shut down");
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events/message-create", post(message_create))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn message_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(msg): Json<MessageCreate>,
) -> Response {
    if let Some(expected) = state.relay_secret.as_deref() {
        let supplied = headers
            .get(RELAY_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if supplied != Some(expected) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"detail": "Missing or invalid relay secret"})),
            )
                .into_response();
        }
    }

    let relay = Arc::clone(&state.relay);
    tokio::spawn(async move {
        match relay.handle_message(&msg).await {
            Outcome::Posted {
                message_id: reply_id,
                deleted,
            } => {
                tracing::debug!(message_id = %msg.id, %reply_id, deleted, "pipeline finished");
            }
            outcome => {
                tracing::debug!(message_id = %msg.id, ?outcome, "pipeline finished");
            }
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse { status: "accepted" }),
    )
        .into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

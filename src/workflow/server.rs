use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::settings::NotifySettings;

use super::api::{self, AppState, SharedState};
use super::db::{DbHandle, WorkflowDb};
use super::engine::TransitionEngine;
use super::events::EventBus;
use super::media::MediaService;
use super::notify::{
    EmailChannel, LineClient, MailGatewayClient, NotificationDispatcher, PushChannel,
};
use super::permissions::GrantResolver;
use super::ws;

/// Configuration for the workflow server.
pub struct ServerConfig {
    pub port: u16,
    pub db_path: std::path::PathBuf,
    pub dev_mode: bool,
    pub notify: NotifySettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8640,
            db_path: std::path::PathBuf::from(".millwright/workflow.db"),
            dev_mode: false,
            notify: NotifySettings::default(),
        }
    }
}

/// Wire db, engine, media, and event bus into shared state.
pub fn build_state(db: WorkflowDb) -> SharedState {
    let db = DbHandle::new(db);
    let bus = EventBus::default();
    let resolver = GrantResolver::new(db.clone());
    let engine = TransitionEngine::new(db.clone(), resolver, bus.clone());
    let media = MediaService::new(db.clone(), bus.clone());
    Arc::new(AppState {
        db,
        engine,
        media,
        bus,
    })
}

/// Build the full application router with API and WebSocket feed.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

/// Start the workflow server.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    // Ensure parent directory exists for DB
    if let Some(parent) = config.db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let db = WorkflowDb::new(&config.db_path).context("Failed to initialize workflow database")?;
    let state = build_state(db);

    // The dispatcher is the only subscriber that talks to the outside
    // world; it runs detached so no request ever waits on a channel.
    let email: Option<Arc<dyn EmailChannel>> = config.notify.email_gateway_url.as_ref().map(|url| {
        Arc::new(MailGatewayClient::new(
            url.clone(),
            config.notify.email_token.clone(),
            config.notify.email_from.clone(),
        )) as Arc<dyn EmailChannel>
    });
    let push: Option<Arc<dyn PushChannel>> = config
        .notify
        .line_channel_token
        .as_ref()
        .map(|token| Arc::new(LineClient::new(token.clone())) as Arc<dyn PushChannel>);
    if email.is_none() {
        info!("email gateway not configured; email notifications disabled");
    }
    if push.is_none() {
        info!("LINE channel token not configured; LINE notifications disabled");
    }
    let dispatcher = NotificationDispatcher::new(
        state.db.clone(),
        email,
        push,
        Duration::from_secs(config.notify.send_timeout_secs),
    );
    dispatcher.spawn(state.bus.subscribe());

    let mut app = build_router(state);
    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!("millwright workflow server running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("shutting down");
}

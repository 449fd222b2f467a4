//! WebSocket connection support.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, WebSocketUpgrade};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Extension;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::catalog::Catalog;
use crate::envelope::{Envelope, HandlerRegistry, ServerHandler};

/// Shared by every connection. Read-only once serving starts.
pub struct State {
    registry: HandlerRegistry<Arc<dyn ServerHandler>>,
    catalog_json: String,
    catalog_script: String,
}

impl State {
    pub fn new(
        registry: HandlerRegistry<Arc<dyn ServerHandler>>,
        catalog: &Catalog,
    ) -> serde_json::Result<State> {
        Ok(State {
            registry,
            catalog_json: catalog.to_json()?,
            catalog_script: catalog.to_script()?,
        })
    }
}

/// Routes: the command WebSocket plus the catalog in JSON and script form.
pub fn app(state: Arc<State>, command_path: &str) -> axum::Router {
    axum::Router::new()
        .route(command_path, get(get_websocket))
        .route("/devices.json", get(get_catalog_json))
        .route("/devices.js", get(get_catalog_script))
        .layer(Extension(state))
}

/// Accept connections until the listener fails.
pub async fn run(listener: TcpListener, app: axum::Router) -> io::Result<()> {
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

async fn get_catalog_json(Extension(state): Extension<Arc<State>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        state.catalog_json.clone(),
    )
}

async fn get_catalog_script(Extension(state): Extension<Arc<State>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/javascript")],
        state.catalog_script.clone(),
    )
}

async fn get_websocket(
    ws: WebSocketUpgrade,
    Extension(state): Extension<Arc<State>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |ws| websocket(ws, state, addr))
}

/// Single WebSocket connection.
///
/// Frames are handled one at a time, so commands from one client are applied
/// in the order they were sent.
async fn websocket(ws: WebSocket, state: Arc<State>, addr: SocketAddr) {
    info!("[web] WebSocket opening for {}.", addr);
    let (mut tx, mut rx) = ws.split();

    while let Some(result) = rx.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if let Some(reply) = dispatch(&state, text).await {
                    if tx.send(Message::Text(reply)).await.is_err() {
                        warn!("[web] WebSocket to {} dropped?", addr);
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {
                debug!("[web] Ignoring non-text message from {}", addr);
            }
            Err(err) => {
                warn!("[web] WebSocket error from {}: {}", addr, err);
                break;
            }
        }
    }

    info!("[web] WebSocket terminating for {}.", addr);
}

/// Run one frame through its handler and encode the reply, if any.
async fn dispatch(state: &Arc<State>, text: String) -> Option<String> {
    let envelope = Envelope::decode(&text)?;

    let handler = match state.registry.get(&envelope.handler) {
        Some(handler) => handler.clone(),
        None => {
            warn!("[web] No handler named {:?}, dropping message", envelope.handler);
            return None;
        }
    };

    // Handlers may block on hardware. A dropped connection doesn't cancel
    // a dispatch that already started.
    let reply = match tokio::task::spawn_blocking(move || handler.process(&envelope)).await {
        Ok(reply) => reply?,
        Err(err) => {
            error!("[web] Handler crashed: {}", err);
            return None;
        }
    };

    match reply.encode() {
        Ok(text) => Some(text),
        Err(err) => {
            error!("[web] Unable to encode reply: {}", err);
            None
        }
    }
}

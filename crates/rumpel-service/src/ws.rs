//! WebSocket stream for the host app.
//!
//! Each connection receives a snapshot first, then every [`HostCommand`]
//! the core issues and every [`CoreNotification`] it publishes. The host
//! replays commands against the OS location API; notifications are
//! informational.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use rumpel_core::{CoreNotification, MonitoredRegion, TrackingPreferences};

use crate::bridge::HostCommand;
use crate::state::AppState;

/// Create the WebSocket router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/ws", get(ws_handler))
}

/// A message pushed to the host.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BridgeMessage {
    /// What the host should be doing right now.
    Snapshot {
        preferences: TrackingPreferences,
        monitored_regions: Vec<MonitoredRegion>,
    },
    HostCommand(HostCommand),
    Notification(CoreNotification),
}

impl BridgeMessage {
    fn snapshot(state: &AppState) -> Self {
        BridgeMessage::Snapshot {
            preferences: state.current_preferences(),
            monitored_regions: state.location.monitored_regions(),
        }
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so nothing issued meanwhile is lost
    let mut commands = state.subscribe_commands();
    let mut notifications = state.core.subscribe();

    info!("Host connected");

    if let Ok(json) = serde_json::to_string(&BridgeMessage::snapshot(&state))
        && sender.send(Message::Text(json.into())).await.is_err()
    {
        info!("Host disconnected during initial snapshot");
        return;
    }

    debug!("Sent initial snapshot to host");

    let mut send_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                command = commands.recv() => match command {
                    Ok(command) => BridgeMessage::HostCommand(command),
                    Err(RecvError::Lagged(n)) => {
                        warn!("Host lagged, {} commands dropped", n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                notification = notifications.recv() => match notification {
                    Ok(notification) => BridgeMessage::Notification(notification),
                    Err(RecvError::Lagged(n)) => {
                        warn!("Host lagged, {} notifications dropped", n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            let json = match serde_json::to_string(&message) {
                Ok(j) => j,
                Err(e) => {
                    warn!("Failed to serialize message: {}", e);
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // The host only sends keep-alive pings; events arrive over REST
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
        },
    }

    info!("Host disconnected");
}

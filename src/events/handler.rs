//! WebSocket handler for client connections.
//!
//! Handles the upgrade, connection lifecycle, and room subscribe commands.

use axum::extract::ws::{Message, WebSocket};
use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::connection::ConnectionManager;
use super::messages::{Event, WsCommand};
use crate::gateway::state::AppState;

/// WebSocket connection query parameters. The identity layer upstream has
/// already resolved the user.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: Option<u64>,
}

/// WebSocket upgrade handler.
///
/// Endpoint: GET /ws?user_id=1001
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let manager = state.engine.bus().connection_manager().clone();
    let user_id = params.user_id.unwrap_or(0); // 0 = anonymous
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, manager))
}

/// Handle WebSocket connection lifecycle.
async fn handle_socket(socket: WebSocket, user_id: u64, manager: Arc<ConnectionManager>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

    let conn_id = manager.add_connection(user_id, tx.clone());

    let welcome = Event::Connected { user_id };
    if let Ok(json) = serde_json::to_string(&welcome) {
        let _ = sender.send(Message::Text(json.into())).await;
    }

    // Forward events from the registry channel onto the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&event)
                && sender.send(Message::Text(json.into())).await.is_err()
            {
                break;
            }
        }
    });

    // Handle incoming commands (subscribe/unsubscribe/ping, close).
    let tx_for_recv = tx.clone();
    let manager_for_task = manager.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Ok(cmd) = serde_json::from_str::<WsCommand>(&text) {
                        match cmd {
                            WsCommand::Subscribe { rooms } => {
                                for room in &rooms {
                                    manager_for_task.subscribe(conn_id, room.clone());
                                }
                                let _ = tx_for_recv.send(Event::Subscribed { rooms });
                            }
                            WsCommand::Unsubscribe { rooms } => {
                                for room in &rooms {
                                    manager_for_task.unsubscribe(conn_id, room);
                                }
                                let _ = tx_for_recv.send(Event::Unsubscribed { rooms });
                            }
                            WsCommand::Ping => {
                                let _ = tx_for_recv.send(Event::Pong);
                            }
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either direction to finish.
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    manager.remove_connection(user_id, conn_id);
}

//! One viewer connection.
//!
//! The hub holds the only sender of the connection's outbound queue, so the
//! queue closing means the hub dropped this viewer.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use roundcast_core_types::ConnectionId;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::state::RelayState;

pub(crate) fn upgrade(ws: WebSocketUpgrade, state: RelayState) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: RelayState) {
    let id = ConnectionId::new();
    let (outbound_tx, mut outbound) = mpsc::channel::<String>(state.client_queue);
    if state.hub.join(id, Arc::new(outbound_tx)).is_err() {
        return;
    }
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            out = outbound.recv() => match out {
                Some(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                None => {
                    debug!(target: "ws", %id, "dropped by hub");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if text.trim() == "ping" && sender.send(Message::Text("pong".into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = sender.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(target: "ws", %id, ?frame, "closed by client");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(target: "ws", %id, %err, "socket error");
                    break;
                }
                None => break,
            },
        }
    }

    state.hub.leave(id);
    info!(target: "ws", %id, clients = state.hub.len(), "viewer disconnected");
}

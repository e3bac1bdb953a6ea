//! Terminal WebSocket.
//!
//! Terminal bytes travel as binary frames in both directions; control
//! messages are JSON text frames. Every connection starts out as a primary
//! viewer until it registers otherwise.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use clawterm_core::{ClientMessage, DeviceClass};

use super::AppState;
use crate::bridge::{BridgeController, CLIENT_QUEUE_CAPACITY, ClientEvent, ClientId};

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.bridge))
}

async fn handle_socket(socket: WebSocket, bridge: BridgeController) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
    let client_id = bridge.add_client(tx, DeviceClass::Primary).await;

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let Some(message) = to_ws_message(event) else { continue };
                if sender.send(message).await.is_err() {
                    debug!(%client_id, "WebSocket send failed");
                    break;
                }
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Binary(data))) => bridge.write(&data).await,
                Some(Ok(Message::Text(text))) => handle_text(&bridge, client_id, text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(%client_id, error = %e, "WebSocket receive failed");
                    break;
                }
            },
        }
    }

    bridge.remove_client(client_id).await;
}

async fn handle_text(bridge: &BridgeController, client_id: ClientId, text: &str) {
    match ClientMessage::parse(text) {
        Ok(ClientMessage::Register { device_class }) => {
            bridge.register_device(client_id, device_class).await;
        }
        Ok(ClientMessage::Input { data }) => bridge.write(data.as_bytes()).await,
        Ok(ClientMessage::Resize { cols, rows }) => {
            bridge.resize_if_allowed(client_id, cols, rows).await;
        }
        Err(e) => debug!(%client_id, error = %e, "Ignoring malformed client message"),
    }
}

fn to_ws_message(event: ClientEvent) -> Option<Message> {
    match event {
        ClientEvent::Output(bytes) => Some(Message::Binary(bytes)),
        ClientEvent::Message(msg) => match msg.to_json() {
            Ok(json) => Some(Message::Text(json.into())),
            Err(e) => {
                warn!(error = %e, "Failed to encode server message");
                None
            }
        },
    }
}

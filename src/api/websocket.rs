use axum::{
    extract::{
        Extension,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::bus::MessageClass;
use crate::node::FleetNode;

pub async fn handle_ws(
    ws: WebSocketUpgrade,
    Extension(node): Extension<Arc<FleetNode>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, node))
}

/// Pushes hub events out and forwards inbound text to the Control channel
/// until either side goes away.
async fn serve_socket(socket: WebSocket, node: Arc<FleetNode>) {
    let (mut outbound, mut inbound) = socket.split();
    let mut events = node.hub.subscribe();
    tracing::info!("UI socket connected ({} viewer(s))", node.hub.subscriber_count());

    let mut push = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("UI socket lagging, skipped {} event(s)", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode UI event: {}", e);
                    continue;
                }
            };
            if outbound.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let bus_node = node.clone();
    let mut pull = tokio::spawn(async move {
        while let Some(Ok(message)) = inbound.next().await {
            match message {
                Message::Text(text) => {
                    let text = text.trim();
                    if let Err(e) = bus_node.bus.send(MessageClass::Control, text).await {
                        tracing::warn!("Rejected operator command '{}': {}", text, e);
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut push => pull.abort(),
        _ = &mut pull => push.abort(),
    }
    tracing::info!("UI socket disconnected");
}

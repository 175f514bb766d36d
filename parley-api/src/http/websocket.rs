//! WebSocket signaling endpoint
//!
//! Each socket gets a fresh connection id. Inbound frames are dispatched one
//! at a time, in arrival order; outbound messages are drained from the peer's
//! hub queue by a dedicated writer task.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use parley_sfu::ConnectionId;
use tracing::{debug, error, info, warn};

use crate::http::AppState;

pub async fn websocket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = ConnectionId::new(nanoid::nanoid!());
    let dispatcher = state.dispatcher;

    let mut outbound = match dispatcher.connect(&connection_id) {
        Ok(rx) => rx,
        Err(e) => {
            error!(connection_id = %connection_id, error = %e, "Failed to register connection");
            return;
        }
    };

    info!(connection_id = %connection_id, "WebSocket connection established");

    let (mut ws_sink, mut ws_stream) = socket.split();

    // Hub queue -> WebSocket. Ends when the hub drops this peer's sender.
    let writer_id = connection_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match message.to_text() {
                Ok(text) => text,
                Err(e) => {
                    warn!(connection_id = %writer_id, error = %e, "Failed to encode outbound message");
                    continue;
                }
            };
            if let Err(e) = ws_sink.send(Message::Text(text.into())).await {
                debug!(connection_id = %writer_id, error = %e, "WebSocket send failed");
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    while let Some(frame) = ws_stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                dispatcher.handle_text(&connection_id, text.as_str()).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {
                debug!(connection_id = %connection_id, "Ignoring binary frame");
            }
            Ok(_) => {}
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "WebSocket receive failed");
                break;
            }
        }
    }

    let report = dispatcher.disconnect(&connection_id).await;
    writer.abort();

    info!(
        connection_id = %connection_id,
        transports_closed = report.transports_closed,
        producers_closed = report.producers_closed,
        consumers_closed = report.consumers_closed,
        "WebSocket connection closed"
    );
}

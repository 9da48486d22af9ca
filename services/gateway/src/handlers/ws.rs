use crate::error::AppError;
use crate::peer::PeerKey;
use crate::rate_limit::WS_CONNECT_LIMIT;
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use event_broker::{parse_client_message, ServerMessage, Subscriber};
use futures::stream::StreamExt;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    peer: PeerKey,
) -> Result<Response, AppError> {
    state
        .rate_limiter
        .check("ws_connections", &peer.0, WS_CONNECT_LIMIT)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, peer)))
}

enum Next {
    Inbound(Option<Result<Message, axum::Error>>),
    Outbound(Option<ServerMessage>),
}

async fn handle_socket(mut socket: WebSocket, state: AppState, peer: PeerKey) {
    let subscriber = state.broker.connect();
    tracing::info!(client_id = subscriber.id(), peer = %peer.0, "WebSocket connected");

    loop {
        let next = tokio::select! {
            inbound = socket.next() => Next::Inbound(inbound),
            outbound = subscriber.recv() => Next::Outbound(outbound),
        };

        match next {
            Next::Inbound(Some(Ok(Message::Text(text)))) => on_text(&subscriber, text.as_str()),
            Next::Inbound(Some(Ok(Message::Close(_)))) | Next::Inbound(None) => break,
            Next::Inbound(Some(Ok(_))) => {
                // Protocol-level ping/pong frames still count as liveness.
                state.broker.record_activity(subscriber.id());
            }
            Next::Inbound(Some(Err(e))) => {
                tracing::debug!(client_id = subscriber.id(), error = %e, "WebSocket read failed");
                break;
            }
            Next::Outbound(Some(message)) => {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to encode outbound message");
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            // Dropped by the broker (stale or overflowed).
            Next::Outbound(None) => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }

    tracing::info!(client_id = subscriber.id(), "WebSocket closed");
}

fn on_text(subscriber: &Subscriber, text: &str) {
    match parse_client_message(text) {
        Ok(message) => subscriber.handle(message),
        Err(e) => subscriber.send_error(format!("unrecognized message: {}", e)),
    }
}

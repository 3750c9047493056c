//! WebSocket push channel.
//!
//! The client authenticates with its first frame; the recipient identity
//! comes only from the verified token. After that the socket carries server
//! events one way and `ack` frames the other.

use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::response::Response;
use axum::routing::get;
use uuid::Uuid;

use herald_notifier::protocol::{AuthFailure, ClientMessage, ServerEvent};

use crate::middleware::auth::verify_token;
use crate::state::AppState;

/// Default time an unauthenticated socket may stay open.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Serialize and send one server event. Returns `false` once the client is gone.
async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize server event");
            return true;
        }
    };
    socket.send(Message::Text(text.into())).await.is_ok()
}

/// Wait for the `authenticate` frame and verify its token.
async fn handshake(
    socket: &mut WebSocket,
    secret: &str,
    timeout: Duration,
) -> Result<Uuid, AuthFailure> {
    let first = tokio::time::timeout(timeout, async {
        loop {
            match socket.recv().await {
                Some(Ok(Message::Text(text))) => return Some(text),
                // Control frames may precede the first data frame.
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                _ => return None,
            }
        }
    })
    .await
    .map_err(|_| AuthFailure::Invalid)?
    .ok_or(AuthFailure::Invalid)?;

    match serde_json::from_str::<ClientMessage>(first.as_str()) {
        Ok(ClientMessage::Authenticate { token }) => verify_token(&token, secret),
        _ => Err(AuthFailure::Invalid),
    }
}

async fn reject(mut socket: WebSocket, reason: AuthFailure) {
    send_event(&mut socket, &ServerEvent::Unauthorized { reason }).await;
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: reason.to_string().into(),
        })))
        .await;
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let recipient_id = match handshake(&mut socket, &state.config.jwt_secret, state.handshake_timeout).await {
        Ok(recipient_id) => recipient_id,
        Err(reason) => {
            tracing::debug!(reason = %reason, "WebSocket handshake rejected");
            reject(socket, reason).await;
            return;
        }
    };

    let (connection_id, mut events) = match state.gateway.connect(recipient_id).await {
        Ok(joined) => joined,
        Err(e) => {
            tracing::error!(recipient_id = %recipient_id, error = %e, "Failed to join recipient channel");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::ERROR,
                    reason: "unavailable".to_string().into(),
                })))
                .await;
            return;
        }
    };

    if send_event(&mut socket, &ServerEvent::Authenticated { recipient_id }).await {
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if !send_event(&mut socket, &event).await {
                        break;
                    }
                }
                msg = socket.recv() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ClientMessage>(text.as_str()) {
                                Ok(ClientMessage::Ack { ack_id, delivered }) => {
                                    state.gateway.client_ack(&connection_id, ack_id, delivered).await;
                                }
                                Ok(ClientMessage::Authenticate { .. }) => {
                                    tracing::debug!(connection_id = %connection_id, "Ignoring repeated authenticate frame");
                                }
                                Err(e) => {
                                    tracing::debug!(connection_id = %connection_id, error = %e, "Unreadable client frame");
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if socket.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket error");
                            break;
                        }
                    }
                }
            }
        }
    }

    state.gateway.disconnect(&connection_id).await;
}

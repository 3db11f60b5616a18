//! services/api/src/web/ws_handler.rs
//!
//! Live comment feed. Each connection opens its own comment watch and pushes
//! every snapshot to the browser until either side goes away.

use crate::web::{protocol::ServerMessage, rest::CommentQuery, state::AppState};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{error, info, warn};

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Path(candidate_id): Path<String>,
    Query(query): Query<CommentQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, candidate_id, query.policy_id))
}

async fn handle_socket(
    socket: WebSocket,
    app_state: Arc<AppState>,
    candidate_id: String,
    policy_id: Option<String>,
) {
    info!("Comment feed opened for candidate {}", candidate_id);
    let (mut sender, mut receiver) = socket.split();

    let mut comments = match app_state
        .reads
        .access()
        .watch_comments(&candidate_id, policy_id.as_deref())
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to open comment feed for {}: {}", candidate_id, e);
            let message = ServerMessage::Error {
                message: e.to_string(),
            };
            let _ = send_message(&mut sender, &message).await;
            return;
        }
    };

    loop {
        tokio::select! {
            next = comments.next() => match next {
                Some(Ok(snapshot)) => {
                    let message = ServerMessage::Comments { comments: snapshot };
                    if send_message(&mut sender, &message).await.is_err() {
                        info!("Client went away while sending comments.");
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!("Comment feed for {} failed: {}", candidate_id, e);
                    let message = ServerMessage::Error { message: e.to_string() };
                    let _ = send_message(&mut sender, &message).await;
                    break;
                }
                None => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => {
                    info!("Client closed the comment feed.");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
            },
        }
    }

    // Dropping the stream releases the store subscription.
    drop(comments);
    info!("Comment feed closed for candidate {}", candidate_id);
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(json.into())).await
}

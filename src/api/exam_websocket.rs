use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::error::ErrorCode;
use crate::exam::{ClientMessage, ExamServer, ServerMessage, SignalingContext};

/// Normal-closure code sent when the server tears the connection down cleanly
const CLOSE_NORMAL: u16 = 1000;

pub async fn handle_exam_websocket(websocket: WebSocket, server: Arc<ExamServer>) {
    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let mut ctx = SignalingContext::new(tx);
    tracing::info!(
        participant_id = %ctx.participant_id,
        "WebSocket connection established"
    );

    // Outbound pump: everything addressed to this participant goes through
    // the channel so room handlers never block on the socket.
    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_sender.send(message).await {
                tracing::debug!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
        let _ = ws_sender
            .send(Message::close_with(CLOSE_NORMAL, "closed"))
            .await;
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => {
                if message.is_close() {
                    break;
                }
                handle_frame(&server, &mut ctx, message).await;
            }
            Err(e) => {
                tracing::warn!(
                    participant_id = %ctx.participant_id,
                    error = %e,
                    "WebSocket error, closing connection"
                );
                break;
            }
        }
    }

    server.handle_disconnect(&ctx).await;

    let participant_id = ctx.participant_id.clone();
    // Dropping the last outbound sender lets the pump drain queued frames and
    // finish with a normal-closure frame.
    drop(ctx);
    let _ = sender_task.await;
    tracing::info!(
        participant_id = %participant_id,
        "WebSocket connection closed"
    );
}

/// Parse and dispatch one inbound frame. A frame that fails to parse is a
/// protocol error: the message is rejected with `error{Malformed}` and the
/// connection stays open.
async fn handle_frame(server: &Arc<ExamServer>, ctx: &mut SignalingContext, message: Message) {
    let Ok(text) = message.to_str() else {
        // Binary, ping and pong frames carry no signaling
        return;
    };

    match serde_json::from_str::<ClientMessage>(text) {
        Ok(client_message) => {
            server.handle_message(ctx, client_message).await;
        }
        Err(e) => {
            tracing::debug!(
                participant_id = %ctx.participant_id,
                error = %e,
                "Failed to parse client message"
            );
            ctx.send(&ServerMessage::Error {
                code: ErrorCode::Malformed,
                message: format!("malformed message: {}", e),
            });
        }
    }
}

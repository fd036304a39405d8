use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State as AxumState,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use crate::Server;

type OutboundSender = mpsc::Sender<Message>;

enum OutboundSendError {
    Closed,
    Full,
}

/// Decrements the connection gauge when the socket task ends.
struct ConnectionGuard {
    server: Arc<Server>,
}

impl ConnectionGuard {
    fn new(server: Arc<Server>) -> Self {
        server.ws_metrics().inc_connections();
        Self { server }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.server.ws_metrics().dec_connections();
    }
}

pub(super) async fn updates_ws(
    AxumState(server): AxumState<Arc<Server>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let max_message_bytes = server.config.ws_max_message_bytes();
    ws.max_message_size(max_message_bytes)
        .max_frame_size(max_message_bytes)
        .on_upgrade(move |socket| handle_updates_ws(socket, server))
}

async fn handle_updates_ws(socket: WebSocket, server: Arc<Server>) {
    let _guard = ConnectionGuard::new(server.clone());
    tracing::info!("updates websocket connected");
    let (mut sender, mut receiver) = socket.split();
    let mut updates = server.update_subscriber();

    let (out_tx, mut out_rx) = mpsc::channel::<Message>(server.config.ws_outbound_capacity());
    let writer_server = server.clone();
    let send_timeout = server.config.ws_send_timeout();
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            match timeout(send_timeout, sender.send(msg)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    writer_server.ws_metrics().inc_send_error();
                    tracing::warn!("failed to send update; client disconnected");
                    break;
                }
                Err(_) => {
                    writer_server.ws_metrics().inc_send_timeout();
                    tracing::warn!("websocket send timed out; closing connection");
                    break;
                }
            }
        }
        let _ = sender.close().await;
    });

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if enqueue_message(&out_tx, Message::Pong(data), &server).is_err() {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        tracing::warn!(?err, "websocket error");
                        break;
                    }
                    _ => {}
                }
            }
            update = updates.recv() => {
                match update {
                    Ok(notification) => {
                        let text = match serde_json::to_string(&notification) {
                            Ok(text) => text,
                            Err(err) => {
                                tracing::error!(?err, "failed to encode play notification");
                                continue;
                            }
                        };
                        if let Err(err) = enqueue_message(&out_tx, Message::Text(text), &server) {
                            if matches!(err, OutboundSendError::Full) {
                                tracing::warn!("websocket outbound queue full; closing connection");
                            }
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "websocket client lagged; skipping notifications");
                        server.ws_metrics().add_lagged(skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    tracing::info!("updates websocket disconnected");
    drop(out_tx);
    let _ = writer_handle.await;
}

fn enqueue_message(
    sender: &OutboundSender,
    message: Message,
    server: &Server,
) -> Result<(), OutboundSendError> {
    match sender.try_send(message) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(_)) => {
            server.ws_metrics().inc_queue_full();
            Err(OutboundSendError::Full)
        }
        Err(mpsc::error::TrySendError::Closed(_)) => Err(OutboundSendError::Closed),
    }
}

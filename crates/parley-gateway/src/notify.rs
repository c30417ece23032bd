use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use parley_types::events::NotifyEvent;

use crate::CLOSE_INTERNAL_ERROR;
use crate::delivery::with_store;
use crate::state::GatewayState;

/// Per-user liveness channel. On a fixed interval, poll the store for
/// unread messages addressed to this user and emit one lightweight ping
/// per row — sender id and message id, never bodies. Redundant to the
/// direct per-pair push by design; it exists so a user with no open
/// conversation still learns that something is waiting.
pub async fn run_notification(
    socket: WebSocket,
    state: GatewayState,
    user_id: i64,
    poll_interval: Duration,
) {
    let conn_id = state.notify.connect(user_id).await;
    info!("user {} connected to notifications", user_id);

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut ticker = tokio::time::interval(poll_interval);

    'outer: loop {
        tokio::select! {
            _ = ticker.tick() => {
                let unread = match with_store(&state.db, move |db| db.unread_for(user_id)).await {
                    Ok(unread) => unread,
                    Err(e) => {
                        // Close with an error code instead of looping on a
                        // broken store.
                        warn!("user {} unread poll failed: {}", user_id, e);
                        let _ = ws_tx
                            .send(Message::Close(Some(CloseFrame {
                                code: CLOSE_INTERNAL_ERROR,
                                reason: "unread poll failed".into(),
                            })))
                            .await;
                        break 'outer;
                    }
                };

                for pointer in unread {
                    let event = NotifyEvent {
                        sender_id: pointer.sender_id,
                        message_id: pointer.message_id,
                    };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(_) => continue,
                    };
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break 'outer;
                    }
                }
            }

            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                // The notification channel is outbound-only; inbound text
                // and binary frames are ignored.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("user {} notification socket error: {}", user_id, e);
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: CLOSE_INTERNAL_ERROR,
                            reason: "transport error".into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    }

    state.notify.disconnect(user_id, conn_id).await;
    info!("user {} disconnected from notifications", user_id);
}

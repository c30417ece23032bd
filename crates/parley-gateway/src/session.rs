use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc::unbounded_channel;
use tracing::{error, info, warn};

use parley_crypto::MessageCipher;
use parley_db::Database;
use parley_types::api::StatusMessage;
use parley_types::events::{
    ChangeMessagePayload, ClientFrame, DeleteMessagePayload, SendPayload, VotePayload,
};
use parley_types::models::UserProfile;

use crate::CLOSE_INTERNAL_ERROR;
use crate::delivery::with_store;
use crate::error::{SessionError, SessionResult};
use crate::state::GatewayState;

/// Protocol state machine for one conversation socket.
///
/// The caller has already established identity and checked that the peer
/// exists, so the session goes straight from Connecting to Active:
/// register the ordered pair key, mark unread peer->self messages read,
/// replay the full pair history, then dispatch inbound frames strictly in
/// receipt order until the transport closes.
pub async fn run_conversation(
    socket: WebSocket,
    state: GatewayState,
    user: UserProfile,
    peer_id: i64,
) {
    let pair = (user.id, peer_id);
    let (tx, mut rx) = unbounded_channel();

    // Registering before the history fetch means a record pushed by the
    // peer mid-replay waits in the channel instead of being lost.
    let conn_id = state.registry.connect(pair, tx).await;
    info!("{} ({}) opened conversation with {}", user.user_name, user.id, peer_id);

    let (mut ws_tx, mut ws_rx) = socket.split();

    if let Err(e) = enter_active(&mut ws_tx, &state, user.id, peer_id).await {
        error!("{} ({}) session start failed: {}", user.user_name, user.id, e);
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_INTERNAL_ERROR,
                reason: "session start failed".into(),
            })))
            .await;
        state.registry.disconnect(pair, conn_id).await;
        return;
    }

    loop {
        tokio::select! {
            // Records fanned out by the delivery engine, from either side
            // of the pair.
            maybe = rx.recv() => match maybe {
                Some(record) => {
                    if send_json(&mut ws_tx, &record).await.is_err() {
                        break;
                    }
                }
                None => break,
            },

            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if dispatch_frame(&mut ws_tx, &state, &user, peer_id, &text).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    let status = StatusMessage::new("Error processing frame: binary frames are not part of this protocol");
                    if send_json(&mut ws_tx, &status).await.is_err() {
                        break;
                    }
                }
                // Ping/Pong are answered by the framework.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    warn!("{} ({}) socket error: {}", user.user_name, user.id, e);
                    break;
                }
            }
        }
    }

    state.registry.disconnect(pair, conn_id).await;
    info!("{} ({}) closed conversation with {}", user.user_name, user.id, peer_id);
}

/// The two entry steps of Active: flip unread peer->self rows to read
/// (a store update only — the peer is not pushed to), then replay the
/// full ordered history to the newly connected client.
async fn enter_active(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    state: &GatewayState,
    user_id: i64,
    peer_id: i64,
) -> anyhow::Result<()> {
    with_store(&state.db, move |db| {
        db.mark_read(user_id, peer_id, true).map(|_| ())
    })
    .await?;

    let records = state.engine.history(user_id, peer_id).await?;
    for record in &records {
        send_json(ws_tx, record)
            .await
            .map_err(|e| anyhow::anyhow!("history replay send: {}", e))?;
    }
    Ok(())
}

/// Handle one inbound frame. Frame-level failures are reported inline and
/// consumed; only transport failures bubble up (and end the session).
async fn dispatch_frame(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    state: &GatewayState,
    user: &UserProfile,
    peer_id: i64,
    text: &str,
) -> Result<(), axum::Error> {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("{} ({}) bad frame: {}", user.user_name, user.id, e);
            let status = StatusMessage::new(format!("Error processing frame: {}", e));
            return send_json(ws_tx, &status).await;
        }
    };

    match frame {
        ClientFrame::Send(payload) => match handle_send(state, user, peer_id, payload).await {
            // Both live halves, including the requester, receive the
            // record through the registry channel.
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("{} ({}) send failed: {}", user.user_name, user.id, e);
                send_json(ws_tx, &StatusMessage::new(format!("Error sending message: {}", e))).await
            }
        },

        ClientFrame::Vote(payload) => match process_vote(&state.db, user.id, &payload).await {
            Ok(status) => {
                send_json(ws_tx, &StatusMessage::new(status)).await?;
                refresh_history(ws_tx, state, user.id, peer_id).await
            }
            Err(e) => {
                warn!("{} ({}) vote failed: {}", user.user_name, user.id, e);
                send_json(ws_tx, &StatusMessage::new(format!("Error processing vote: {}", e))).await
            }
        },

        ClientFrame::ChangeMessage(payload) => {
            match change_message(&state.db, &state.cipher, user.id, &payload).await {
                Ok(()) => {
                    send_json(ws_tx, &StatusMessage::new("Message updated")).await?;
                    refresh_history(ws_tx, state, user.id, peer_id).await
                }
                Err(e) => {
                    warn!("{} ({}) edit failed: {}", user.user_name, user.id, e);
                    send_json(ws_tx, &StatusMessage::new(format!("Error processing change: {}", e)))
                        .await
                }
            }
        }

        ClientFrame::DeleteMessage(payload) => {
            match delete_message(&state.db, user.id, &payload).await {
                Ok(()) => {
                    send_json(ws_tx, &StatusMessage::new("Message deleted")).await?;
                    refresh_history(ws_tx, state, user.id, peer_id).await
                }
                Err(e) => {
                    warn!("{} ({}) delete failed: {}", user.user_name, user.id, e);
                    send_json(ws_tx, &StatusMessage::new(format!("Error processing delete: {}", e)))
                        .await
                }
            }
        }
    }
}

/// Re-derive ground truth from the store and re-send it — to the
/// requester only. The peer's view may go stale until its own next
/// mutating action or reconnect; that window is accepted protocol
/// behavior, not something this function compensates for.
async fn refresh_history(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    state: &GatewayState,
    user_id: i64,
    peer_id: i64,
) -> Result<(), axum::Error> {
    match state.engine.history(user_id, peer_id).await {
        Ok(records) => {
            for record in &records {
                send_json(ws_tx, record).await?;
            }
            Ok(())
        }
        Err(e) => {
            error!(user = user_id, peer = peer_id, "history refresh failed: {}", e);
            send_json(ws_tx, &StatusMessage::new("An unexpected error occurred")).await
        }
    }
}

async fn handle_send(
    state: &GatewayState,
    user: &UserProfile,
    peer_id: i64,
    payload: SendPayload,
) -> SessionResult<()> {
    if payload.message.is_none() && payload.file_url.is_none() {
        return Err(SessionError::Validation(
            "send requires a message or a fileUrl".into(),
        ));
    }

    state
        .engine
        .send_message(
            payload.message,
            payload.file_url,
            user,
            peer_id,
            payload.original_message_id,
        )
        .await?;

    // Re-run the read mark for the pair after a successful send.
    let user_id = user.id;
    with_store(&state.db, move |db| {
        db.mark_read(user_id, peer_id, true).map(|_| ())
    })
    .await?;
    Ok(())
}

/// Vote toggle. With an existing (user, message) vote any direction
/// removes it; without one, only +1 inserts and anything else is a no-op.
pub(crate) async fn process_vote(
    db: &Arc<Database>,
    user_id: i64,
    payload: &VotePayload,
) -> SessionResult<&'static str> {
    let message_id = payload.message_id;
    let dir = payload.dir;

    let status = with_store(db, move |db| {
        if db.find_message(message_id)?.is_none() {
            return Ok(None);
        }

        let found = db.find_vote(user_id, message_id)?;
        let status = if dir == 1 {
            match found {
                Some(_) => {
                    db.delete_vote(user_id, message_id)?;
                    "Successfully removed vote"
                }
                None => {
                    db.insert_vote(user_id, message_id, dir)?;
                    "Successfully added vote"
                }
            }
        } else {
            match found {
                Some(_) => {
                    db.delete_vote(user_id, message_id)?;
                    "Successfully deleted vote"
                }
                None => "Vote does not exist or has already been removed",
            }
        };
        Ok(Some(status))
    })
    .await?;

    status.ok_or(SessionError::NotFound)
}

/// Overwrite the body of an owned message. The new body goes through the
/// cipher like any other; the edited flag is set by the store.
pub(crate) async fn change_message(
    db: &Arc<Database>,
    cipher: &Arc<MessageCipher>,
    user_id: i64,
    payload: &ChangeMessagePayload,
) -> SessionResult<()> {
    let token = cipher.encrypt(&payload.message)?;
    let id = payload.id;

    let changed = with_store(db, move |db| db.update_message_body(id, user_id, &token)).await?;
    if changed { Ok(()) } else { Err(SessionError::NotFound) }
}

pub(crate) async fn delete_message(
    db: &Arc<Database>,
    user_id: i64,
    payload: &DeleteMessagePayload,
) -> SessionResult<()> {
    let id = payload.id;
    let deleted = with_store(db, move |db| db.delete_message(id, user_id)).await?;
    if deleted { Ok(()) } else { Err(SessionError::NotFound) }
}

async fn send_json<T: Serialize>(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    value: &T,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(value).map_err(axum::Error::new)?;
    ws_tx.send(Message::Text(text.into())).await
}

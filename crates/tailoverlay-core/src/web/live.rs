//! Live event stream over WebSocket.
//!
//! The caller is authorized before the upgrade is completed. A peer that is
//! not a member gets its socket closed straight away with a policy violation
//! and never sees a single event.
//!
//! Each accepted socket runs two halves: a writer draining the subscriber's
//! queue into the socket, and a reader turning inbound `chat` frames into
//! chat messages posted as the resolved caller.

use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};

use crate::events::ClientMessage;
use crate::session::Caller;

use super::handlers::SharedState;

/// GET /ws - Open the live stream.
pub async fn upgrade(
    State(session): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    match session.authorize_subscriber(peer.ip()).await {
        Ok(caller) => ws.on_upgrade(move |socket| serve(socket, session, caller)),
        Err(e) => {
            tracing::warn!("Refused live stream for {}: {}", peer, e);
            let reason = e.to_string();
            ws.on_upgrade(move |socket| refuse(socket, reason))
        }
    }
}

async fn refuse(mut socket: WebSocket, reason: String) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: reason.into(),
        })))
        .await;
}

async fn serve(socket: WebSocket, session: SharedState, caller: Caller) {
    let subscription = session.subscribe(&caller).await;
    let (subscription_id, mut events) = subscription.into_parts();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = events.recv().await {
            if ws_tx.send(Message::Text(frame.as_ref().into())).await.is_err() {
                return;
            }
        }
        // The broadcaster dropped us: shutdown or too slow to keep up.
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: close_code::AWAY,
                reason: "workspace closed".into(),
            })))
            .await;
    });

    let recv_session = session.clone();
    let recv_caller = caller.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = ws_rx.next().await {
            match message {
                Ok(Message::Text(text)) => match ClientMessage::decode(text.as_str()) {
                    Ok(ClientMessage::Chat { text }) => {
                        if let Err(e) = recv_session.post_chat_as(&recv_caller, &text).await {
                            tracing::debug!("Dropped chat from {}: {}", recv_caller.identity(), e);
                        }
                    }
                    Err(e) => {
                        tracing::debug!("Ignored frame from {}: {}", recv_caller.identity(), e);
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("Live stream error from {}: {}", recv_caller.identity(), e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    session.unsubscribe(subscription_id).await;
}

//! Upload progress notification channel over WebSocket
//!
//! The client opens the socket, sends a single handshake carrying its
//! correlation id, and from then on only listens. Progress frames are pushed
//! by the registry; when the registry terminates the entry the socket is
//! closed with a normal close frame.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, info, warn};

use fileshare_core::models::CorrelationId;
use fileshare_core::progress::{
    channel, ConnectionRegistry, CorrelationMessage, ProtocolError, HANDSHAKE_PREFIX,
};

use crate::http::AppState;

/// Handshakes are tiny; anything larger is not a client of ours
const MAX_MESSAGE_SIZE: usize = 4 * 1024;

/// Settings for one notification channel
#[derive(Debug, Clone, Copy)]
pub struct ChannelSettings {
    pub handshake_timeout: Duration,
    pub capacity: usize,
}

/// WebSocket handler for upload progress notifications
///
/// <ws://host/ws/progress>, first client message `UPLOAD_ID:<correlation id>`
pub async fn progress_channel_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let settings = ChannelSettings {
        handshake_timeout: state.settings.handshake_timeout,
        capacity: state.settings.channel_capacity,
    };
    let registry = state.registry.clone();

    ws.max_message_size(MAX_MESSAGE_SIZE).on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        serve_channel(stream, sink, registry, settings).await;
    })
}

/// Run one notification channel until either side closes it
pub async fn serve_channel<R, W>(
    mut incoming: R,
    mut outgoing: W,
    registry: ConnectionRegistry,
    settings: ChannelSettings,
) where
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let handshake = tokio::time::timeout(settings.handshake_timeout, read_handshake(&mut incoming)).await;
    let correlation_id = match handshake {
        Ok(Ok(Some(id))) => id,
        Ok(Ok(None)) => {
            debug!("Notification channel closed before handshake");
            return;
        }
        Ok(Err(e)) => {
            debug!(error = %e, "Rejected notification channel handshake");
            close(&mut outgoing, close_code::POLICY, e.to_string()).await;
            return;
        }
        Err(_) => {
            warn!(timeout = ?settings.handshake_timeout, "Notification channel handshake timed out");
            close(&mut outgoing, close_code::POLICY, "handshake timeout".to_string()).await;
            return;
        }
    };

    let (handle, mut receiver) = channel(settings.capacity);
    let channel_id = handle.channel_id();
    registry.register(correlation_id.clone(), handle);

    loop {
        tokio::select! {
            message = receiver.recv() => {
                let Some(text) = message else {
                    // terminated by the registry: upload finished or channel went idle
                    close(&mut outgoing, close_code::NORMAL, "upload finished".to_string()).await;
                    return;
                };
                if let Err(e) = outgoing.send(Message::Text(text.into())).await {
                    warn!(correlation_id = %correlation_id, error = %e, "Failed to send progress notification");
                    break;
                }
            }
            frame = incoming.next() => {
                match frame {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(correlation_id = %correlation_id, "Client closed notification channel");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(correlation_id = %correlation_id, error = %e, "Notification channel transport error");
                        break;
                    }
                    // nothing but the handshake is read from the client
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    if registry.release(correlation_id.as_str(), channel_id) {
        info!(correlation_id = %correlation_id, "Notification channel released after disconnect");
    }
}

/// Wait for the handshake. `Ok(None)` means the client went away first.
async fn read_handshake<R>(incoming: &mut R) -> Result<Option<CorrelationId>, ProtocolError>
where
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        let text = match incoming.next().await {
            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
            Some(Ok(Message::Binary(bytes))) => std::str::from_utf8(&bytes)
                .map_err(|_| ProtocolError::InvalidUtf8)?
                .to_owned(),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_)) | Err(_)) | None => return Ok(None),
        };

        return match CorrelationMessage::decode(&text)? {
            CorrelationMessage::Handshake { correlation_id } => Ok(Some(correlation_id)),
            other => Err(ProtocolError::UnexpectedMessage {
                expected: HANDSHAKE_PREFIX,
                received: other.prefix(),
            }),
        };
    }
}

async fn close<W>(outgoing: &mut W, code: u16, reason: String)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    if let Err(e) = outgoing.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "Failed to send close frame");
    }
}

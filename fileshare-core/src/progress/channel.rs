//! Server side of one notification channel
//!
//! The transport task owns the [`ChannelReceiver`] and forwards whatever it
//! yields to the socket. The [`ChannelHandle`] lives inside the registry entry
//! and is the only way to push messages or close the channel.

use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel full: client too slow to consume notifications")]
    Full,

    #[error("channel closed: client disconnected")]
    Closed,
}

/// Create a bounded notification channel
#[must_use]
pub fn channel(capacity: usize) -> (ChannelHandle, ChannelReceiver) {
    let channel_id = NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed);
    let (sender, messages) = mpsc::channel(capacity.max(1));
    let closed = CancellationToken::new();

    let handle = ChannelHandle {
        channel_id,
        sender,
        closed: closed.clone(),
    };
    let receiver = ChannelReceiver {
        channel_id,
        messages,
        closed,
    };
    (handle, receiver)
}

/// Sending half, exclusively owned by a registry entry
#[derive(Debug)]
pub struct ChannelHandle {
    channel_id: u64,
    sender: mpsc::Sender<String>,
    closed: CancellationToken,
}

impl ChannelHandle {
    /// Process-unique id distinguishing two channels registered under the same correlation id
    #[must_use]
    pub const fn channel_id(&self) -> u64 {
        self.channel_id
    }

    /// Queue a message without waiting. Never blocks the caller.
    pub fn try_send(&self, message: String) -> Result<(), ChannelError> {
        if self.closed.is_cancelled() {
            return Err(ChannelError::Closed);
        }
        self.sender.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => ChannelError::Full,
            TrySendError::Closed(_) => ChannelError::Closed,
        })
    }

    /// Ask the transport to close the underlying connection. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.sender.is_closed()
    }
}

/// Receiving half, owned by the transport task
#[derive(Debug)]
pub struct ChannelReceiver {
    channel_id: u64,
    messages: mpsc::Receiver<String>,
    closed: CancellationToken,
}

impl ChannelReceiver {
    #[must_use]
    pub const fn channel_id(&self) -> u64 {
        self.channel_id
    }

    /// Next message to deliver, or `None` once the channel is closed.
    ///
    /// Messages queued before the close are still delivered first, so the
    /// final 100% notification always precedes the close.
    pub async fn recv(&mut self) -> Option<String> {
        tokio::select! {
            biased;
            message = self.messages.recv() => message,
            () = self.closed.cancelled() => self.messages.try_recv().ok(),
        }
    }
}

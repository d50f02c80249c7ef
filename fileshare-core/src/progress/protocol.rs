//! Correlation message framing for the notification channel
//!
//! Every message on the channel is `prefix + payload`. The handshake is the
//! only message a client ever sends; everything else flows server to client.
//! Both literals are shared with the browser client and must not change.

use thiserror::Error;

use crate::models::CorrelationId;

/// Prefix of the client handshake; payload is the correlation id.
pub const HANDSHAKE_PREFIX: &str = "UPLOAD_ID:";

/// Prefix of a progress notification; payload is the decimal percentage.
pub const PERCENTAGE_PREFIX: &str = "PERCENTAGE:";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("message does not start with a known tag")]
    UnknownTag,

    #[error("message tagged {tag:?} carries an empty payload")]
    EmptyPayload { tag: &'static str },

    #[error("invalid percentage payload: {0:?}")]
    InvalidPercent(String),

    #[error("expected a {expected:?} message, got {received:?}")]
    UnexpectedMessage {
        expected: &'static str,
        received: &'static str,
    },

    #[error("message is not valid UTF-8")]
    InvalidUtf8,
}

/// A decoded notification-channel message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationMessage {
    Handshake { correlation_id: CorrelationId },
    Progress { percent: u8 },
}

impl CorrelationMessage {
    #[must_use]
    pub fn handshake(correlation_id: impl Into<CorrelationId>) -> Self {
        Self::Handshake {
            correlation_id: correlation_id.into(),
        }
    }

    #[must_use]
    pub const fn progress(percent: u8) -> Self {
        Self::Progress { percent }
    }

    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::Handshake { .. } => HANDSHAKE_PREFIX,
            Self::Progress { .. } => PERCENTAGE_PREFIX,
        }
    }

    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Handshake { correlation_id } => prefix_message(correlation_id.as_str(), HANDSHAKE_PREFIX),
            Self::Progress { percent } => prefix_message(&percent.to_string(), PERCENTAGE_PREFIX),
        }
    }

    pub fn decode(message: &str) -> Result<Self, ProtocolError> {
        if let Some(payload) = extract_prefixed_payload(message, HANDSHAKE_PREFIX) {
            if payload.is_empty() {
                return Err(ProtocolError::EmptyPayload { tag: HANDSHAKE_PREFIX });
            }
            return Ok(Self::handshake(payload));
        }

        if let Some(payload) = extract_prefixed_payload(message, PERCENTAGE_PREFIX) {
            if payload.is_empty() {
                return Err(ProtocolError::EmptyPayload { tag: PERCENTAGE_PREFIX });
            }
            let percent = payload
                .parse::<u8>()
                .ok()
                .filter(|p| *p <= 100)
                .ok_or_else(|| ProtocolError::InvalidPercent(payload.to_string()))?;
            return Ok(Self::progress(percent));
        }

        Err(ProtocolError::UnknownTag)
    }
}

#[must_use]
pub fn prefix_message(payload: &str, prefix: &str) -> String {
    let mut message = String::with_capacity(prefix.len() + payload.len());
    message.push_str(prefix);
    message.push_str(payload);
    message
}

/// Payload after `prefix`, or `None` when the message carries another tag
#[must_use]
pub fn extract_prefixed_payload<'a>(message: &'a str, prefix: &str) -> Option<&'a str> {
    message.strip_prefix(prefix)
}

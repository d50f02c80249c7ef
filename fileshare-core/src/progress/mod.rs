//! Upload-progress correlation
//!
//! A client uploads over plain HTTP while holding a separate notification
//! channel open. Both carry the same client-generated correlation id; the
//! [`ProgressCorrelator`] samples the upload and hands percentages to the
//! [`ConnectionRegistry`], which owns the channels and reaps idle ones.

pub mod channel;
pub mod correlator;
pub mod protocol;
pub mod registry;

pub use channel::{channel, ChannelError, ChannelHandle, ChannelReceiver};
pub use correlator::{ProgressCorrelator, ProgressStream, TransferCompletion, TransferSample};
pub use protocol::{CorrelationMessage, ProtocolError, HANDSHAKE_PREFIX, PERCENTAGE_PREFIX};
pub use registry::{ConnectionRegistry, RegistryConfig};

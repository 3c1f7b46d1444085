//! Error taxonomy for the signaling layer
//!
//! Each variant is handled at the narrowest scope that can recover from it:
//! per message, per session, or (for an exhausted retry budget) per endpoint.

use crate::webrtc::TransportError;
use thiserror::Error;

/// Errors raised by signaling endpoints, channels and the session registry.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Offer/answer exchange could not be completed
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    /// The signaling channel is gone (peer closed, I/O error, keepalive timeout)
    #[error("signaling channel closed: {0}")]
    ChannelClosed(String),

    /// A message could not be queued on a channel
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Payload could not be decoded into a signaling message
    #[error("malformed signaling payload: {0}")]
    Malformed(String),

    /// Session id or channel already present in the registry
    #[error("duplicate session: {0}")]
    DuplicateSession(String),

    /// Concurrent session limit reached
    #[error("session limit reached ({0})")]
    SessionLimit(usize),

    /// Bounded reconnect policy ran out of attempts
    #[error("reconnect attempts exhausted after {attempts} retries")]
    ReconnectExhausted { attempts: u32 },

    /// WebSocket handshake or protocol error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Media transport engine error
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SignalingError {
    /// True for errors a reconnect loop should retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SignalingError::ChannelClosed(_)
                | SignalingError::SendFailed(_)
                | SignalingError::WebSocket(_)
                | SignalingError::NegotiationFailed(_)
                | SignalingError::Transport(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SignalingError>;

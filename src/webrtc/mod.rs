//! Peer transport sessions
//!
//! This module provides:
//! - The JSON signaling envelope exchanged over WebSocket
//! - The transport seam every media engine implements
//! - Per-channel sessions and the hub's session registry
//! - The webrtc-rs engine (feature `webrtc-transport`) and an in-process loopback engine

pub mod loopback;
pub mod registry;
pub mod session;
pub mod signaling;

#[cfg(feature = "webrtc-transport")]
pub mod media_track;
#[cfg(feature = "webrtc-transport")]
pub mod peer_connection;

pub use loopback::LoopbackTransportFactory;
#[cfg(feature = "webrtc-transport")]
pub use peer_connection::WebRtcTransportFactory;
pub use registry::{BroadcastReport, SessionHandle, SessionRegistry};
pub use session::{CandidateQueue, Session, SessionEvent, SessionState};
pub use signaling::{Command, CommandKind, IceCandidate, NegotiationRole, SessionDescription, SignalingMessage};

use crate::capture::Frame;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Media transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Peer connection creation failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// SDP processing failed
    #[error("SDP error: {0}")]
    Sdp(String),
    /// ICE candidate processing failed
    #[error("ICE error: {0}")]
    Ice(String),
    /// Media track error
    #[error("media error: {0}")]
    Media(String),
    /// Operation not valid for the transport's role or state
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Transport already closed
    #[error("transport closed")]
    Closed,
}

/// Events surfaced by a transport, consumed by the owning session loop
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Local connectivity candidate to relay to the peer
    LocalCandidate(IceCandidate),
    /// Media path is up
    Connected,
    /// Unrecoverable transport failure
    Failed(String),
    /// Transport closed by the remote side
    Closed,
    /// Decoded media sample (receiving side only)
    Frame(Frame),
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// One negotiated peer transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Generate the local offer and apply it as the local description
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    /// Apply a remote offer and produce the local answer
    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription, TransportError>;

    /// Apply the remote answer to a previously created offer
    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), TransportError>;

    /// Add a remote connectivity candidate; only valid once a remote description is set
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    /// Send one encoded frame on the outbound media track
    async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError>;

    /// Close the transport; further calls are no-ops
    async fn close(&self) -> Result<(), TransportError>;
}

/// Creates transports and their event streams
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, role: NegotiationRole) -> Result<(Arc<dyn Transport>, TransportEvents), TransportError>;
}

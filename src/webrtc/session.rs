//! Session lifecycle
//!
//! One session pairs a signaling channel with one transport. The owning task
//! feeds it channel messages and transport events in receipt order; each
//! input maps to at most one state transition.

use super::signaling::{IceCandidate, NegotiationRole, SdpKind, SessionDescription, SignalingMessage};
use super::{Transport, TransportError, TransportEvent};
use crate::capture::Frame;
use crate::error::SignalingError;
use crate::transport::websocket::{ChannelId, ChannelSender};
use crate::webrtc::Command;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Channel accepted, nothing negotiated yet
    Connecting,
    /// First negotiation object sent or received
    Negotiating,
    /// Transport reported readiness
    Connected,
    /// Teardown in progress
    Closing,
    /// Terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Remote candidates held until the remote description is applied
#[derive(Debug, Default)]
pub struct CandidateQueue {
    remote_applied: bool,
    pending: VecDeque<IceCandidate>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the candidate back when it can be applied right away
    pub fn push(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.remote_applied {
            Some(candidate)
        } else {
            self.pending.push_back(candidate);
            None
        }
    }

    /// Mark the remote description applied and take the backlog in arrival order
    pub fn mark_applied(&mut self) -> Vec<IceCandidate> {
        self.remote_applied = true;
        self.pending.drain(..).collect()
    }
}

/// What a processed input means for the owning loop
#[derive(Debug)]
pub enum SessionEvent {
    /// Nothing for the caller to do
    Idle,
    /// Transport just became ready
    Connected,
    /// Media sample received
    Frame(Frame),
    /// Application command received from the peer
    Command(Command),
}

/// One active (channel, transport) pairing
pub struct Session {
    /// Unique session ID
    id: String,
    /// Outbound half of the signaling channel
    channel: ChannelSender,
    /// Peer transport
    transport: Arc<dyn Transport>,
    role: NegotiationRole,
    state: RwLock<SessionState>,
    candidates: Mutex<CandidateQueue>,
    created_at: Instant,
    closed: AtomicBool,
}

impl Session {
    pub fn new(channel: ChannelSender, transport: Arc<dyn Transport>, role: NegotiationRole) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel,
            transport,
            role,
            state: RwLock::new(SessionState::Connecting),
            candidates: Mutex::new(CandidateQueue::new()),
            created_at: Instant::now(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel.id()
    }

    pub fn channel(&self) -> &ChannelSender {
        &self.channel
    }

    pub fn peer(&self) -> &str {
        self.channel.peer()
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Get session age
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn set_state(&self, state: SessionState) {
        let mut current = self.state.write();
        if *current != state && *current != SessionState::Closed {
            debug!("Session {} state change: {} -> {}", self.id, *current, state);
            *current = state;
        }
    }

    /// Send a message on this session's channel
    pub fn send(&self, message: &SignalingMessage) -> Result<(), SignalingError> {
        self.channel.send(message)
    }

    /// Offerer side: generate and send the offer
    pub async fn start_offer(&self) -> Result<(), SignalingError> {
        if self.role != NegotiationRole::Offerer {
            return Err(SignalingError::NegotiationFailed("answerer cannot create an offer".to_string()));
        }
        self.set_state(SessionState::Negotiating);
        let offer = self
            .transport
            .create_offer()
            .await
            .map_err(|e| SignalingError::NegotiationFailed(e.to_string()))?;
        self.channel.send(&SignalingMessage::description(offer))?;
        info!("Sent offer to {} (session {})", self.peer(), self.id);
        Ok(())
    }

    /// Process one signaling message from the peer
    pub async fn handle_signal(&self, message: SignalingMessage) -> Result<SessionEvent, SignalingError> {
        match message {
            SignalingMessage::Offer { sdp } => {
                if self.role != NegotiationRole::Answerer {
                    warn!("Session {}: ignoring offer from {}, this side offers", self.id, self.peer());
                    return Ok(SessionEvent::Idle);
                }
                self.set_state(SessionState::Negotiating);
                let answer = self
                    .transport
                    .accept_offer(SessionDescription::offer(sdp))
                    .await
                    .map_err(|e| SignalingError::NegotiationFailed(e.to_string()))?;
                self.channel.send(&SignalingMessage::description(answer))?;
                info!("Answered offer from {} (session {})", self.peer(), self.id);
                self.remote_description_applied().await;
                Ok(SessionEvent::Idle)
            }
            SignalingMessage::Answer { sdp } => {
                if self.role != NegotiationRole::Offerer || self.state() != SessionState::Negotiating {
                    warn!("Session {}: unexpected answer in state {}", self.id, self.state());
                    return Ok(SessionEvent::Idle);
                }
                self.transport
                    .apply_answer(SessionDescription { kind: SdpKind::Answer, sdp })
                    .await
                    .map_err(|e| SignalingError::NegotiationFailed(e.to_string()))?;
                debug!("Session {}: answer applied", self.id);
                self.remote_description_applied().await;
                Ok(SessionEvent::Idle)
            }
            SignalingMessage::Candidate(candidate) => {
                let ready = self.candidates.lock().push(candidate);
                match ready {
                    Some(candidate) => self.apply_candidate(candidate).await,
                    None => debug!("Session {}: queued early candidate", self.id),
                }
                Ok(SessionEvent::Idle)
            }
            SignalingMessage::Command(command) => Ok(SessionEvent::Command(command)),
        }
    }

    /// Process one transport event
    pub fn handle_transport_event(&self, event: TransportEvent) -> Result<SessionEvent, SignalingError> {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                self.channel.send(&SignalingMessage::Candidate(candidate))?;
                Ok(SessionEvent::Idle)
            }
            TransportEvent::Connected => {
                if self.is_connected() {
                    return Ok(SessionEvent::Idle);
                }
                self.set_state(SessionState::Connected);
                info!("Session {} connected with {}", self.id, self.peer());
                Ok(SessionEvent::Connected)
            }
            TransportEvent::Frame(frame) => Ok(SessionEvent::Frame(frame)),
            TransportEvent::Failed(reason) => Err(SignalingError::Transport(TransportError::ConnectionFailed(reason))),
            TransportEvent::Closed => Err(SignalingError::Transport(TransportError::Closed)),
        }
    }

    async fn remote_description_applied(&self) {
        let backlog = self.candidates.lock().mark_applied();
        if !backlog.is_empty() {
            debug!("Session {}: applying {} queued candidates", self.id, backlog.len());
        }
        for candidate in backlog {
            self.apply_candidate(candidate).await;
        }
    }

    async fn apply_candidate(&self, candidate: IceCandidate) {
        if let Err(e) = self.transport.add_remote_candidate(candidate).await {
            warn!("Session {}: failed to add remote candidate: {}", self.id, e);
        }
    }

    /// Tear down transport and channel; only the first call does anything
    pub async fn close(&self, reason: &str) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.set_state(SessionState::Closing);

        if let Err(e) = self.transport.close().await {
            warn!("Session {}: transport close failed: {}", self.id, e);
        }
        self.channel.close();

        self.set_state(SessionState::Closed);
        info!("Session {} with {} closed ({}) after {:?}", self.id, self.peer(), reason, self.age());
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("channel", &self.channel.id())
            .field("role", &self.role)
            .field("state", &self.state())
            .finish()
    }
}

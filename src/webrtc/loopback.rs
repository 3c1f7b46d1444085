//! In-process loopback transport
//!
//! Pairs an offerer and an answerer created from the same factory without any
//! network media path: the offer carries a rendezvous token, the answerer
//! looks it up, and frames sent by one side arrive as `TransportEvent::Frame`
//! on the other. Both ends must live in the same process.

use super::signaling::{IceCandidate, NegotiationRole, SdpKind, SessionDescription};
use super::{Transport, TransportError, TransportEvent, TransportEvents, TransportFactory};
use crate::capture::Frame;
use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

const SDP_PREFIX: &str = "loopback:";

struct Endpoint {
    events: mpsc::UnboundedSender<TransportEvent>,
    peer: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

impl Endpoint {
    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

#[derive(Default)]
struct Rendezvous {
    offers: Mutex<HashMap<String, Arc<Endpoint>>>,
}

/// Factory for loopback transports sharing one rendezvous table
#[derive(Clone, Default)]
pub struct LoopbackTransportFactory {
    rendezvous: Arc<Rendezvous>,
}

impl LoopbackTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers not yet answered
    pub fn pending_offers(&self) -> usize {
        self.rendezvous.offers.lock().len()
    }
}

#[async_trait]
impl TransportFactory for LoopbackTransportFactory {
    async fn create(&self, role: NegotiationRole) -> Result<(Arc<dyn Transport>, TransportEvents), TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = LoopbackTransport {
            token: Uuid::new_v4().to_string(),
            role,
            endpoint: Arc::new(Endpoint {
                events: tx,
                peer: Mutex::new(None),
            }),
            rendezvous: self.rendezvous.clone(),
            remote_set: AtomicBool::new(false),
            remote_candidates: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        };
        Ok((Arc::new(transport), rx))
    }
}

pub struct LoopbackTransport {
    token: String,
    role: NegotiationRole,
    endpoint: Arc<Endpoint>,
    rendezvous: Arc<Rendezvous>,
    remote_set: AtomicBool,
    remote_candidates: AtomicU64,
    closed: AtomicBool,
}

impl LoopbackTransport {
    fn local_candidate(&self) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:1 1 udp 2130706431 127.0.0.1 9 typ host ufrag {}", self.token),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    fn ensure_role(&self, role: NegotiationRole) -> Result<(), TransportError> {
        if self.role != role {
            return Err(TransportError::InvalidState(format!("{:?} transport cannot do this", self.role)));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.ensure_open()?;
        self.ensure_role(NegotiationRole::Offerer)?;
        self.rendezvous
            .offers
            .lock()
            .insert(self.token.clone(), self.endpoint.clone());
        self.endpoint.emit(TransportEvent::LocalCandidate(self.local_candidate()));
        Ok(SessionDescription::offer(format!("{}{}", SDP_PREFIX, self.token)))
    }

    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription, TransportError> {
        self.ensure_open()?;
        self.ensure_role(NegotiationRole::Answerer)?;
        if offer.kind != SdpKind::Offer {
            return Err(TransportError::Sdp("expected an offer".to_string()));
        }
        let token = offer
            .sdp
            .strip_prefix(SDP_PREFIX)
            .ok_or_else(|| TransportError::Sdp("not a loopback offer".to_string()))?;
        let offerer = self
            .rendezvous
            .offers
            .lock()
            .remove(token)
            .ok_or_else(|| TransportError::Sdp(format!("unknown offer {}", token)))?;

        *offerer.peer.lock() = Some(self.endpoint.events.clone());
        *self.endpoint.peer.lock() = Some(offerer.events.clone());
        self.remote_set.store(true, Ordering::SeqCst);

        self.endpoint.emit(TransportEvent::LocalCandidate(self.local_candidate()));
        Ok(SessionDescription::answer(format!("{}{}", SDP_PREFIX, self.token)))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.ensure_role(NegotiationRole::Offerer)?;
        if answer.kind != SdpKind::Answer || !answer.sdp.starts_with(SDP_PREFIX) {
            return Err(TransportError::Sdp("not a loopback answer".to_string()));
        }
        let peer = self
            .endpoint
            .peer
            .lock()
            .clone()
            .ok_or_else(|| TransportError::InvalidState("answer before the offer was accepted".to_string()))?;
        self.remote_set.store(true, Ordering::SeqCst);

        // Both ends come up together once the offerer has the answer
        self.endpoint.emit(TransportEvent::Connected);
        let _ = peer.send(TransportEvent::Connected);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.ensure_open()?;
        if !self.remote_set.load(Ordering::SeqCst) {
            return Err(TransportError::Ice("remote description not set".to_string()));
        }
        let n = self.remote_candidates.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Loopback {} remote candidate #{}: {}", self.token, n, candidate.candidate);
        Ok(())
    }

    async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        self.ensure_open()?;
        let peer = self.endpoint.peer.lock().clone();
        match peer {
            Some(peer) => peer
                .send(TransportEvent::Frame(frame.clone()))
                .map_err(|_| TransportError::Closed),
            None => Err(TransportError::InvalidState("not connected".to_string())),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.rendezvous.offers.lock().remove(&self.token);
        if let Some(peer) = self.endpoint.peer.lock().take() {
            let _ = peer.send(TransportEvent::Closed);
        }
        debug!("Loopback transport {} closed", self.token);
        Ok(())
    }
}

//! webrtc-rs transport engine
//!
//! The hub side owns a send-only VP8 track; the client side adds a
//! receive-only transceiver and reassembles the remote track into frames.
//! Candidates trickle out as transport events and connection state changes
//! map onto `Connected`, `Failed` and `Closed`.

use super::media_track::{self, VP8_PAYLOAD_TYPE};
use super::{
    IceCandidate, NegotiationRole, SessionDescription, Transport, TransportError, TransportEvent, TransportEvents,
    TransportFactory,
};
use crate::capture::Frame;
use crate::config::WebRTCConfig;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Builds peer connections from the `[webrtc]` config section
pub struct WebRtcTransportFactory {
    api: API,
    ice_servers: Vec<String>,
}

impl WebRtcTransportFactory {
    pub fn new(config: &WebRTCConfig) -> Result<Self, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: media_track::vp8_capability(),
                    payload_type: VP8_PAYLOAD_TYPE,
                    ..Default::default()
                },
                RTPCodecType::Video,
            )
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to register VP8: {}", e)))?;

        // Interceptors for NACK and RTCP reports
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            ice_servers: config.ice_servers.clone(),
        })
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(&self, role: NegotiationRole) -> Result<(Arc<dyn Transport>, TransportEvents), TransportError> {
        let peer_connection = Arc::new(
            self.api
                .new_peer_connection(self.rtc_configuration())
                .await
                .map_err(|e| TransportError::ConnectionFailed(format!("Failed to create peer connection: {}", e)))?,
        );
        let (tx, rx) = mpsc::unbounded_channel();

        let track = match role {
            NegotiationRole::Offerer => {
                let track = media_track::video_track(&uuid::Uuid::new_v4().to_string());
                let sender = peer_connection
                    .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
                    .await
                    .map_err(|e| TransportError::Media(format!("Failed to add video track: {}", e)))?;
                media_track::spawn_rtcp_drain(sender);
                Some(track)
            }
            NegotiationRole::Answerer => {
                peer_connection
                    .add_transceiver_from_kind(
                        RTPCodecType::Video,
                        Some(RTCRtpTransceiverInit {
                            direction: RTCRtpTransceiverDirection::Recvonly,
                            send_encodings: vec![],
                        }),
                    )
                    .await
                    .map_err(|e| TransportError::Media(format!("Failed to add transceiver: {}", e)))?;

                let frames = tx.clone();
                peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
                    let frames = frames.clone();
                    Box::pin(async move {
                        tokio::spawn(media_track::receive_frames(track, frames));
                    })
                }));
                None
            }
        };

        let candidates = tx.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate| {
            let candidates = candidates.clone();
            Box::pin(async move {
                // None marks the end of gathering
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = candidates.send(TransportEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        }));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {}", e),
                }
            })
        }));

        let states = tx;
        peer_connection.on_peer_connection_state_change(Box::new(move |state| {
            let states = states.clone();
            Box::pin(async move {
                debug!("Peer connection state: {}", state);
                let event = match state {
                    RTCPeerConnectionState::Connected => TransportEvent::Connected,
                    RTCPeerConnectionState::Failed => TransportEvent::Failed("ICE connection failed".to_string()),
                    RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Closed => TransportEvent::Closed,
                    _ => return,
                };
                let _ = states.send(event);
            })
        }));

        let transport = WebRtcTransport {
            peer_connection,
            track,
            role,
            remote_set: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };
        Ok((Arc::new(transport), rx))
    }
}

pub struct WebRtcTransport {
    peer_connection: Arc<RTCPeerConnection>,
    track: Option<Arc<TrackLocalStaticSample>>,
    role: NegotiationRole,
    remote_set: AtomicBool,
    closed: AtomicBool,
}

impl WebRtcTransport {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn ensure_role(&self, expected: NegotiationRole, operation: &str) -> Result<(), TransportError> {
        if self.role != expected {
            return Err(TransportError::InvalidState(format!(
                "{} is not valid for the {:?} side",
                operation, self.role
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.ensure_open()?;
        self.ensure_role(NegotiationRole::Offerer, "create_offer")?;
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| TransportError::Sdp(format!("Failed to create offer: {}", e)))?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| TransportError::Sdp(format!("Failed to set local description: {}", e)))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription, TransportError> {
        self.ensure_open()?;
        self.ensure_role(NegotiationRole::Answerer, "accept_offer")?;
        let offer = RTCSessionDescription::offer(offer.sdp)
            .map_err(|e| TransportError::Sdp(format!("Invalid offer: {}", e)))?;
        self.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| TransportError::Sdp(format!("Failed to set remote description: {}", e)))?;
        self.remote_set.store(true, Ordering::Release);

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| TransportError::Sdp(format!("Failed to create answer: {}", e)))?;
        self.peer_connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| TransportError::Sdp(format!("Failed to set local description: {}", e)))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.ensure_role(NegotiationRole::Offerer, "apply_answer")?;
        let answer = RTCSessionDescription::answer(answer.sdp)
            .map_err(|e| TransportError::Sdp(format!("Invalid answer: {}", e)))?;
        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(|e| TransportError::Sdp(format!("Failed to set remote description: {}", e)))?;
        self.remote_set.store(true, Ordering::Release);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.ensure_open()?;
        if !self.remote_set.load(Ordering::Acquire) {
            return Err(TransportError::InvalidState(
                "candidate received before the remote description".to_string(),
            ));
        }
        self.peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await
            .map_err(|e| TransportError::Ice(format!("Failed to add candidate: {}", e)))
    }

    async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        self.ensure_open()?;
        let Some(track) = &self.track else {
            return Err(TransportError::InvalidState("receive-only transport has no track".to_string()));
        };
        media_track::write_frame(track, frame).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Closing peer connection");
        self.peer_connection
            .close()
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to close connection: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offer_and_answer_negotiate_vp8() {
        let factory = WebRtcTransportFactory::new(&WebRTCConfig::default()).unwrap();
        let (hub, _hub_events) = factory.create(NegotiationRole::Offerer).await.unwrap();
        let (client, _client_events) = factory.create(NegotiationRole::Answerer).await.unwrap();

        let offer = hub.create_offer().await.unwrap();
        assert!(offer.sdp.contains("VP8"));
        let answer = client.accept_offer(offer).await.unwrap();
        assert!(answer.sdp.contains("VP8"));
        hub.apply_answer(answer).await.unwrap();

        hub.close().await.unwrap();
        client.close().await.unwrap();
        // Second close is a no-op
        hub.close().await.unwrap();
    }

    #[tokio::test]
    async fn roles_and_ordering_are_enforced() {
        let factory = WebRtcTransportFactory::new(&WebRTCConfig::default()).unwrap();
        let (client, _events) = factory.create(NegotiationRole::Answerer).await.unwrap();

        assert!(matches!(client.create_offer().await, Err(TransportError::InvalidState(_))));
        let early = IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 127.0.0.1 50000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };
        assert!(matches!(
            client.add_remote_candidate(early).await,
            Err(TransportError::InvalidState(_))
        ));

        client.close().await.unwrap();
        assert!(matches!(client.create_offer().await, Err(TransportError::Closed)));
    }
}

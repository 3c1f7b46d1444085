//! VP8 media tracks
//!
//! The hub writes whole encoded frames to a sample track and lets the
//! packetizer split them into RTP. Clients reassemble RTP back into frames
//! and surface each one as a transport event.

use super::{TransportError, TransportEvent};
use crate::capture::frame::VIDEO_CLOCK_RATE;
use crate::capture::Frame;
use log::{debug, info};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use webrtc::api::media_engine::MIME_TYPE_VP8;
use webrtc::media::io::sample_builder::SampleBuilder;
use webrtc::media::Sample;
use webrtc::rtp::codecs::vp8::Vp8Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

/// Payload type the VP8 codec is registered under
pub const VP8_PAYLOAD_TYPE: u8 = 96;

/// Packets a frame may trail behind before it is given up on
const MAX_LATE_PACKETS: u16 = 128;

pub fn vp8_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_VP8.to_string(),
        clock_rate: VIDEO_CLOCK_RATE,
        channels: 0,
        sdp_fmtp_line: String::new(),
        rtcp_feedback: vec![],
    }
}

/// Send-only video track for one session
pub fn video_track(session_tag: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        vp8_capability(),
        format!("video-{}", session_tag),
        "robocast".to_string(),
    ))
}

/// Write one encoded frame as a media sample
pub async fn write_frame(track: &TrackLocalStaticSample, frame: &Frame) -> Result<(), TransportError> {
    let sample = Sample {
        data: frame.data.clone(),
        duration: frame.duration,
        ..Default::default()
    };
    track
        .write_sample(&sample)
        .await
        .map_err(|e| TransportError::Media(format!("Failed to write sample: {}", e)))
}

/// Drain RTCP for a sender so interceptors keep running
pub fn spawn_rtcp_drain(sender: Arc<RTCRtpSender>) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while sender.read(&mut buf).await.is_ok() {}
        debug!("RTCP reader stopped");
    });
}

/// Reassembles RTP packets into numbered frames
pub struct FrameAssembler {
    builder: SampleBuilder<Vp8Packet>,
    sequence: u64,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            builder: SampleBuilder::new(MAX_LATE_PACKETS, Vp8Packet::default(), VIDEO_CLOCK_RATE),
            sequence: 0,
        }
    }

    pub fn push(&mut self, packet: webrtc::rtp::packet::Packet) {
        self.builder.push(packet);
    }

    /// Next complete frame, if any
    pub fn pop(&mut self) -> Option<Frame> {
        let sample = self.builder.pop()?;
        let mut frame = Frame::new(self.sequence, sample.data, sample.packet_timestamp, sample.duration);
        frame.captured_at = Instant::now();
        self.sequence += 1;
        Some(frame)
    }
}

/// Read a remote track until it ends, emitting each reassembled frame
pub async fn receive_frames(track: Arc<TrackRemote>, events: mpsc::UnboundedSender<TransportEvent>) {
    info!("Receiving video track (ssrc {})", track.ssrc());
    let mut assembler = FrameAssembler::new();
    while let Ok((packet, _)) = track.read_rtp().await {
        assembler.push(packet);
        while let Some(frame) = assembler.pop() {
            if events.send(TransportEvent::Frame(frame)).is_err() {
                return;
            }
        }
    }
    debug!("Remote track ended after {} frames", assembler.sequence);
}

//! Media fanout
//!
//! One producer reads the capture chain at a fixed cadence and publishes
//! each frame to every subscriber. Each subscriber owns a bounded queue of
//! `queue_depth` frames; when it falls behind, its oldest frames are dropped
//! and the producer never waits for it.

use crate::capture::{Frame, FrameSource, FrameStats};
use crate::config::FanoutConfig;
use crate::runtime_settings::OverlayState;
use crate::webrtc::Transport;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Per-subscriber latest-wins frame queue
pub type FrameReceiver = broadcast::Receiver<Arc<Frame>>;

pub struct MediaFanout {
    sender: broadcast::Sender<Arc<Frame>>,
    overlay: Arc<OverlayState>,
    frame_interval: Duration,
    stats: Arc<Mutex<FrameStats>>,
}

impl MediaFanout {
    pub fn new(config: &FanoutConfig, overlay: Arc<OverlayState>) -> Self {
        let (sender, _) = broadcast::channel(config.queue_depth.max(1));
        Self {
            sender,
            overlay,
            frame_interval: config.frame_interval(),
            stats: Arc::new(Mutex::new(FrameStats::default())),
        }
    }

    /// New subscriber queue; it sees frames published from now on
    pub fn subscribe(&self) -> FrameReceiver {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn overlay(&self) -> &Arc<OverlayState> {
        &self.overlay
    }

    pub fn stats(&self) -> FrameStats {
        self.stats.lock().clone()
    }

    /// Hand a frame to every subscriber queue; never blocks
    pub fn publish(&self, frame: Frame) -> usize {
        self.sender.send(Arc::new(frame)).unwrap_or(0)
    }

    /// Start the producer on a blocking thread
    ///
    /// The source is owned by the producer until cancellation, which is
    /// observed within one frame interval.
    pub fn spawn_producer(self: &Arc<Self>, mut source: Box<dyn FrameSource>, cancel: CancellationToken) -> JoinHandle<()> {
        let fanout = self.clone();
        tokio::task::spawn_blocking(move || {
            info!(
                "Frame producer started at {:?} per frame from {}",
                fanout.frame_interval,
                source.name()
            );
            fanout.produce(source.as_mut(), &cancel);
            info!("Frame producer stopped, capture source released");
        })
    }

    fn produce(&self, source: &mut dyn FrameSource, cancel: &CancellationToken) {
        let started = Instant::now();
        let mut sequence = 0u64;
        let mut failing = false;

        while !cancel.is_cancelled() {
            let tick = Instant::now();
            let overlay = self.overlay.snapshot();

            match source.capture(&overlay) {
                Ok(data) => {
                    failing = false;
                    let bytes = data.len();
                    let mut frame = Frame::new(
                        sequence,
                        data,
                        Frame::pts_from_elapsed(started.elapsed()),
                        self.frame_interval,
                    );
                    frame.captured_at = tick;
                    frame.overlay = overlay;
                    sequence += 1;
                    self.publish(frame);

                    let elapsed = tick.elapsed();
                    let overrun = elapsed > self.frame_interval;
                    self.stats
                        .lock()
                        .record_capture(bytes, elapsed.as_micros() as u64, overrun);
                    if sequence == 1 || sequence % 900 == 0 {
                        debug!("Produced frame #{} ({} bytes) from {}", sequence, bytes, source.name());
                    }
                }
                Err(e) => {
                    if !failing {
                        error!("Frame production failed: {}", e);
                        failing = true;
                    }
                }
            }

            // No catch-up: an overrun goes straight to the next frame
            if let Some(remaining) = self.frame_interval.checked_sub(tick.elapsed()) {
                std::thread::sleep(remaining);
            }
        }
    }
}

/// Outcome of a forwarding loop
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ForwardStats {
    pub sent: u64,
    pub dropped: u64,
}

/// Drain a subscriber queue into a transport until cancelled or the send path fails
pub async fn forward_frames(
    session_id: &str,
    mut frames: FrameReceiver,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
) -> ForwardStats {
    let mut stats = ForwardStats::default();
    info!("Session {} frame forward loop started", session_id);

    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = frames.recv() => received,
        };
        match received {
            Ok(frame) => {
                if let Err(e) = transport.send_frame(&frame).await {
                    warn!("Session {} frame write error (fwd #{}): {}", session_id, stats.sent, e);
                    break;
                }
                stats.sent += 1;
                if stats.sent == 1 {
                    info!("Session {} sent first frame ({} bytes)", session_id, frame.data.len());
                }
            }
            Err(RecvError::Lagged(n)) => {
                debug!("Session {} frame queue full, dropped {} oldest frames", session_id, n);
                stats.dropped += n;
            }
            Err(RecvError::Closed) => {
                info!("Session {} frame source closed", session_id);
                break;
            }
        }
    }

    debug!(
        "Session {} frame forward loop ended: {} sent, {} dropped",
        session_id, stats.sent, stats.dropped
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureChain, CaptureError, OverlaySnapshot, SyntheticSource};
    use crate::webrtc::signaling::{IceCandidate, SessionDescription};
    use crate::webrtc::{Command, TransportError};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn config(fps: u32, depth: usize) -> FanoutConfig {
        FanoutConfig {
            target_fps: fps,
            queue_depth: depth,
            capture_path: None,
            recorded_path: None,
            synthetic_width: 32,
            synthetic_height: 24,
        }
    }

    fn frame(seq: u64) -> Frame {
        Frame::new(seq, Bytes::from(vec![seq as u8]), 0, Duration::from_millis(33))
    }

    /// Transport whose send takes `delay`
    struct PacedTransport {
        delay: Duration,
        sent: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl Transport for PacedTransport {
        async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
            Err(TransportError::InvalidState("unused".to_string()))
        }
        async fn accept_offer(&self, _offer: SessionDescription) -> Result<SessionDescription, TransportError> {
            Err(TransportError::InvalidState("unused".to_string()))
        }
        async fn apply_answer(&self, _answer: SessionDescription) -> Result<(), TransportError> {
            Ok(())
        }
        async fn add_remote_candidate(&self, _candidate: IceCandidate) -> Result<(), TransportError> {
            Ok(())
        }
        async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.sent.lock().push(frame.sequence);
            Ok(())
        }
        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[test]
    fn slow_subscriber_loses_oldest_frames_only() {
        let fanout = MediaFanout::new(&config(30, 4), Arc::new(OverlayState::new()));
        let mut fast = fanout.subscribe();
        let mut slow = fanout.subscribe();

        for seq in 0..20 {
            assert_eq!(fanout.publish(frame(seq)), 2);
            assert_eq!(fast.try_recv().unwrap().sequence, seq);
        }

        // Slow queue kept the newest 4
        assert!(matches!(slow.try_recv(), Err(broadcast::error::TryRecvError::Lagged(16))));
        let kept: Vec<u64> = std::iter::from_fn(|| slow.try_recv().ok().map(|f| f.sequence)).collect();
        assert_eq!(kept, vec![16, 17, 18, 19]);
    }

    #[tokio::test]
    async fn slow_transport_does_not_delay_fast_transport() {
        let fanout = Arc::new(MediaFanout::new(&config(30, 2), Arc::new(OverlayState::new())));
        let fast = Arc::new(PacedTransport { delay: Duration::ZERO, sent: Mutex::new(Vec::new()) });
        let slow = Arc::new(PacedTransport { delay: Duration::from_millis(200), sent: Mutex::new(Vec::new()) });
        let cancel = CancellationToken::new();

        let fast_task = tokio::spawn(forward_frames("fast", fanout.subscribe(), fast.clone(), cancel.clone()));
        let slow_task = tokio::spawn(forward_frames("slow", fanout.subscribe(), slow.clone(), cancel.clone()));

        for seq in 0..10 {
            fanout.publish(frame(seq));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*fast.sent.lock(), (0..10).collect::<Vec<_>>());
        assert!(slow.sent.lock().len() <= 1);

        cancel.cancel();
        let fast_stats = fast_task.await.unwrap();
        let slow_stats = slow_task.await.unwrap();
        assert_eq!(fast_stats.sent, 10);
        assert_eq!(fast_stats.dropped, 0);
        assert!(slow_stats.sent <= 1);
    }

    struct NeverOpens;

    impl FrameSource for NeverOpens {
        fn name(&self) -> &str {
            "camera"
        }
        fn capture(&mut self, _overlay: &OverlaySnapshot) -> Result<Bytes, CaptureError> {
            Err(CaptureError::Unavailable("camera".to_string(), "no device".to_string()))
        }
    }

    #[tokio::test]
    async fn unavailable_source_falls_back_to_synthetic_at_cadence() {
        let fanout = Arc::new(MediaFanout::new(&config(50, 8), Arc::new(OverlayState::new())));
        let counted = Arc::new(AtomicU64::new(0));
        let mut frames = fanout.subscribe();
        let cancel = CancellationToken::new();

        let chain = CaptureChain::new(vec![Box::new(NeverOpens), Box::new(SyntheticSource::new(32, 24))]);
        let producer = fanout.spawn_producer(Box::new(chain), cancel.clone());

        let counter = counted.clone();
        let reader = tokio::spawn(async move {
            let mut last = None;
            while let Ok(frame) = frames.recv().await {
                assert!(!frame.data.is_empty());
                if let Some(prev) = last {
                    assert!(frame.sequence > prev);
                }
                last = Some(frame.sequence);
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(400)).await;
        cancel.cancel();
        producer.await.unwrap();
        drop(fanout);
        reader.await.unwrap();

        // 20 ms cadence over 400 ms, with generous slack for slow CI
        let n = counted.load(Ordering::SeqCst);
        assert!((5..=25).contains(&n), "produced {} frames", n);
    }

    #[tokio::test]
    async fn pause_flag_rides_on_frames_while_production_continues() {
        let overlay = Arc::new(OverlayState::new());
        let fanout = Arc::new(MediaFanout::new(&config(100, 64), overlay.clone()));
        let mut frames = fanout.subscribe();
        let cancel = CancellationToken::new();
        let producer = fanout.spawn_producer(Box::new(SyntheticSource::new(16, 16)), cancel.clone());

        let first = frames.recv().await.unwrap();
        assert!(first.overlay.playing);

        overlay.apply_command(&Command::pause());
        overlay.apply_command(&Command::text("docking"));

        // Frames keep coming and eventually carry the paused state
        let mut paused_frames = 0;
        while paused_frames < 3 {
            let frame = frames.recv().await.unwrap();
            if !frame.overlay.playing {
                assert_eq!(frame.overlay.text.as_deref(), Some("docking"));
                paused_frames += 1;
            }
        }
        assert!(!overlay.playing());

        cancel.cancel();
        producer.await.unwrap();
        assert!(fanout.stats().total_frames >= 4);
    }
}

//! Hub signaling server
//!
//! Accepts WebSocket channels and drives one offering transport per channel:
//! 1. Accept the channel and create a transport (offerer)
//! 2. Send the offer, wait for the answer, trade candidates
//! 3. Once the transport is up, forward frames from the fanout
//! 4. Relay commands to every other session and update the overlay
//!
//! Each channel runs in its own task and tears itself down exactly once.

use crate::config::HubConfig;
use crate::error::SignalingError;
use crate::fanout::{forward_frames, MediaFanout};
use crate::transport::websocket::{self, ChannelReceiver};
use crate::webrtc::{
    Command, NegotiationRole, Session, SessionEvent, SessionRegistry, SignalingMessage, TransportEvents,
    TransportFactory,
};
use log::{debug, error, info, warn};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Time a new connection gets to complete the WebSocket upgrade
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-channel negotiation phase on the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubPhase {
    Accepted,
    Offering,
    AwaitingAnswer,
    Connected,
    Closed,
}

impl fmt::Display for HubPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Signaling hub
pub struct HubServer {
    config: HubConfig,
    registry: Arc<SessionRegistry>,
    fanout: Arc<MediaFanout>,
    transports: Arc<dyn TransportFactory>,
    /// Channels accepted but not yet registered
    pending: AtomicUsize,
}

impl HubServer {
    pub fn new(config: HubConfig, fanout: Arc<MediaFanout>, transports: Arc<dyn TransportFactory>) -> Self {
        let registry = SessionRegistry::new(config.max_sessions);
        Self {
            config,
            registry,
            fanout,
            transports,
            pending: AtomicUsize::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind(self.config.bind_addr()).await
    }

    /// Accept channels until cancelled, then wait for every session to tear down
    pub async fn run(self: Arc<Self>, listener: TcpListener, cancel: CancellationToken) {
        let tracker = TaskTracker::new();
        match listener.local_addr() {
            Ok(addr) => info!("Signaling server listening on ws://{}", addr),
            Err(e) => warn!("Signaling server listening on unknown address: {}", e),
        }

        loop {
            let accepted = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, addr)) => {
                    if self.registry.len() + self.pending.load(Ordering::Acquire) >= self.registry.max_sessions() {
                        warn!(
                            "Rejecting connection from {}: maximum sessions ({}) reached",
                            addr,
                            self.registry.max_sessions()
                        );
                        drop(stream);
                        continue;
                    }
                    info!("New connection from {}", addr);
                    // Released by the session task once it registers or gives up
                    self.pending.fetch_add(1, Ordering::AcqRel);
                    let hub = self.clone();
                    let session_cancel = cancel.child_token();
                    tracker.spawn(async move {
                        hub.handle_channel(stream, addr, session_cancel).await;
                    });
                }
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }

        tracker.close();
        info!("Signaling server stopping, waiting for {} session task(s)", tracker.len());
        tracker.wait().await;
        self.registry.close_all("shutdown").await;
        info!("Signaling server stopped");
    }

    async fn handle_channel(self: Arc<Self>, stream: TcpStream, addr: SocketAddr, cancel: CancellationToken) {
        let pending = PendingSlot(&self.pending);

        let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, websocket::accept(stream, self.config.keepalive));
        let (channel, inbound) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Handshake with {} abandoned on shutdown", addr);
                return;
            }
            accepted = handshake => match accepted {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    warn!("WebSocket handshake with {} failed: {}", addr, e);
                    return;
                }
                Err(_) => {
                    warn!("WebSocket handshake with {} timed out after {:?}", addr, HANDSHAKE_TIMEOUT);
                    return;
                }
            },
        };

        let created = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                channel.close();
                return;
            }
            created = self.transports.create(NegotiationRole::Offerer) => created,
        };
        let (transport, events) = match created {
            Ok(created) => created,
            Err(e) => {
                error!("Failed to create transport for {}: {}", addr, e);
                channel.close();
                return;
            }
        };

        let session = Arc::new(Session::new(channel, transport, NegotiationRole::Offerer));
        let handle = match self.registry.register(session.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Refusing session for {}: {}", addr, e);
                session.close("not registered").await;
                return;
            }
        };
        drop(pending);
        info!("Client {} joined as session {}", addr, session.id());

        let reason = self.drive_session(&session, inbound, events, &cancel).await;

        session.close(&reason).await;
        handle.unregister();
        info!("Client {} disconnected ({})", addr, reason);
    }

    /// Run one session to completion and return the teardown reason
    async fn drive_session(
        &self,
        session: &Arc<Session>,
        mut inbound: ChannelReceiver,
        mut events: TransportEvents,
        cancel: &CancellationToken,
    ) -> String {
        let mut phase = HubPhase::Accepted;
        let mut forwarder: Option<(CancellationToken, JoinHandle<()>)> = None;

        advance(session, &mut phase, HubPhase::Offering);
        if let Err(e) = session.start_offer().await {
            error!("Session {}: {}", session.id(), e);
            return e.to_string();
        }
        advance(session, &mut phase, HubPhase::AwaitingAnswer);

        let reason = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break "shutdown".to_string(),
                message = inbound.recv() => match message {
                    Ok(message) => {
                        debug!("Session {} received {}", session.id(), message.label());
                        match session.handle_signal(message).await {
                            Ok(SessionEvent::Command(command)) => self.relay_command(session, command),
                            Ok(_) => {}
                            Err(e) => {
                                error!("Session {}: {}", session.id(), e);
                                break e.to_string();
                            }
                        }
                    }
                    Err(SignalingError::Malformed(e)) => {
                        warn!("Session {}: discarding malformed message: {}", session.id(), e);
                    }
                    Err(e) => break e.to_string(),
                },
                event = events.recv() => {
                    let Some(event) = event else {
                        break "transport event stream ended".to_string();
                    };
                    match session.handle_transport_event(event) {
                        Ok(SessionEvent::Connected) => {
                            advance(session, &mut phase, HubPhase::Connected);
                            forwarder = Some(self.start_forwarding(session));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("Session {} transport failed: {}", session.id(), e);
                            break e.to_string();
                        }
                    }
                }
            }
        };

        if let Some((forward_cancel, task)) = forwarder {
            forward_cancel.cancel();
            let _ = task.await;
        }
        advance(session, &mut phase, HubPhase::Closed);
        reason
    }

    fn start_forwarding(&self, session: &Arc<Session>) -> (CancellationToken, JoinHandle<()>) {
        let cancel = CancellationToken::new();
        let frames = self.fanout.subscribe();
        let transport = session.transport().clone();
        let session_id = session.id().to_string();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            forward_frames(&session_id, frames, transport, token).await;
        });
        (cancel, task)
    }

    fn relay_command(&self, session: &Session, command: Command) {
        info!("Command from {}: {}", session.peer(), command);
        self.fanout.overlay().apply_command(&command);
        let report = self
            .registry
            .broadcast(session.id(), &SignalingMessage::Command(command));
        debug!(
            "Relayed command from session {}: {} delivered, {} failed",
            session.id(),
            report.delivered,
            report.failed
        );
    }
}

/// Releases a pending slot taken at accept once the channel registers or gives up
struct PendingSlot<'a>(&'a AtomicUsize);

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn advance(session: &Session, phase: &mut HubPhase, next: HubPhase) {
    debug!("Session {} phase {} -> {}", session.id(), phase, next);
    *phase = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Frame;
    use crate::config::{FanoutConfig, KeepaliveConfig};
    use crate::runtime_settings::OverlayState;
    use crate::transport::websocket::ChannelSender;
    use crate::webrtc::loopback::LoopbackTransportFactory;
    use crate::webrtc::{Transport, TransportError, TransportEvent};
    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    /// Loopback transports whose hub-side event streams tests can inject into
    #[derive(Clone, Default)]
    struct InjectingFactory {
        inner: LoopbackTransportFactory,
        injectors: Arc<parking_lot::Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>>,
    }

    #[async_trait]
    impl TransportFactory for InjectingFactory {
        async fn create(&self, role: NegotiationRole) -> Result<(Arc<dyn Transport>, TransportEvents), TransportError> {
            let (transport, mut inner_events) = self.inner.create(role).await?;
            if role == NegotiationRole::Answerer {
                return Ok((transport, inner_events));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            self.injectors.lock().push(tx.clone());
            tokio::spawn(async move {
                while let Some(event) = inner_events.recv().await {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            });
            Ok((transport, rx))
        }
    }

    struct TestHub {
        hub: Arc<HubServer>,
        fanout: Arc<MediaFanout>,
        addr: SocketAddr,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    }

    async fn start_hub(factory: &LoopbackTransportFactory, max_sessions: usize) -> TestHub {
        start_hub_with(Arc::new(factory.clone()), max_sessions).await
    }

    async fn start_hub_with(transports: Arc<dyn TransportFactory>, max_sessions: usize) -> TestHub {
        let fanout = Arc::new(MediaFanout::new(&FanoutConfig::default(), Arc::new(OverlayState::new())));
        let config = HubConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_sessions,
            keepalive: KeepaliveConfig::default(),
        };
        let hub = Arc::new(HubServer::new(config, fanout.clone(), transports));
        let listener = hub.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(hub.clone().run(listener, cancel.clone()));
        TestHub { hub, fanout, addr, cancel, task }
    }

    struct TestClient {
        channel: ChannelSender,
        inbound: ChannelReceiver,
        session: Session,
        events: TransportEvents,
    }

    impl TestClient {
        /// Dial and negotiate until the transport reports Connected
        async fn connect(addr: SocketAddr, factory: &LoopbackTransportFactory) -> TestClient {
            let (channel, mut inbound) = websocket::connect(&format!("ws://{}", addr), KeepaliveConfig::default())
                .await
                .unwrap();
            let (transport, mut events) = factory.create(NegotiationRole::Answerer).await.unwrap();
            let session = Session::new(channel.clone(), transport, NegotiationRole::Answerer);

            timeout(Duration::from_secs(5), async {
                loop {
                    tokio::select! {
                        message = inbound.recv() => {
                            session.handle_signal(message.unwrap()).await.unwrap();
                        }
                        event = events.recv() => {
                            if let SessionEvent::Connected = session.handle_transport_event(event.unwrap()).unwrap() {
                                break;
                            }
                        }
                    }
                }
            })
            .await
            .unwrap();

            TestClient { channel, inbound, session, events }
        }

        async fn next_command(&mut self) -> Command {
            loop {
                let message = timeout(Duration::from_secs(5), self.inbound.recv()).await.unwrap().unwrap();
                if let SignalingMessage::Command(command) = message {
                    return command;
                }
            }
        }
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn client_negotiates_and_receives_frames() {
        let factory = LoopbackTransportFactory::new();
        let hub = start_hub(&factory, 10).await;
        let mut client = TestClient::connect(hub.addr, &factory).await;
        assert_eq!(hub.hub.registry().len(), 1);

        let fanout = hub.fanout.clone();
        wait_for(|| fanout.subscriber_count() == 1).await;
        hub.fanout
            .publish(Frame::new(1, Bytes::from_static(b"key"), 0, Duration::from_millis(33)));

        let frame = timeout(Duration::from_secs(5), async {
            loop {
                if let Some(TransportEvent::Frame(frame)) = client.events.recv().await {
                    return frame;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(&frame.data[..], b"key");

        hub.cancel.cancel();
        hub.task.await.unwrap();
        assert!(hub.hub.registry().is_empty());
    }

    #[tokio::test]
    async fn commands_reach_other_sessions_and_update_overlay() {
        let factory = LoopbackTransportFactory::new();
        let hub = start_hub(&factory, 10).await;
        let mut a = TestClient::connect(hub.addr, &factory).await;
        let mut b = TestClient::connect(hub.addr, &factory).await;
        let mut c = TestClient::connect(hub.addr, &factory).await;

        a.channel
            .send(&SignalingMessage::Command(Command::text("hello")))
            .unwrap();
        a.channel.send(&SignalingMessage::Command(Command::pause())).unwrap();

        assert_eq!(b.next_command().await, Command::text("hello"));
        assert_eq!(b.next_command().await, Command::pause());
        assert_eq!(c.next_command().await, Command::text("hello"));
        assert_eq!(c.next_command().await, Command::pause());

        let overlay = hub.fanout.overlay().clone();
        wait_for(|| !overlay.playing()).await;
        assert_eq!(overlay.text().as_deref(), Some("hello"));

        // Nothing echoes back to the sender
        assert!(timeout(Duration::from_millis(200), a.next_command()).await.is_err());

        hub.cancel.cancel();
        hub.task.await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_unregisters_session() {
        let factory = LoopbackTransportFactory::new();
        let hub = start_hub(&factory, 10).await;
        let client = TestClient::connect(hub.addr, &factory).await;
        assert_eq!(hub.hub.registry().len(), 1);

        client.channel.close();
        client.session.close("test").await;
        drop(client);

        let registry = hub.hub.registry().clone();
        wait_for(|| registry.is_empty()).await;
        assert_eq!(registry.removed_count(), 1);

        hub.cancel.cancel();
        hub.task.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_messages_do_not_end_the_session() {
        let factory = LoopbackTransportFactory::new();
        let hub = start_hub(&factory, 10).await;
        let a = TestClient::connect(hub.addr, &factory).await;
        let mut b = TestClient::connect(hub.addr, &factory).await;

        a.channel.send_text("{not json");
        a.channel.send_text(r#"{"type": "bogus"}"#);
        a.channel.send_text(r#"{"command": "dance"}"#);
        a.channel
            .send(&SignalingMessage::Command(Command::play()))
            .unwrap();
        assert_eq!(b.next_command().await, Command::play());
        assert_eq!(hub.hub.registry().len(), 2);

        hub.cancel.cancel();
        hub.task.await.unwrap();
    }

    #[tokio::test]
    async fn session_limit_rejects_extra_clients() {
        let factory = LoopbackTransportFactory::new();
        let hub = start_hub(&factory, 1).await;
        let _first = TestClient::connect(hub.addr, &factory).await;

        let second = websocket::connect(&format!("ws://{}", hub.addr), KeepaliveConfig::default()).await;
        match second {
            Err(_) => {}
            Ok((_tx, mut rx)) => {
                let result = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
                assert!(matches!(result, Err(SignalingError::ChannelClosed(_))));
            }
        }
        assert_eq!(hub.hub.registry().len(), 1);

        hub.cancel.cancel();
        hub.task.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_does_not_wait_on_stalled_handshake() {
        let factory = LoopbackTransportFactory::new();
        let hub = start_hub(&factory, 1).await;

        // Connects but never sends the upgrade request
        let _stalled = TcpStream::connect(hub.addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The half-open connection holds the only slot
        let second = websocket::connect(&format!("ws://{}", hub.addr), KeepaliveConfig::default()).await;
        if let Ok((_tx, mut rx)) = second {
            let result = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
            assert!(matches!(result, Err(SignalingError::ChannelClosed(_))));
        }
        assert!(hub.hub.registry().is_empty());

        hub.cancel.cancel();
        assert!(timeout(Duration::from_secs(3), hub.task).await.is_ok());
    }

    #[tokio::test]
    async fn transport_failure_unregisters_only_that_session() {
        let factory = InjectingFactory::default();
        let hub = start_hub_with(Arc::new(factory.clone()), 10).await;
        let mut a = TestClient::connect(hub.addr, &factory.inner).await;
        let mut b = TestClient::connect(hub.addr, &factory.inner).await;

        let fanout = hub.fanout.clone();
        wait_for(|| fanout.subscriber_count() == 2).await;

        // Fail a's transport while its channel stays open
        let injector = factory.injectors.lock()[0].clone();
        injector
            .send(TransportEvent::Failed("ICE connection failed".to_string()))
            .unwrap();

        let registry = hub.hub.registry().clone();
        wait_for(|| registry.len() == 1).await;
        assert_eq!(registry.removed_count(), 1);

        // The hub closes a's channel
        let closed = timeout(Duration::from_secs(5), async {
            loop {
                match a.inbound.recv().await {
                    Ok(_) | Err(SignalingError::Malformed(_)) => continue,
                    Err(e) => return e,
                }
            }
        })
        .await
        .unwrap();
        assert!(matches!(closed, SignalingError::ChannelClosed(_)));

        // b keeps receiving video
        wait_for(|| fanout.subscriber_count() == 1).await;
        hub.fanout
            .publish(Frame::new(7, Bytes::from_static(b"still here"), 0, Duration::from_millis(33)));
        let frame = timeout(Duration::from_secs(5), async {
            loop {
                if let Some(TransportEvent::Frame(frame)) = b.events.recv().await {
                    return frame;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(frame.sequence, 7);

        // A late second failure signal changes nothing
        let _ = injector.send(TransportEvent::Closed);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.removed_count(), 1);
        assert_eq!(registry.len(), 1);

        hub.cancel.cancel();
        hub.task.await.unwrap();
        assert_eq!(registry.removed_count(), 2);
    }
}

//! WebSocket signaling channel
//!
//! Wraps one WebSocket connection as a message-oriented duplex. Outbound
//! messages go through a cloneable [`ChannelSender`] feeding a writer task;
//! a reader task delivers text frames in receipt order and runs the
//! keepalive ping.

use crate::config::KeepaliveConfig;
use crate::error::SignalingError;
use crate::webrtc::SignalingMessage;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    fn next() -> Self {
        ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Cloneable outbound half of a channel
#[derive(Debug, Clone)]
pub struct ChannelSender {
    id: ChannelId,
    peer: String,
    tx: mpsc::UnboundedSender<Message>,
}

impl ChannelSender {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Queue a signaling message; fails once the writer is gone
    pub fn send(&self, message: &SignalingMessage) -> Result<(), SignalingError> {
        self.tx
            .send(Message::Text(message.to_json()))
            .map_err(|_| SignalingError::SendFailed(format!("{} ({}) is closed", self.id, self.peer)))
    }

    /// Send a close frame; the writer stops after it
    pub fn close(&self) {
        let _ = self.tx.send(Message::Close(None));
    }

    #[cfg(test)]
    pub(crate) fn send_text(&self, text: &str) {
        let _ = self.tx.send(Message::Text(text.to_string()));
    }
}

enum Inbound {
    Text(String),
    Closed(String),
}

/// Inbound half of a channel; dropping it stops the reader task
pub struct ChannelReceiver {
    id: ChannelId,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    close_reason: Option<String>,
    reader: JoinHandle<()>,
}

impl ChannelReceiver {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Next message in receipt order
    ///
    /// `Malformed` is per-message and the channel stays usable; `ChannelClosed`
    /// is terminal. Cancel-safe.
    pub async fn recv(&mut self) -> Result<SignalingMessage, SignalingError> {
        match self.inbound.recv().await {
            Some(Inbound::Text(text)) => SignalingMessage::from_json(&text),
            Some(Inbound::Closed(reason)) => {
                self.close_reason = Some(reason.clone());
                Err(SignalingError::ChannelClosed(reason))
            }
            None => Err(SignalingError::ChannelClosed(
                self.close_reason.clone().unwrap_or_else(|| "channel ended".to_string()),
            )),
        }
    }
}

impl Drop for ChannelReceiver {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Accept a signaling channel on an incoming TCP connection
pub async fn accept(stream: TcpStream, keepalive: KeepaliveConfig) -> Result<(ChannelSender, ChannelReceiver), SignalingError> {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    debug!("WebSocket handshake completed for {}", peer);
    Ok(spawn_channel(ws_stream, peer, keepalive))
}

/// Dial a hub
pub async fn connect(uri: &str, keepalive: KeepaliveConfig) -> Result<(ChannelSender, ChannelReceiver), SignalingError> {
    let (ws_stream, _response) = tokio_tungstenite::connect_async(uri).await?;
    debug!("Connected to signaling server {}", uri);
    Ok(spawn_channel(ws_stream, uri.to_string(), keepalive))
}

/// Start the writer and reader tasks for an established WebSocket
pub fn spawn_channel<S>(ws_stream: WebSocketStream<S>, peer: String, keepalive: KeepaliveConfig) -> (ChannelSender, ChannelReceiver)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let id = ChannelId::next();
    let (write, read) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Inbound>();

    tokio::spawn(async move {
        let mut write = write;
        while let Some(msg) = outbound_rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if write.send(msg).await.is_err() || closing {
                break;
            }
        }
        let _ = write.close().await;
    });

    let reader_outbound = outbound_tx.clone();
    let reader_peer = peer.clone();
    let reader = tokio::spawn(async move {
        let reason = read_loop(read, reader_outbound, &inbound_tx, keepalive).await;
        debug!("Channel {} ({}) ended: {}", id, reader_peer, reason);
        let _ = inbound_tx.send(Inbound::Closed(reason));
    });

    (
        ChannelSender { id, peer, tx: outbound_tx },
        ChannelReceiver {
            id,
            inbound: inbound_rx,
            close_reason: None,
            reader,
        },
    )
}

async fn read_loop<S>(
    mut read: SplitStream<WebSocketStream<S>>,
    outbound: mpsc::UnboundedSender<Message>,
    inbound: &mpsc::UnboundedSender<Inbound>,
    keepalive: KeepaliveConfig,
) -> String
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ping_timer = keepalive
        .interval()
        .map(|period| time::interval_at(Instant::now() + period, period));
    let mut pong_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if inbound.send(Inbound::Text(text)).is_err() {
                        return "receiver dropped".to_string();
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!("Ignoring binary message: {} bytes", data.len());
                }
                Some(Ok(Message::Ping(ping))) => {
                    let _ = outbound.send(Message::Pong(ping));
                }
                Some(Ok(Message::Pong(_))) => pong_deadline = None,
                Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(frame) => format!("closed by peer ({})", frame.code),
                        None => "closed by peer".to_string(),
                    };
                }
                Some(Err(e)) => return format!("websocket error: {}", e),
                None => return "stream ended".to_string(),
            },
            _ = next_tick(&mut ping_timer) => {
                if outbound.send(Message::Ping(Vec::new())).is_err() {
                    return "writer stopped".to_string();
                }
                if pong_deadline.is_none() {
                    pong_deadline = Some(Instant::now() + keepalive.timeout());
                }
            }
            _ = wait_until(pong_deadline) => {
                warn!("No pong within {:?}, dropping channel", keepalive.timeout());
                let _ = outbound.send(Message::Close(None));
                return "keepalive timeout".to_string();
            }
        }
    }
}

/// Sender wired to a bare queue instead of a socket
#[cfg(test)]
pub(crate) fn test_sender(peer: &str) -> (ChannelSender, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ChannelSender {
            id: ChannelId::next(),
            peer: peer.to_string(),
            tx,
        },
        rx,
    )
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::Command;
    use tokio::net::TcpListener;

    async fn pair(keepalive: KeepaliveConfig) -> ((ChannelSender, ChannelReceiver), (ChannelSender, ChannelReceiver)) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            accept(stream, keepalive).await.unwrap()
        });
        let client = connect(&format!("ws://{}", addr), keepalive).await.unwrap();
        (server.await.unwrap(), client)
    }

    #[tokio::test]
    async fn messages_arrive_in_order() {
        let ((server_tx, _server_rx), (_client_tx, mut client_rx)) = pair(KeepaliveConfig::default()).await;

        for i in 0..5 {
            server_tx
                .send(&SignalingMessage::Command(Command::text(format!("m{}", i))))
                .unwrap();
        }
        for i in 0..5 {
            let msg = client_rx.recv().await.unwrap();
            assert_eq!(msg, SignalingMessage::Command(Command::text(format!("m{}", i))));
        }
    }

    #[tokio::test]
    async fn malformed_payload_keeps_channel_open() {
        let ((server_tx, _server_rx), (_client_tx, mut client_rx)) = pair(KeepaliveConfig::default()).await;

        server_tx.send_text("{not json");
        server_tx.send(&SignalingMessage::Command(Command::pause())).unwrap();

        assert!(matches!(client_rx.recv().await, Err(SignalingError::Malformed(_))));
        assert_eq!(
            client_rx.recv().await.unwrap(),
            SignalingMessage::Command(Command::pause())
        );
    }

    #[tokio::test]
    async fn close_is_observed_by_peer() {
        let ((server_tx, _server_rx), (_client_tx, mut client_rx)) = pair(KeepaliveConfig::default()).await;

        server_tx.close();
        assert!(matches!(client_rx.recv().await, Err(SignalingError::ChannelClosed(_))));
        // Terminal: keeps reporting closed
        assert!(matches!(client_rx.recv().await, Err(SignalingError::ChannelClosed(_))));
    }

    #[tokio::test]
    async fn channel_ids_are_unique() {
        let ((server_tx, server_rx), (client_tx, _client_rx)) = pair(KeepaliveConfig::default()).await;
        assert_ne!(server_tx.id(), client_tx.id());
        assert_eq!(server_tx.id(), server_rx.id());
    }
}

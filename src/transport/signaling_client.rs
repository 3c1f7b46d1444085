//! Client signaling endpoint
//!
//! Keeps exactly one session with the hub alive. The client is the answerer:
//! it dials, waits for the hub's offer, answers, then hands received frames
//! and commands to its sinks while sending local commands. Lost sessions are
//! retried under the configured reconnect policy in an explicit loop.

use crate::config::ClientConfig;
use crate::error::SignalingError;
use crate::input::LocalInput;
use crate::sink::{CommandSink, FrameSink};
use crate::transport::backoff::{Backoff, ReconnectPolicy};
use crate::transport::websocket;
use crate::webrtc::{NegotiationRole, Session, SessionEvent, SignalingMessage, TransportFactory};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How one session attempt ended
#[derive(Debug, PartialEq, Eq)]
enum SessionExit {
    /// Local exit or process shutdown
    Shutdown,
    /// Channel or transport lost; retry
    Lost(String),
}

pub struct ClientEndpoint {
    name: String,
    config: ClientConfig,
    backoff: Backoff,
    transports: Arc<dyn TransportFactory>,
    frames: Box<dyn FrameSink>,
    commands: Box<dyn CommandSink>,
    input_closed: bool,
}

impl ClientEndpoint {
    pub fn new(
        name: impl Into<String>,
        config: ClientConfig,
        policy: ReconnectPolicy,
        transports: Arc<dyn TransportFactory>,
        frames: Box<dyn FrameSink>,
        commands: Box<dyn CommandSink>,
    ) -> Self {
        let name = name.into();
        if let Err(e) = policy.validate() {
            warn!("{}: questionable reconnect policy: {}", name, e);
        }
        Self {
            name,
            config,
            backoff: Backoff::new(policy),
            transports,
            frames,
            commands,
            input_closed: false,
        }
    }

    /// Run until local exit, cancellation, or an exhausted retry budget
    pub async fn run(
        mut self,
        mut input: mpsc::UnboundedReceiver<LocalInput>,
        cancel: CancellationToken,
    ) -> Result<(), SignalingError> {
        loop {
            match self.run_session(&mut input, &cancel).await {
                Ok(SessionExit::Shutdown) => {
                    info!("{} exiting", self.name);
                    return Ok(());
                }
                Ok(SessionExit::Lost(reason)) => warn!("Disconnected from {}: {}", self.config.uri, reason),
                Err(e) if e.is_transient() => warn!("Connection to {} failed: {}", self.config.uri, e),
                Err(e) => {
                    error!("{} stopped: {}", self.name, e);
                    return Err(e);
                }
            }

            let Some(delay) = self.backoff.next_delay() else {
                let attempts = self.backoff.attempts();
                error!("Giving up on {} after {} reconnect attempts", self.config.uri, attempts);
                return Err(SignalingError::ReconnectExhausted { attempts });
            };
            info!(
                "Reconnecting to {} in {:.1}s (attempt {})",
                self.config.uri,
                delay.as_secs_f64(),
                self.backoff.attempts()
            );

            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    _ = &mut sleep => break,
                    local = input.recv(), if !self.input_closed => match local {
                        Some(LocalInput::Exit) => {
                            info!("{} exiting", self.name);
                            return Ok(());
                        }
                        Some(LocalInput::Command(command)) => {
                            warn!("Not connected, dropping command {}", command);
                        }
                        None => self.input_closed = true,
                    },
                }
            }
        }
    }

    async fn run_session(
        &mut self,
        input: &mut mpsc::UnboundedReceiver<LocalInput>,
        cancel: &CancellationToken,
    ) -> Result<SessionExit, SignalingError> {
        let (channel, mut inbound) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(SessionExit::Shutdown),
            connected = websocket::connect(&self.config.uri, self.config.keepalive) => connected?,
        };
        info!("Connected to signaling server {}", self.config.uri);

        let (transport, mut events) = match self.transports.create(NegotiationRole::Answerer).await {
            Ok(created) => created,
            Err(e) => {
                channel.close();
                return Err(e.into());
            }
        };
        let session = Session::new(channel, transport, NegotiationRole::Answerer);
        let mut media_started = false;

        let exit = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break SessionExit::Shutdown,
                local = input.recv(), if !self.input_closed => match local {
                    Some(LocalInput::Exit) => break SessionExit::Shutdown,
                    Some(LocalInput::Command(command)) => {
                        let text = command.to_string();
                        if let Err(e) = session.send(&SignalingMessage::Command(command)) {
                            break SessionExit::Lost(e.to_string());
                        }
                        info!("Sent command: {}", text);
                    }
                    None => {
                        debug!("Local input closed");
                        self.input_closed = true;
                    }
                },
                message = inbound.recv() => match message {
                    Ok(message) => match session.handle_signal(message).await {
                        Ok(SessionEvent::Command(command)) => {
                            if let Err(e) = self.commands.on_command(&command) {
                                warn!("Command sink failed: {}", e);
                            }
                        }
                        Ok(_) => {}
                        Err(e) => break SessionExit::Lost(e.to_string()),
                    },
                    Err(SignalingError::Malformed(e)) => warn!("Discarding malformed message: {}", e),
                    Err(e) => break SessionExit::Lost(e.to_string()),
                },
                event = events.recv() => {
                    let Some(event) = event else {
                        break SessionExit::Lost("transport event stream ended".to_string());
                    };
                    match session.handle_transport_event(event) {
                        Ok(SessionEvent::Connected) => {
                            info!("Media session established with {}", self.config.uri);
                            self.backoff.reset();
                            media_started = true;
                        }
                        Ok(SessionEvent::Frame(frame)) => {
                            if let Err(e) = self.frames.on_frame(&frame) {
                                warn!("Frame sink failed: {}", e);
                            }
                        }
                        Ok(_) => {}
                        Err(e) => break SessionExit::Lost(e.to_string()),
                    }
                }
            }
        };

        let reason = match &exit {
            SessionExit::Shutdown => "shutdown",
            SessionExit::Lost(reason) => reason.as_str(),
        };
        session.close(reason).await;
        if media_started {
            if let Err(e) = self.frames.on_session_end() {
                warn!("Frame sink failed to finish: {}", e);
            }
        }
        Ok(exit)
    }
}

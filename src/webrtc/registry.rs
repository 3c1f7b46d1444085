//! Session registry
//!
//! The hub's table of live sessions. It is the only place the session set is
//! mutated. Sends never run while the registry lock is held: callers get a
//! snapshot and iterate it after the lock is released.

use super::session::Session;
use super::signaling::SignalingMessage;
use crate::error::SignalingError;
use crate::transport::websocket::ChannelId;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

struct Entry {
    seq: u64,
    session: Arc<Session>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Entry>,
    channels: HashMap<ChannelId, String>,
    next_seq: u64,
}

/// Outcome of a broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Registry of active sessions
pub struct SessionRegistry {
    inner: Mutex<Inner>,
    max_sessions: usize,
    removed: AtomicU64,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            max_sessions,
            removed: AtomicU64::new(0),
        })
    }

    /// Insert a session; the returned handle unregisters it on drop
    pub fn register(self: &Arc<Self>, session: Arc<Session>) -> Result<SessionHandle, SignalingError> {
        let id = session.id().to_string();
        let channel = session.channel_id();
        {
            let mut inner = self.inner.lock();
            if inner.sessions.contains_key(&id) {
                return Err(SignalingError::DuplicateSession(format!("session {} already registered", id)));
            }
            if let Some(existing) = inner.channels.get(&channel) {
                return Err(SignalingError::DuplicateSession(format!(
                    "channel {} already bound to session {}",
                    channel, existing
                )));
            }
            if inner.sessions.len() >= self.max_sessions {
                return Err(SignalingError::SessionLimit(self.max_sessions));
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.channels.insert(channel, id.clone());
            inner.sessions.insert(id.clone(), Entry { seq, session });
        }
        debug!("Registered session {} on {}", id, channel);
        Ok(SessionHandle {
            registry: Arc::downgrade(self),
            id,
        })
    }

    /// Remove a session; returns false if it was not registered
    pub fn unregister(&self, id: &str) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            let entry = inner.sessions.remove(id);
            if let Some(ref entry) = entry {
                inner.channels.remove(&entry.session.channel_id());
            }
            entry
        };
        match removed {
            Some(entry) => {
                self.removed.fetch_add(1, Ordering::Relaxed);
                info!("Session {} unregistered ({} remaining)", id, self.len());
                drop(entry);
                true
            }
            None => false,
        }
    }

    /// Session ids ordered by registration
    pub fn snapshot(&self) -> Vec<String> {
        self.sessions().iter().map(|s| s.id().to_string()).collect()
    }

    /// Sessions ordered by registration
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        let mut entries: Vec<(u64, Arc<Session>)> = {
            let inner = self.inner.lock();
            inner
                .sessions
                .values()
                .map(|e| (e.seq, e.session.clone()))
                .collect()
        };
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, s)| s).collect()
    }

    /// Deliver `message` to every registered session except `sender_id`
    pub fn broadcast(&self, sender_id: &str, message: &SignalingMessage) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for session in self.sessions() {
            if session.id() == sender_id {
                continue;
            }
            match session.send(message) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Broadcast to session {} failed: {}", session.id(), e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_capacity(&self) -> bool {
        self.len() < self.max_sessions
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Total unregistrations since start
    pub fn removed_count(&self) -> u64 {
        self.removed.load(Ordering::Relaxed)
    }

    /// Close and unregister every session
    pub async fn close_all(&self, reason: &str) {
        for session in self.sessions() {
            session.close(reason).await;
            self.unregister(session.id());
        }
    }
}

/// Registration guard
///
/// Dropping it unregisters the session if teardown has not done so already.
#[derive(Debug)]
pub struct SessionHandle {
    registry: Weak<SessionRegistry>,
    id: String,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn unregister(&self) -> bool {
        self.registry
            .upgrade()
            .map(|registry| registry.unregister(&self.id))
            .unwrap_or(false)
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.unregister();
    }
}

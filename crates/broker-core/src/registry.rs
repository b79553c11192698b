//! Session registry: the shared map of live NETCONF sessions keyed by their
//! front-end handle, and the per-record state the dispatcher works on.
//!
//! Lock order is map before record, never the reverse; every lookup clones
//! the `Arc` and drops the map guard before the record lock is touched, so
//! the map is never held across NETCONF I/O.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use netconf_core::{Hello, NetconfSession, Notification};
use sha1::{Digest, Sha1};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{BrokerError, BrokerResult};

/// Pending notifications kept per session.
pub const NOTIFICATION_QUEUE_SIZE: usize = 10;

/// Derive the printable handle for a session from its endpoint and the
/// device-assigned session id.
pub fn session_key(host: &str, port: &str, session_id: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(host.as_bytes());
    hasher.update(port.as_bytes());
    hasher.update(session_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Mutable half of a session record, guarded by the record lock.
pub struct SessionState<S> {
    session: Option<S>,
    hello: Hello,
    last_activity: Instant,
    subscribed: bool,
    notifications: VecDeque<Notification>,
}

impl<S: NetconfSession> SessionState<S> {
    /// The live session, or `None` once the record was torn down.
    pub fn session_mut(&mut self) -> Option<&mut S> {
        self.session.as_mut()
    }

    pub fn hello(&self) -> &Hello {
        &self.hello
    }

    pub fn set_hello(&mut self, hello: Hello) {
        self.hello = hello;
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Record activity on the session.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn set_subscribed(&mut self, subscribed: bool) {
        self.subscribed = subscribed;
    }

    /// Queue a pushed notification, evicting the oldest past capacity.
    pub fn push_notification(&mut self, notification: Notification) {
        if self.notifications.len() >= NOTIFICATION_QUEUE_SIZE {
            self.notifications.pop_front();
        }
        self.notifications.push_back(notification);
    }

    /// Hand out everything queued so far.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }
}

/// One NETCONF session together with its exclusive-use lock.
pub struct SessionRecord<S> {
    key: String,
    closed: AtomicBool,
    state: Mutex<SessionState<S>>,
}

impl<S: NetconfSession> SessionRecord<S> {
    pub fn new(key: String, session: S, hello: Hello) -> Self {
        Self {
            key,
            closed: AtomicBool::new(false),
            state: Mutex::new(SessionState {
                session: Some(session),
                hello,
                last_activity: Instant::now(),
                subscribed: false,
                notifications: VecDeque::with_capacity(NOTIFICATION_QUEUE_SIZE),
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Terminal flag; a closed record must not be used again.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Exclusive access to the session and its mutable state.
    pub async fn lock(&self) -> MutexGuard<'_, SessionState<S>> {
        self.state.lock().await
    }

    /// Tear the record down: mark it terminal and release the NETCONF
    /// session. Safe to call more than once.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        state.subscribed = false;
        state.notifications.clear();
        if let Some(mut session) = state.session.take() {
            session.close().await;
            debug!(session = %self.key, "netconf session released");
        }
    }
}

/// Concurrent map of session key → record.
pub struct SessionRegistry<S> {
    sessions: Arc<RwLock<HashMap<String, Arc<SessionRecord<S>>>>>,
}

impl<S> Clone for SessionRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            sessions: self.sessions.clone(),
        }
    }
}

impl<S: NetconfSession> SessionRegistry<S> {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a freshly connected session. Key collisions mean the hash
    /// input triple was reused and are refused.
    pub async fn insert(&self, record: Arc<SessionRecord<S>>) -> BrokerResult<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(record.key()) {
            return Err(BrokerError::DuplicateSessionKey(record.key().to_string()));
        }
        sessions.insert(record.key().to_string(), record);
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Option<Arc<SessionRecord<S>>> {
        self.sessions.read().await.get(key).cloned()
    }

    /// Remove a record from the map, handing ownership of the teardown to
    /// the caller. Atomic with respect to `get`.
    pub async fn remove(&self, key: &str) -> Option<Arc<SessionRecord<S>>> {
        self.sessions.write().await.remove(key)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Remove and close every session idle longer than `max_idle`.
    ///
    /// A record whose lock is currently held is mid-operation and therefore
    /// not idle; it is skipped rather than waited on, so the map guard never
    /// blocks on per-record work.
    pub async fn cleanup_expired(&self, max_idle: Duration) {
        let mut expired = Vec::new();
        {
            let mut sessions = self.sessions.write().await;
            let mut stale = Vec::new();
            for (key, record) in sessions.iter() {
                let Ok(state) = record.state.try_lock() else {
                    continue;
                };
                if state.last_activity.elapsed() > max_idle {
                    stale.push(key.clone());
                }
            }
            for key in stale {
                if let Some(record) = sessions.remove(&key) {
                    info!(session = %key, "closing idle netconf session");
                    expired.push(record);
                }
            }
        }
        for record in expired {
            tokio::spawn(async move {
                record.close().await;
            });
        }
    }

    /// Close every session; used during shutdown.
    pub async fn close_all(&self) {
        let records: Vec<_> = self.sessions.write().await.drain().map(|(_, record)| record).collect();
        for record in records {
            info!(session = %record.key(), "closing netconf session");
            record.close().await;
        }
    }
}

impl<S: NetconfSession> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "registry.test.rs"]
mod tests;

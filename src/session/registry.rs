//! # Session Registry
//!
//! Server-wide collection of live sessions. The collection is mutated from
//! several tasks (application code adding sessions, the reaper removing
//! them), so every read-modify-write sequence (insert, iterate-and-delete,
//! broadcast-while-iterating) runs under one mutex.

use crate::core::envelope::{ResultMessage, DISCONNECT_TAG};
use crate::error::{RelayError, Result};
use crate::session::Session;

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info};

/// Default cadence of the background reaper.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_millis(500);

/// Thread-safe registry of live sessions plus its background reaper.
pub struct SessionRegistry {
    sessions: Mutex<Vec<Arc<Session>>>,
    reap_interval: Duration,
    reaper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SessionRegistry {
    pub fn new(reap_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(Vec::new()),
            reap_interval,
            reaper: std::sync::Mutex::new(None),
        })
    }

    /// Start the background reaper. It holds only a weak handle, so a
    /// registry dropped without `shutdown()` still stops sweeping.
    pub fn start_reaper(self: Arc<Self>) {
        let weak = Arc::downgrade(&self);
        let interval = self.reap_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(registry) => registry.reap().await,
                    None => break,
                }
            }
        });

        if let Ok(mut slot) = self.reaper.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Register a session. When this identity's clearance disallows multiple
    /// concurrent logins, any session already held under the same name is
    /// ended and removed first.
    pub async fn add(&self, session: Arc<Session>) {
        let mut sessions = self.sessions.lock().await;

        if !session.policy().multi_login_allowed {
            let name = session.name().to_string();
            let mut kept = Vec::with_capacity(sessions.len());
            for existing in sessions.drain(..) {
                if existing.name() == name {
                    info!(session = %name, displaced_id = existing.id(), "displacing prior login");
                    existing.end("displaced by new login").await;
                } else {
                    kept.push(existing);
                }
            }
            *sessions = kept;
        }

        debug!(session = %session.name(), session_id = session.id(), "session registered");
        sessions.push(session);
    }

    /// Return the first session matching by name or id.
    pub async fn find(&self, name: Option<&str>, id: Option<u64>) -> Result<Arc<Session>> {
        self.sessions
            .lock()
            .await
            .iter()
            .find(|session| session.matches(name, id))
            .cloned()
            .ok_or_else(|| {
                RelayError::NotFound(format!("name={name:?} id={id:?}"))
            })
    }

    /// End a session and delete it from the collection.
    pub async fn remove(&self, session: &Arc<Session>) {
        session.end("removed from registry").await;
        self.sessions
            .lock()
            .await
            .retain(|held| !Arc::ptr_eq(held, session));
    }

    /// Force-send `message` to every live session under `key`.
    ///
    /// Best-effort: a peer that cannot be reached is skipped, never allowed
    /// to fail the broadcast for its neighbours.
    pub async fn broadcast(&self, key: &str, message: &ResultMessage) {
        let sessions = self.sessions.lock().await;
        for session in sessions.iter() {
            if let Err(err) = session
                .force_send(key, &Value::Null, message.clone())
                .await
            {
                debug!(session = %session.name(), error = %err, "broadcast not delivered");
            }
        }
    }

    /// One sweep: end (idempotently) and remove every session that has
    /// flagged itself disconnected. Best-effort, never raises.
    pub async fn reap(&self) {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();

        let mut kept = Vec::with_capacity(before);
        for session in sessions.drain(..) {
            if session.is_disconnected() {
                session.end("reaped").await;
                debug!(session = %session.name(), session_id = session.id(), "session reaped");
            } else {
                kept.push(session);
            }
        }
        *sessions = kept;

        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, remaining = sessions.len(), "reaper sweep finished");
        }
    }

    /// Broadcast a shutdown notice, end and remove every session, and stop
    /// the reaper.
    pub async fn shutdown(&self) {
        info!("registry shutting down");
        self.broadcast(
            DISCONNECT_TAG,
            &ResultMessage::disconnect("server shutting down"),
        )
        .await;

        let mut sessions = self.sessions.lock().await;
        for session in sessions.drain(..) {
            session.end("server shutdown").await;
        }
        drop(sessions);

        if let Ok(mut slot) = self.reaper.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }

    /// Number of currently registered sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

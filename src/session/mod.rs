//! # Session Actor
//!
//! One session per accepted connection. Each session owns a receive loop that
//! reassembles and decrypts frames, fans the envelope's calls out to the
//! dispatcher, correlates the results in a per-batch response pool, and writes
//! the batch reply as a single frame. A policy-gated watchdog ends sessions
//! that go idle.
//!
//! ## Concurrency contract
//! A session runs at most two tasks: the receive loop and the optional
//! watchdog. The response pool is owned by the receive loop alone; no other
//! task can reach it. Anything outside the session that wants to influence it
//! goes through [`Session::end`], which is idempotent and safe to call
//! concurrently from the loop, the watchdog, and the registry's reaper:
//! exactly one caller performs teardown, the rest observe the closed state.

mod pool;
mod registry;

pub use registry::SessionRegistry;

use crate::core::envelope::{
    encode_reply, Call, Envelope, ResultMessage, DISCONNECT_TAG, ERROR_KEY,
};
use crate::error::{RelayError, Result};
use crate::protocol::diagnostics::DiagnosticsSink;
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::policy::ClearancePolicy;
use crate::service::secure::{SecureReader, SecureWriter};
use crate::session::pool::ResponsePool;
use crate::utils::crypto::{Crypto, KEY_SIZE};

use futures::FutureExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, info};
use zeroize::Zeroize;

type DynReader = SecureReader<Box<dyn AsyncRead + Send + Unpin>>;
type DynWriter = SecureWriter<Box<dyn AsyncWrite + Send + Unpin>>;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Accepted, no frame processed yet.
    Connecting = 0,
    /// Normal operation.
    Active = 1,
    /// Teardown requested and in progress.
    Disconnecting = 2,
    /// Terminal: handle released, background tasks stopped.
    Closed = 3,
}

/// Who a session belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub name: String,
    pub id: u64,
    pub clearance: String,
}

/// Timing knobs for the receive loop and watchdog.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// How long one read attempt may block before the loop re-checks its
    /// running flag.
    pub poll_interval: Duration,
    /// Cadence of the idle watchdog's checks.
    pub watchdog_interval: Duration,
    /// Idle span after which a policy-gated session is ended.
    pub idle_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            watchdog_interval: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Per-connection actor: receive loop, response pool, idle watchdog.
pub struct Session {
    identity: SessionIdentity,
    policy: ClearancePolicy,
    /// None when this identity's clearance disables auto-logout.
    idle_timeout: Option<Duration>,
    poll_interval: Duration,
    watchdog_interval: Duration,
    writer: Mutex<DynWriter>,
    state: AtomicU8,
    running: AtomicBool,
    disconnected: AtomicBool,
    started: Instant,
    last_activity_ms: AtomicU64,
    dispatcher: Arc<dyn Dispatcher>,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("policy", &self.policy)
            .field("idle_timeout", &self.idle_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("watchdog_interval", &self.watchdog_interval)
            .field("state", &self.state)
            .field("running", &self.running)
            .field("disconnected", &self.disconnected)
            .field("last_activity_ms", &self.last_activity_ms)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Take ownership of an accepted, authenticated connection and start the
    /// session's tasks: the receive loop, plus the watchdog when this
    /// identity's policy enables auto-logout.
    pub fn spawn<S>(
        stream: S,
        identity: SessionIdentity,
        mut key: [u8; KEY_SIZE],
        policy: ClearancePolicy,
        settings: SessionSettings,
        dispatcher: Arc<dyn Dispatcher>,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader = SecureReader::new(
            Box::new(read_half) as Box<dyn AsyncRead + Send + Unpin>,
            Crypto::new(&key),
        );
        let writer = SecureWriter::new(
            Box::new(write_half) as Box<dyn AsyncWrite + Send + Unpin>,
            Crypto::new(&key),
        );
        key.zeroize();

        let idle_timeout = policy.auto_logout.then_some(settings.idle_timeout);
        let session = Arc::new(Self {
            identity,
            policy,
            idle_timeout,
            poll_interval: settings.poll_interval,
            watchdog_interval: settings.watchdog_interval,
            writer: Mutex::new(writer),
            state: AtomicU8::new(SessionState::Connecting as u8),
            running: AtomicBool::new(true),
            disconnected: AtomicBool::new(false),
            started: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            dispatcher,
            diagnostics,
        });

        tokio::spawn(Arc::clone(&session).receive_loop(reader));
        if session.idle_timeout.is_some() {
            tokio::spawn(Arc::clone(&session).watchdog());
        }

        session
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn id(&self) -> u64 {
        self.identity.id
    }

    pub fn policy(&self) -> ClearancePolicy {
        self.policy
    }

    pub fn state(&self) -> SessionState {
        match self.state.load(Ordering::Acquire) {
            0 => SessionState::Connecting,
            1 => SessionState::Active,
            2 => SessionState::Disconnecting,
            _ => SessionState::Closed,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    /// Match by name or id, so a registry can find a session without
    /// reaching into its internals.
    pub fn matches(&self, name: Option<&str>, id: Option<u64>) -> bool {
        name.is_some_and(|n| n == self.identity.name) || id.is_some_and(|i| i == self.identity.id)
    }

    /// Time since the last decoded frame.
    pub fn idle_time(&self) -> Duration {
        let elapsed = self.started.elapsed().as_millis() as u64;
        Duration::from_millis(elapsed.saturating_sub(self.last_activity_ms.load(Ordering::Acquire)))
    }

    fn touch(&self) {
        self.last_activity_ms
            .store(self.started.elapsed().as_millis() as u64, Ordering::Release);
    }

    /// Write a single-result envelope immediately, bypassing any in-flight
    /// batch's correlation bookkeeping. Used for malformed-input errors,
    /// decryption failures, and administrative broadcasts.
    pub async fn force_send(&self, key: &str, time: &Value, message: ResultMessage) -> Result<()> {
        let mut results = BTreeMap::new();
        results.insert(key.to_string(), message);
        let body = encode_reply(time, &results)?;
        self.writer.lock().await.send(&body).await
    }

    /// End this session. Idempotent: exactly one caller performs the teardown
    /// work; concurrent and repeated calls observe the already-closed state
    /// and return immediately.
    pub async fn end(&self, reason: &str) {
        loop {
            let current = self.state.load(Ordering::Acquire);
            if current >= SessionState::Disconnecting as u8 {
                return;
            }
            if self
                .state
                .compare_exchange(
                    current,
                    SessionState::Disconnecting as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                break;
            }
        }

        self.running.store(false, Ordering::Release);
        info!(
            session = %self.identity.name,
            session_id = self.identity.id,
            reason,
            "session closing"
        );

        let notice = ResultMessage::disconnect(reason);
        if let Err(err) = self.force_send(DISCONNECT_TAG, &Value::Null, notice).await {
            debug!(session = %self.identity.name, error = %err, "disconnect notice not delivered");
        }
        if let Err(err) = self.writer.lock().await.close().await {
            debug!(session = %self.identity.name, error = %err, "transport close failed");
        }

        self.disconnected.store(true, Ordering::Release);
        self.state
            .store(SessionState::Closed as u8, Ordering::Release);
    }

    async fn receive_loop(self: Arc<Self>, mut reader: DynReader) {
        let _ = self.state.compare_exchange(
            SessionState::Connecting as u8,
            SessionState::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        debug!(session = %self.identity.name, "receive loop started");

        while self.is_running() {
            let text = match time::timeout(self.poll_interval, reader.recv()).await {
                // poll tick: nothing arrived, re-check the running flag
                Err(_) => continue,
                Ok(Ok(Some(text))) => text,
                Ok(Ok(None)) => {
                    debug!(session = %self.identity.name, "peer closed the stream");
                    break;
                }
                Ok(Err(err)) => {
                    self.diagnostics.record(&err, &self.identity);
                    let notice = ResultMessage::error(err.to_string());
                    if let Err(send_err) = self.force_send(ERROR_KEY, &Value::Null, notice).await {
                        debug!(session = %self.identity.name, error = %send_err, "error notice not delivered");
                    }
                    if err.is_connection_fatal() {
                        // the byte stream can no longer be trusted for reassembly
                        break;
                    }
                    continue;
                }
            };

            self.touch();

            let envelope = match Envelope::parse(&text) {
                Ok(envelope) => envelope,
                Err(err) => {
                    // malformed but decrypted: report in-band, keep the connection
                    self.diagnostics.record(&err, &self.identity);
                    let notice = ResultMessage::error(err.to_string());
                    if let Err(send_err) = self.force_send(ERROR_KEY, &Value::Null, notice).await {
                        debug!(session = %self.identity.name, error = %send_err, "error notice not delivered");
                    }
                    continue;
                }
            };

            let keys = match envelope.correlation_keys() {
                Ok(keys) => keys,
                Err(err) => {
                    self.diagnostics.record(&err, &self.identity);
                    let notice = ResultMessage::error(err.to_string());
                    if let Err(send_err) = self.force_send(ERROR_KEY, &envelope.time, notice).await
                    {
                        debug!(session = %self.identity.name, error = %send_err, "error notice not delivered");
                    }
                    continue;
                }
            };

            match self.handle_batch(envelope, &keys).await {
                Ok(false) => {}
                Ok(true) => {
                    self.end("disconnect requested").await;
                    break;
                }
                Err(err) => {
                    self.diagnostics.record(&err, &self.identity);
                    if err.is_connection_fatal() {
                        break;
                    }
                }
            }
        }

        self.end("receive loop stopped").await;
    }

    /// Dispatch one batch and write its reply as a single frame.
    ///
    /// Returns true when the batch carried a disconnect control call and the
    /// session should end once the reply is on the wire.
    async fn handle_batch(&self, envelope: Envelope, keys: &[String]) -> Result<bool> {
        let Envelope { time, calls } = envelope;
        let mut pool = ResponsePool::new(keys);
        let mut end_after = false;
        let mut dispatches = JoinSet::new();

        for call in calls {
            match call {
                Call::Control { ref tag, .. } if tag == DISCONNECT_TAG => {
                    end_after = true;
                    pool.store(DISCONNECT_TAG, ResultMessage::disconnect("closing connection"))?;
                }
                call => {
                    let key = call.correlation_key().to_string();
                    let dispatcher = Arc::clone(&self.dispatcher);
                    dispatches.spawn(async move {
                        let (name, args) = call.into_parts();
                        let outcome = AssertUnwindSafe(dispatcher.execute(&name, &args))
                            .catch_unwind()
                            .await;
                        let message = match outcome {
                            Ok(Ok(value)) => ResultMessage::function(value),
                            Ok(Err(err)) => ResultMessage::error(err.to_string()),
                            Err(_) => ResultMessage::error(format!("operation `{name}` panicked")),
                        };
                        (key, message)
                    });
                }
            }
        }

        // results land in completion order; correlation is by key, not arrival
        while let Some(joined) = dispatches.join_next().await {
            let (key, message) = joined
                .map_err(|e| RelayError::Dispatch(format!("dispatch task failed: {e}")))?;
            pool.store(&key, message)?;
        }

        let results = pool.finish()?;
        let batch = results.len();
        let body = encode_reply(&time, &results)?;
        self.writer.lock().await.send(&body).await?;
        debug!(session = %self.identity.name, batch, "batch reply sent");

        Ok(end_after)
    }

    async fn watchdog(self: Arc<Self>) {
        let Some(limit) = self.idle_timeout else {
            return;
        };
        debug!(session = %self.identity.name, timeout = ?limit, "idle watchdog armed");

        let mut ticker = time::interval(self.watchdog_interval);
        loop {
            ticker.tick().await;
            if !self.is_running() {
                break;
            }
            if self.idle_time() >= limit {
                info!(
                    session = %self.identity.name,
                    idle = ?self.idle_time(),
                    "idle timeout reached"
                );
                self.end("timeout").await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> SessionIdentity {
        SessionIdentity {
            name: "nils".to_string(),
            id: 7,
            clearance: "user".to_string(),
        }
    }

    struct NoopDispatcher;

    #[async_trait::async_trait]
    impl Dispatcher for NoopDispatcher {
        async fn execute(
            &self,
            _name: &str,
            _args: &serde_json::Map<String, Value>,
        ) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    struct NoopSink;

    impl DiagnosticsSink for NoopSink {
        fn record(&self, _error: &RelayError, _session: &SessionIdentity) {}
    }

    fn spawn_session() -> (Arc<Session>, tokio::io::DuplexStream) {
        let (stream, peer) = tokio::io::duplex(4096);
        let session = Session::spawn(
            stream,
            identity(),
            [3u8; KEY_SIZE],
            ClearancePolicy::default(),
            SessionSettings::default(),
            Arc::new(NoopDispatcher),
            Arc::new(NoopSink),
        );
        (session, peer)
    }

    #[tokio::test]
    async fn matches_by_name_or_id() {
        let (session, _peer) = spawn_session();
        assert!(session.matches(Some("nils"), None));
        assert!(session.matches(None, Some(7)));
        assert!(session.matches(Some("other"), Some(7)));
        assert!(!session.matches(Some("other"), Some(8)));
        assert!(!session.matches(None, None));
        session.end("test over").await;
    }

    #[tokio::test]
    async fn end_is_idempotent_and_terminal() {
        let (session, _peer) = spawn_session();
        session.end("first").await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.is_disconnected());
        assert!(!session.is_running());

        // a second end observes the closed state and returns
        session.end("second").await;
        assert_eq!(session.state(), SessionState::Closed);
    }
}

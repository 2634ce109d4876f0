#![allow(dead_code)]
//! Shared plumbing for integration tests: an in-memory peer speaking the
//! wire protocol against a spawned session.

use relay_protocol::error::Result;
use relay_protocol::protocol::diagnostics::DiagnosticsSink;
use relay_protocol::protocol::dispatcher::Dispatcher;
use relay_protocol::protocol::policy::ClearancePolicy;
use relay_protocol::service::secure::{secure_pair, SecureReader, SecureWriter};
use relay_protocol::session::{Session, SessionIdentity, SessionSettings};
use relay_protocol::RelayError;

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

pub const KEY: [u8; 32] = [9u8; 32];

/// Client half of an in-memory connection.
pub struct TestClient {
    pub reader: SecureReader<ReadHalf<DuplexStream>>,
    pub writer: SecureWriter<WriteHalf<DuplexStream>>,
}

impl TestClient {
    pub async fn send(&mut self, plaintext: &str) {
        self.writer.send(plaintext).await.expect("client send");
    }

    /// Receive one envelope and parse it as JSON, `None` on stream close.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.reader.recv().await.expect("client recv")?;
        Some(serde_json::from_str(&text).expect("reply is valid JSON"))
    }

    /// Like `recv_json`, but fails the test if nothing arrives in time.
    pub async fn recv_json_within(&mut self, limit: Duration) -> Option<Value> {
        tokio::time::timeout(limit, self.recv_json())
            .await
            .expect("reply before deadline")
    }
}

pub fn identity(name: &str, id: u64) -> SessionIdentity {
    SessionIdentity {
        name: name.to_string(),
        id,
        clearance: "user".to_string(),
    }
}

/// Spawn a session wired to an in-memory peer.
pub fn session_pair(
    who: SessionIdentity,
    policy: ClearancePolicy,
    settings: SessionSettings,
    dispatcher: Arc<dyn Dispatcher>,
) -> (Arc<Session>, TestClient) {
    let (server_stream, client_stream) = tokio::io::duplex(64 * 1024);
    let session = Session::spawn(
        server_stream,
        who,
        KEY,
        policy,
        settings,
        dispatcher,
        Arc::new(SilentSink),
    );
    let (reader, writer) = secure_pair(client_stream, &KEY);
    (session, TestClient { reader, writer })
}

/// Fast settings so tests spend milliseconds, not wall-clock minutes.
pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        poll_interval: Duration::from_millis(50),
        watchdog_interval: Duration::from_millis(25),
        idle_timeout: Duration::from_millis(200),
    }
}

pub struct SilentSink;

impl DiagnosticsSink for SilentSink {
    fn record(&self, _error: &RelayError, _session: &SessionIdentity) {}
}

/// Dispatcher backed by a plain closure, enough for most scenarios.
pub struct FnDispatcher<F>(pub F);

#[async_trait::async_trait]
impl<F> Dispatcher for FnDispatcher<F>
where
    F: Fn(&str, &serde_json::Map<String, Value>) -> Result<Value> + Send + Sync,
{
    async fn execute(&self, name: &str, args: &serde_json::Map<String, Value>) -> Result<Value> {
        (self.0)(name, args)
    }
}

//! TCP accept loop.
//!
//! Binds the listen address, then drives accepted connections through the
//! external authenticator and into the session registry. The handshake itself
//! is not this crate's business: the [`Authenticator`] collaborator owns it
//! and hands back the session identity plus the shared 32-byte key.

use crate::error::Result;
use crate::protocol::diagnostics::DiagnosticsSink;
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::policy::PolicyStore;
use crate::session::{Session, SessionIdentity, SessionRegistry, SessionSettings};
use crate::utils::crypto::KEY_SIZE;

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// What a successful handshake yields.
pub struct AuthOutcome {
    pub identity: SessionIdentity,
    pub key: [u8; KEY_SIZE],
}

/// External collaborator that authenticates a freshly accepted connection.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, stream: &mut TcpStream, peer: SocketAddr) -> Result<AuthOutcome>;
}

/// Everything a running server needs, bundled for the accept loop.
pub struct ServerHarness {
    pub registry: Arc<SessionRegistry>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub policies: Arc<dyn PolicyStore>,
    pub authenticator: Arc<dyn Authenticator>,
    pub diagnostics: Arc<dyn DiagnosticsSink>,
    pub session_settings: SessionSettings,
}

/// Start a server that shuts down on CTRL+C.
pub async fn start_server(address: &str, harness: Arc<ServerHarness>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    start_server_with_shutdown(address, harness, shutdown_rx).await
}

/// Start a server with an external shutdown channel.
pub async fn start_server_with_shutdown(
    address: &str,
    harness: Arc<ServerHarness>,
    shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(address).await?;
    info!(address = %address, "listening");
    serve(listener, harness, shutdown_rx).await
}

/// Drive an already-bound listener until the shutdown channel fires.
pub async fn serve(
    listener: TcpListener,
    harness: Arc<ServerHarness>,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    Arc::clone(&harness.registry).start_reaper();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("shutting down server");
                harness.registry.shutdown().await;
                return Ok(());
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        let harness = Arc::clone(&harness);
                        tokio::spawn(async move {
                            accept_connection(stream, peer, harness).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "error accepting connection");
                    }
                }
            }
        }
    }
}

async fn accept_connection(mut stream: TcpStream, peer: SocketAddr, harness: Arc<ServerHarness>) {
    let outcome = match harness.authenticator.authenticate(&mut stream, peer).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(peer = %peer, error = %err, "authentication failed, dropping connection");
            return;
        }
    };

    info!(peer = %peer, session = %outcome.identity.name, "connection authenticated");
    let policy = harness.policies.policy_for(&outcome.identity.clearance);
    let session = Session::spawn(
        stream,
        outcome.identity,
        outcome.key,
        policy,
        harness.session_settings.clone(),
        Arc::clone(&harness.dispatcher),
        Arc::clone(&harness.diagnostics),
    );
    harness.registry.add(session).await;
}

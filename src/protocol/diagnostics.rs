//! Out-of-band error reporting.
//!
//! Sessions hand recoverable and fatal errors to a [`DiagnosticsSink`]
//! alongside the originating identity. Sinks must never fail; a diagnostics
//! problem cannot be allowed to take a session down with it.

use crate::error::RelayError;
use crate::session::SessionIdentity;
use tracing::error;

/// Receives session errors for out-of-band logging.
pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, error: &RelayError, session: &SessionIdentity);
}

/// Default sink that forwards to the `tracing` error stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn record(&self, error: &RelayError, session: &SessionIdentity) {
        error!(
            session = %session.name,
            session_id = session.id,
            clearance = %session.clearance,
            error = %error,
            "session error recorded"
        );
    }
}

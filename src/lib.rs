//! # relay-protocol
//!
//! Secure, session-oriented messaging core for Rust applications and
//! services.
//!
//! One connection carries length-prefixed encrypted frames; each frame's
//! plaintext is a JSON envelope batching one or more calls. A per-connection
//! [`Session`] decodes frames, dispatches calls to an external
//! [`Dispatcher`](protocol::dispatcher::Dispatcher), correlates the results
//! by key, and answers each batch with exactly one reply frame. A
//! [`SessionRegistry`] tracks live sessions, enforces per-identity login
//! policy, and sweeps out disconnected sessions in the background.
//!
//! ## Layout
//! - [`core`](crate::core): frame codec and envelope model
//! - [`service`]: encrypted reader/writer channel
//! - [`session`]: session actor, response pool, registry
//! - [`protocol`]: dispatcher, policy store, diagnostics collaborators
//! - [`transport`]: TCP accept loop
//! - [`config`], [`error`], [`utils`]: ambient plumbing

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod session;
pub mod transport;
pub mod utils;

pub use crate::config::RelayConfig;
pub use crate::core::envelope::{Call, Envelope, ResultKind, ResultMessage};
pub use crate::error::{RelayError, Result};
pub use crate::session::{
    Session, SessionIdentity, SessionRegistry, SessionSettings, SessionState,
};

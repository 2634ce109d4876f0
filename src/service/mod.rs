//! # Service Layer
//!
//! Encrypted channel plumbing shared by sessions and clients.
pub mod secure;

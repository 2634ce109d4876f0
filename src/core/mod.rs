//! # Core Protocol Components
//!
//! Low-level framing and the envelope model.
//!
//! This module provides the foundation for the protocol: length-prefixed
//! frame handling and the JSON envelope carried inside each frame.
//!
//! ## Components
//! - **Frame**: length-prefixed ciphertext framing over byte streams
//! - **Envelope**: batch-of-calls inbound model, correlation-map outbound model
//!
//! ## Wire Format
//! ```text
//! [Length(8, big-endian)] [Ciphertext(N)]
//! ```
//!
//! ## Security
//! - Maximum frame size: 16MB (prevents memory exhaustion)
//! - Length validation before allocation
//! - A frame reaches the decrypt step only after all N bytes arrived
pub mod envelope;
pub mod frame;

//! # Utility Modules
//!
//! Supporting utilities for cryptography and logging.
//!
//! ## Components
//! - **Crypto**: XChaCha20-Poly1305 AEAD encryption
//! - **Logging**: Structured logging configuration
//!
//! ## Security
//! - Cryptographically secure nonce generation (AEAD OsRng)
//! - Memory zeroing for key material (zeroize crate)
pub mod crypto;
pub mod logging;

//! # SHROUD Crypto
//!
//! Cryptographic primitives for the SHROUD transport protocol.
//!
//! This crate provides:
//! - X25519 key exchange for identity, ephemeral and rollover keys
//! - The chained AEAD envelope: ChaCha20-Poly1305 payload sealing with the
//!   wire header as associated data, plus XChaCha20-keyed sequence-number
//!   obfuscation
//! - Secure random number generation
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm |
//! |----------|-----------|
//! | Key Exchange | X25519 |
//! | Payload AEAD | ChaCha20-Poly1305 (IETF, 12-byte nonce) |
//! | Sequence-number encryption | XChaCha20-Poly1305 keystream |
//!
//! The suite is fixed; there is no negotiation. Shared secrets are raw
//! 32-byte ECDH outputs used directly as AEAD keys, with no KDF in between.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod random;
pub mod seal;
pub mod x25519;

pub use error::CryptoError;
pub use seal::{open_chained, seal_chained, SN_MAX};
pub use x25519::{PrivateKey, PublicKey, SharedSecret};

/// X25519 public key size in bytes.
pub const PUB_KEY_SIZE: usize = 32;

/// Shared secret (AEAD key) size in bytes.
pub const KEY_SIZE: usize = 32;

/// Poly1305 authentication tag size in bytes.
pub const MAC_SIZE: usize = 16;

/// On-wire sequence number size in bytes (48-bit counter).
pub const SN_SIZE: usize = 6;

/// Deterministic nonce size (IETF ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Extended nonce size read from the head of the ciphertext (XChaCha20).
pub const XNONCE_SIZE: usize = 24;

/// Minimum plaintext length for the chained envelope. Together with the
/// 16-byte tag this guarantees the 24 ciphertext bytes the extended nonce
/// is taken from.
pub const MIN_PAYLOAD_SIZE: usize = 8;

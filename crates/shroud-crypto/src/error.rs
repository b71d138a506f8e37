//! Error types for the crypto layer.

use thiserror::Error;

/// Cryptographic errors.
///
/// Every variant maps to "drop the datagram" at the dispatch layer; none of
/// them is ever signalled back on the wire.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Public key bytes could not be decoded (wrong length or bad hex).
    #[error("invalid public key encoding")]
    BadPublicKey,

    /// ECDH produced a degenerate (all-zero) shared secret, which happens
    /// when the peer supplies a low-order point.
    #[error("key agreement produced a degenerate secret")]
    KeyAgreement,

    /// The AEAD rejected the ciphertext tag.
    #[error("AEAD authentication failed")]
    AeadAuthentication,

    /// AEAD sealing failed.
    #[error("AEAD sealing failed")]
    Seal,

    /// Not enough ciphertext to carry an encrypted sequence number plus a
    /// minimum sealed payload.
    #[error("ciphertext too short: expected at least {expected}, got {actual}")]
    CiphertextTooShort {
        /// Minimum required length.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Sequence number does not fit in 48 bits.
    #[error("sequence number exceeds 48 bits")]
    SnOutOfRange,

    /// Plaintext below the envelope minimum.
    #[error("payload below the chained-envelope minimum")]
    PayloadTooShort,

    /// The OS random source failed.
    #[error("random source failed")]
    RandomFailed,
}

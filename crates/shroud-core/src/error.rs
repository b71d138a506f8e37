//! Error types for the SHROUD core protocol.
//!
//! Every error is local to the datagram that produced it: the dispatching
//! layer drops the datagram silently and nothing is ever signalled back on
//! the wire. Only the absence of valid traffic ends a connection.

use shroud_crypto::CryptoError;
use thiserror::Error;

/// Core protocol errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Datagram shorter than the minimum for its declared variant.
    #[error("datagram too short: expected at least {expected}, got {actual}")]
    SizeBelowMinimum {
        /// Minimum size for the variant.
        expected: usize,
        /// Actual size received.
        actual: usize,
    },

    /// Top-five-bit version field is not zero.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// Variant tag outside the defined range.
    #[error("unknown message type 0x{0:02X}")]
    UnknownMsgType(u8),

    /// Handshake variants must carry sequence number zero.
    #[error("handshake packet with non-zero sequence number")]
    BadHandshakeSequence,

    /// 0-RTT payload cannot fit the first-datagram budget.
    #[error("payload exceeds the first-datagram budget: {actual} > {budget}")]
    PayloadTooLarge {
        /// Largest payload the first datagram can carry.
        budget: usize,
        /// Offered payload size.
        actual: usize,
    },

    /// Operation not valid in the connection's current state.
    #[error("invalid state for operation")]
    InvalidState,

    /// Inner payload codec error.
    #[error("payload: {0}")]
    Payload(#[from] PayloadError),

    /// Cryptographic error.
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),
}

/// Inner payload codec errors.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// Payload shorter than its declared fields require.
    #[error("payload too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Minimum size the flags demand.
        expected: usize,
        /// Actual size received.
        actual: usize,
    },

    /// Reserved version bits in the flags byte are set.
    #[error("unsupported payload version bits 0x{0:02X}")]
    UnsupportedVersion(u8),

    /// An offset larger than 48 bits cannot be encoded.
    #[error("stream offset exceeds 48 bits")]
    OffsetTooLarge,
}

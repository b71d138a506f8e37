//! # SHROUD Core
//!
//! Core protocol implementation for the SHROUD transport: a
//! connection-oriented, encrypted, multiplexed byte-stream transport that
//! runs over unreliable datagrams.
//!
//! This crate provides:
//! - The six-variant wire envelope (encode/decode over the chained AEAD)
//! - The inner payload codec (stream data, close flags, piggybacked ACKs,
//!   log-scale receive window)
//! - The handshake and key-rotation state machine
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Connection                                │
//! │   (handshake state, epoch keys, per-direction counters)         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                        Payload codec                             │
//! │   (stream id + offset, selective ACK, receive window)           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                        Wire envelope                             │
//! │   (variant tag, connection id, chained AEAD, encrypted SN)      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The codec layers are pure and synchronous; the connection lookup keyed
//! on the 8-byte connection id is the caller's synchronization point, and
//! processing per connection is single-threaded.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod envelope;
pub mod error;
pub mod handshake;
pub mod payload;
pub mod wire;

pub use envelope::{decode_header, Message, MsgType, PeerKeys};
pub use error::{Error, PayloadError};
pub use handshake::{Connection, ConnectionConfig, HandshakeState, Role};
pub use payload::{
    calc_overhead, decode_payload, decode_rcv_window, encode_payload, encode_rcv_window, Ack,
    PayloadHeader,
};

pub use shroud_crypto::{MAC_SIZE, MIN_PAYLOAD_SIZE, PUB_KEY_SIZE, SN_SIZE};

/// Wire protocol version, carried in the top five bits of the first byte.
pub const VERSION: u8 = 0;

/// Size of the variant/version header byte.
pub const HEADER_SIZE: usize = 1;

/// Connection id size.
pub const CONN_ID_SIZE: usize = 8;

/// Header byte plus connection id.
pub const HEADER_CONN_ID_SIZE: usize = HEADER_SIZE + CONN_ID_SIZE;

/// Size of the filler-length prefix inside a 0-RTT first payload.
pub const FILL_LEN_SIZE: usize = 2;

/// Size every first dialer datagram is padded to. Fixed until the path-MTU
/// probe of the surrounding layer raises it.
pub const START_MTU: usize = 1400;

/// Minimum on-wire size of an `InitSnd` datagram (always padded).
pub const MIN_INIT_SND_SIZE: usize = START_MTU;

/// Minimum on-wire size of an `InitRcv` datagram.
pub const MIN_INIT_RCV_SIZE: usize = HEADER_CONN_ID_SIZE + 3 * PUB_KEY_SIZE + SN_SIZE + MAC_SIZE;

/// Minimum on-wire size of an `InitCryptoSnd` datagram before filler.
pub const MIN_INIT_CRYPTO_SND_SIZE: usize =
    HEADER_CONN_ID_SIZE + 3 * PUB_KEY_SIZE + SN_SIZE + FILL_LEN_SIZE + MAC_SIZE;

/// Minimum on-wire size of an `InitCryptoRcv` datagram.
pub const MIN_INIT_CRYPTO_RCV_SIZE: usize =
    HEADER_CONN_ID_SIZE + 2 * PUB_KEY_SIZE + SN_SIZE + MAC_SIZE;

/// Minimum on-wire size of a `DataRot` datagram.
pub const MIN_DATA_ROT_SIZE: usize = HEADER_CONN_ID_SIZE + PUB_KEY_SIZE + SN_SIZE + MAC_SIZE;

/// Minimum on-wire size of a `Data` datagram.
pub const MIN_DATA_SIZE: usize = HEADER_CONN_ID_SIZE + SN_SIZE + MAC_SIZE;

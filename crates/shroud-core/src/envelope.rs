//! Wire envelope: variant-tagged headers over the chained AEAD seal.
//!
//! Every datagram starts with one header byte (version in the top five
//! bits, variant tag in the low three) and an 8-byte connection id. The
//! handshake variants then carry public keys in the clear; everything after
//! the keys is `enc_sn || ciphertext` sealed by
//! [`shroud_crypto::seal_chained`] with the clear prefix as AAD.
//!
//! Connection ids: the four `Init*` variants all use the low 8 bytes of the
//! *initiator's* ephemeral public key, so both directions of a handshake
//! demultiplex on one value. `Data` and `DataRot` use the XOR of both
//! ephemerals' low bytes, which neither reveals.

use shroud_crypto::{open_chained, seal_chained, PrivateKey, PublicKey, SharedSecret};
use tracing::trace;

use crate::error::Error;
use crate::wire;
use crate::{
    CONN_ID_SIZE, FILL_LEN_SIZE, HEADER_CONN_ID_SIZE, HEADER_SIZE, MIN_DATA_ROT_SIZE,
    MIN_DATA_SIZE, MIN_INIT_CRYPTO_RCV_SIZE, MIN_INIT_CRYPTO_SND_SIZE, MIN_INIT_RCV_SIZE,
    MIN_INIT_SND_SIZE, MIN_PAYLOAD_SIZE, PUB_KEY_SIZE, START_MTU, VERSION,
};

/// Message variant tag, the low three bits of the first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    /// Dialer's first datagram: three clear public keys, zero-padded to the
    /// start MTU, no ciphertext. A knock, authenticated by the reply.
    InitSnd = 0,
    /// Responder's reply: identity, ephemeral and rollover keys plus a
    /// payload sealed under the ephemeral-ephemeral secret.
    InitRcv = 1,
    /// Dialer's first datagram carrying 0-RTT payload sealed to the
    /// responder's identity key.
    InitCryptoSnd = 2,
    /// Responder's reply to a 0-RTT open: ephemeral and rollover keys only.
    InitCryptoRcv = 3,
    /// First datagram of a new key epoch, carrying the activated rollover
    /// key.
    DataRot = 4,
    /// Steady-state data datagram.
    Data = 5,
}

impl TryFrom<u8> for MsgType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(Self::InitSnd),
            1 => Ok(Self::InitRcv),
            2 => Ok(Self::InitCryptoSnd),
            3 => Ok(Self::InitCryptoRcv),
            4 => Ok(Self::DataRot),
            5 => Ok(Self::Data),
            _ => Err(Error::UnknownMsgType(value)),
        }
    }
}

/// A decrypted envelope.
#[derive(Debug)]
pub struct Message {
    /// Variant this datagram carried.
    pub msg_type: MsgType,
    /// Recovered sequence number (always 0 for handshake variants).
    pub sn: u64,
    /// Decrypted payload; empty for `InitSnd`, which seals nothing.
    pub payload: Vec<u8>,
    /// Secret derived while decoding, when the variant derives one.
    pub shared_secret: Option<SharedSecret>,
}

/// Public keys learned from a peer's handshake datagram.
#[derive(Debug, Clone)]
pub struct PeerKeys {
    /// Peer long-term identity key; absent on `InitCryptoRcv`, where the
    /// responder proves itself by decrypting instead.
    pub id: Option<PublicKey>,
    /// Peer current ephemeral key.
    pub ep: PublicKey,
    /// Peer pre-staged rollover key for the next epoch.
    pub ep_rollover: PublicKey,
}

/// Write the header byte and connection id.
///
/// `ep_b` switches the id to the XOR form used by `Data`/`DataRot`.
fn fill_header(buf: &mut [u8], msg_type: MsgType, ep_a: &PublicKey, ep_b: Option<&PublicKey>) {
    buf[0] = (VERSION << 3) | msg_type as u8;
    let mut conn_id = wire::read_u64(&ep_a.as_bytes()[..CONN_ID_SIZE]);
    if let Some(ep_b) = ep_b {
        conn_id ^= wire::read_u64(&ep_b.as_bytes()[..CONN_ID_SIZE]);
    }
    wire::put_u64(&mut buf[HEADER_SIZE..HEADER_CONN_ID_SIZE], conn_id);
}

/// Read the connection id and variant tag without touching the ciphertext.
///
/// This is the demultiplexing hook: the I/O loop calls it on every inbound
/// datagram to pick a connection before any decryption happens.
///
/// # Errors
///
/// - [`Error::SizeBelowMinimum`] under 9 bytes
/// - [`Error::UnsupportedVersion`] when the top five bits are not zero
/// - [`Error::UnknownMsgType`] for tags 6 and 7
pub fn decode_header(datagram: &[u8]) -> Result<(u64, MsgType), Error> {
    if datagram.len() < HEADER_CONN_ID_SIZE {
        return Err(Error::SizeBelowMinimum {
            expected: HEADER_CONN_ID_SIZE,
            actual: datagram.len(),
        });
    }

    let version = datagram[0] >> 3;
    if version != VERSION {
        return Err(Error::UnsupportedVersion(version));
    }

    let msg_type = MsgType::try_from(datagram[0] & 0x07)?;
    let conn_id = wire::read_u64(&datagram[HEADER_SIZE..HEADER_CONN_ID_SIZE]);
    Ok((conn_id, msg_type))
}

fn check_min(enc: &[u8], min: usize) -> Result<(), Error> {
    if enc.len() < min {
        return Err(Error::SizeBelowMinimum {
            expected: min,
            actual: enc.len(),
        });
    }
    Ok(())
}

fn pub_key_at(enc: &[u8], index: usize) -> Result<PublicKey, Error> {
    let start = HEADER_CONN_ID_SIZE + index * PUB_KEY_SIZE;
    Ok(PublicKey::from_slice(&enc[start..start + PUB_KEY_SIZE])?)
}

// ------------------------------- Encoders -------------------------------

/// Encode the dialer's first datagram without 0-RTT payload.
///
/// Carries the dialer's identity, ephemeral and rollover keys in the clear
/// and pads with zeroes to [`START_MTU`]. Nothing is sealed; the responder
/// authenticates the exchange by echoing the connection id inside its
/// sealed reply.
#[must_use]
pub fn encode_init_snd(
    id_local: &PublicKey,
    ep_local: &PrivateKey,
    ep_rollover_local: &PrivateKey,
) -> Vec<u8> {
    let mut buf = vec![0u8; START_MTU];
    let ep_pub = ep_local.public_key();
    fill_header(&mut buf, MsgType::InitSnd, &ep_pub, None);

    buf[HEADER_CONN_ID_SIZE..HEADER_CONN_ID_SIZE + PUB_KEY_SIZE]
        .copy_from_slice(id_local.as_bytes());
    buf[HEADER_CONN_ID_SIZE + PUB_KEY_SIZE..HEADER_CONN_ID_SIZE + 2 * PUB_KEY_SIZE]
        .copy_from_slice(ep_pub.as_bytes());
    buf[HEADER_CONN_ID_SIZE + 2 * PUB_KEY_SIZE..HEADER_CONN_ID_SIZE + 3 * PUB_KEY_SIZE]
        .copy_from_slice(ep_rollover_local.public_key().as_bytes());

    buf
}

/// Encode the responder's reply to an `InitSnd`.
///
/// `ep_remote` is the initiator's ephemeral key: it fixes the connection id
/// and the ephemeral-ephemeral session secret the payload is sealed under.
///
/// # Errors
///
/// Key agreement or sealing failures; the payload must be at least 8 bytes.
pub fn encode_init_rcv(
    id_local: &PublicKey,
    ep_remote: &PublicKey,
    ep_local: &PrivateKey,
    ep_rollover_local: &PrivateKey,
    payload: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut header = vec![0u8; HEADER_CONN_ID_SIZE + 3 * PUB_KEY_SIZE];
    fill_header(&mut header, MsgType::InitRcv, ep_remote, None);

    header[HEADER_CONN_ID_SIZE..HEADER_CONN_ID_SIZE + PUB_KEY_SIZE]
        .copy_from_slice(id_local.as_bytes());
    header[HEADER_CONN_ID_SIZE + PUB_KEY_SIZE..HEADER_CONN_ID_SIZE + 2 * PUB_KEY_SIZE]
        .copy_from_slice(ep_local.public_key().as_bytes());
    header[HEADER_CONN_ID_SIZE + 2 * PUB_KEY_SIZE..HEADER_CONN_ID_SIZE + 3 * PUB_KEY_SIZE]
        .copy_from_slice(ep_rollover_local.public_key().as_bytes());

    let secret = ep_local.exchange(ep_remote)?;
    Ok(seal_chained(0, false, &secret, &header, payload)?)
}

/// Encode the dialer's first datagram with 0-RTT payload.
///
/// The payload is sealed under `ECDH(ep_local, id_remote)` — a secret
/// derived from the peer's long-term key and therefore *not* forward
/// secret; that is the price of data in the first flight. The plaintext is
/// prefixed with a filler so the datagram comes out exactly [`START_MTU`]
/// bytes.
///
/// # Errors
///
/// - [`Error::PayloadTooLarge`] when payload plus overhead exceeds the
///   start MTU
/// - `PayloadTooShort` under 8 bytes, key agreement failures
pub fn encode_init_crypto_snd(
    id_remote: &PublicKey,
    id_local: &PublicKey,
    ep_local: &PrivateKey,
    ep_rollover_local: &PrivateKey,
    payload: &[u8],
) -> Result<Vec<u8>, Error> {
    if payload.len() < MIN_PAYLOAD_SIZE {
        return Err(Error::Crypto(shroud_crypto::CryptoError::PayloadTooShort));
    }
    let budget = START_MTU - MIN_INIT_CRYPTO_SND_SIZE;
    if payload.len() > budget {
        return Err(Error::PayloadTooLarge {
            budget,
            actual: payload.len(),
        });
    }

    let ep_pub = ep_local.public_key();
    let mut header = vec![0u8; HEADER_CONN_ID_SIZE + 3 * PUB_KEY_SIZE];
    fill_header(&mut header, MsgType::InitCryptoSnd, &ep_pub, None);

    header[HEADER_CONN_ID_SIZE..HEADER_CONN_ID_SIZE + PUB_KEY_SIZE]
        .copy_from_slice(id_local.as_bytes());
    header[HEADER_CONN_ID_SIZE + PUB_KEY_SIZE..HEADER_CONN_ID_SIZE + 2 * PUB_KEY_SIZE]
        .copy_from_slice(ep_pub.as_bytes());
    header[HEADER_CONN_ID_SIZE + 2 * PUB_KEY_SIZE..HEADER_CONN_ID_SIZE + 3 * PUB_KEY_SIZE]
        .copy_from_slice(ep_rollover_local.public_key().as_bytes());

    let fill_len = (budget - payload.len()) as u16;
    let mut padded = vec![0u8; FILL_LEN_SIZE + usize::from(fill_len) + payload.len()];
    wire::put_u16(&mut padded, fill_len);
    padded[FILL_LEN_SIZE + usize::from(fill_len)..].copy_from_slice(payload);

    let no_pfs_secret = ep_local.exchange(id_remote)?;
    Ok(seal_chained(0, true, &no_pfs_secret, &header, &padded)?)
}

/// Encode the responder's reply to an `InitCryptoSnd`.
///
/// Only two keys travel: the responder's identity is proven by its ability
/// to open the 0-RTT datagram, so it stays off the wire.
///
/// # Errors
///
/// Key agreement or sealing failures; the payload must be at least 8 bytes.
pub fn encode_init_crypto_rcv(
    ep_remote: &PublicKey,
    ep_local: &PrivateKey,
    ep_rollover_local: &PrivateKey,
    payload: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut header = vec![0u8; HEADER_CONN_ID_SIZE + 2 * PUB_KEY_SIZE];
    fill_header(&mut header, MsgType::InitCryptoRcv, ep_remote, None);

    header[HEADER_CONN_ID_SIZE..HEADER_CONN_ID_SIZE + PUB_KEY_SIZE]
        .copy_from_slice(ep_local.public_key().as_bytes());
    header[HEADER_CONN_ID_SIZE + PUB_KEY_SIZE..HEADER_CONN_ID_SIZE + 2 * PUB_KEY_SIZE]
        .copy_from_slice(ep_rollover_local.public_key().as_bytes());

    let secret = ep_local.exchange(ep_remote)?;
    Ok(seal_chained(0, false, &secret, &header, payload)?)
}

/// Encode the first datagram of a new key epoch.
///
/// Carries the rollover key being activated; the epoch secret is
/// `ECDH(ep_rollover_local, ep_remote)`. `local_is_initiator` is the
/// encoder's connection role — rotation may be started from either side.
///
/// # Errors
///
/// Key agreement or sealing failures; the payload must be at least 8 bytes.
pub fn encode_data_rot(
    ep_pub_local: &PublicKey,
    ep_remote: &PublicKey,
    local_is_initiator: bool,
    ep_rollover_local: &PrivateKey,
    payload: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut header = vec![0u8; HEADER_CONN_ID_SIZE + PUB_KEY_SIZE];
    fill_header(&mut header, MsgType::DataRot, ep_pub_local, Some(ep_remote));

    header[HEADER_CONN_ID_SIZE..HEADER_CONN_ID_SIZE + PUB_KEY_SIZE]
        .copy_from_slice(ep_rollover_local.public_key().as_bytes());

    let epoch_secret = ep_rollover_local.exchange(ep_remote)?;
    Ok(seal_chained(
        0,
        local_is_initiator,
        &epoch_secret,
        &header,
        payload,
    )?)
}

/// Encode a steady-state data datagram under the session secret.
///
/// # Errors
///
/// Sealing failures; the payload must be at least 8 bytes and `sn` must fit
/// 48 bits.
pub fn encode_data(
    ep_pub_local: &PublicKey,
    ep_remote: &PublicKey,
    local_is_initiator: bool,
    secret: &SharedSecret,
    sn: u64,
    payload: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut header = vec![0u8; HEADER_CONN_ID_SIZE];
    fill_header(&mut header, MsgType::Data, ep_pub_local, Some(ep_remote));

    Ok(seal_chained(
        sn,
        local_is_initiator,
        secret,
        &header,
        payload,
    )?)
}

// ------------------------------- Decoders -------------------------------

/// Decode an `InitSnd` knock.
///
/// Parses the dialer's three public keys and derives the
/// ephemeral-ephemeral secret for the reply. There is nothing to
/// authenticate yet.
///
/// # Errors
///
/// Size, key-decoding or key-agreement failures.
pub fn decode_init_snd(enc: &[u8], ep_local: &PrivateKey) -> Result<(PeerKeys, Message), Error> {
    check_min(enc, MIN_INIT_SND_SIZE)?;

    let id = pub_key_at(enc, 0)?;
    let ep = pub_key_at(enc, 1)?;
    let ep_rollover = pub_key_at(enc, 2)?;

    let secret = ep_local.exchange(&ep)?;
    trace!(variant = "InitSnd", "decoded handshake knock");

    Ok((
        PeerKeys {
            id: Some(id),
            ep,
            ep_rollover,
        },
        Message {
            msg_type: MsgType::InitSnd,
            sn: 0,
            payload: Vec::new(),
            shared_secret: Some(secret),
        },
    ))
}

/// Decode an `InitRcv` reply on the initiator side.
///
/// `ep_local` is the initiator's own ephemeral key; the derived secret is
/// the forward-secret session secret.
///
/// # Errors
///
/// Size, key, authentication or sequence-number failures.
pub fn decode_init_rcv(enc: &[u8], ep_local: &PrivateKey) -> Result<(PeerKeys, Message), Error> {
    check_min(enc, MIN_INIT_RCV_SIZE)?;

    let id = pub_key_at(enc, 0)?;
    let ep = pub_key_at(enc, 1)?;
    let ep_rollover = pub_key_at(enc, 2)?;

    let secret = ep_local.exchange(&ep)?;
    let split = HEADER_CONN_ID_SIZE + 3 * PUB_KEY_SIZE;
    let (sn, payload) = open_chained(false, &secret, &enc[..split], &enc[split..])?;
    if sn != 0 {
        return Err(Error::BadHandshakeSequence);
    }
    trace!(variant = "InitRcv", "handshake reply authenticated");

    Ok((
        PeerKeys {
            id: Some(id),
            ep,
            ep_rollover,
        },
        Message {
            msg_type: MsgType::InitRcv,
            sn,
            payload,
            shared_secret: Some(secret),
        },
    ))
}

/// Decode an `InitCryptoSnd` 0-RTT open on the responder side.
///
/// Opens the payload under `ECDH(id_local, ep_remote)` and strips the
/// filler; the returned secret is the forward-secret session secret
/// `ECDH(ep_local, ep_remote)`, not the one the payload was sealed under.
///
/// # Errors
///
/// Size, key, authentication, sequence-number or filler-layout failures.
pub fn decode_init_crypto_snd(
    enc: &[u8],
    id_local: &PrivateKey,
    ep_local: &PrivateKey,
) -> Result<(PeerKeys, Message), Error> {
    check_min(enc, MIN_INIT_CRYPTO_SND_SIZE)?;

    let id = pub_key_at(enc, 0)?;
    let ep = pub_key_at(enc, 1)?;
    let ep_rollover = pub_key_at(enc, 2)?;

    let no_pfs_secret = id_local.exchange(&ep)?;
    let split = HEADER_CONN_ID_SIZE + 3 * PUB_KEY_SIZE;
    let (sn, padded) = open_chained(true, &no_pfs_secret, &enc[..split], &enc[split..])?;
    if sn != 0 {
        return Err(Error::BadHandshakeSequence);
    }

    let fill_len = usize::from(wire::read_u16(&padded));
    let data_start = FILL_LEN_SIZE + fill_len;
    if data_start > padded.len() {
        return Err(Error::Payload(crate::error::PayloadError::TooShort {
            expected: data_start,
            actual: padded.len(),
        }));
    }
    let payload = padded[data_start..].to_vec();

    let secret = ep_local.exchange(&ep)?;
    trace!(variant = "InitCryptoSnd", "0-RTT open authenticated");

    Ok((
        PeerKeys {
            id: Some(id),
            ep,
            ep_rollover,
        },
        Message {
            msg_type: MsgType::InitCryptoSnd,
            sn,
            payload,
            shared_secret: Some(secret),
        },
    ))
}

/// Decode an `InitCryptoRcv` reply on the initiator side.
///
/// # Errors
///
/// Size, key, authentication or sequence-number failures.
pub fn decode_init_crypto_rcv(
    enc: &[u8],
    ep_local: &PrivateKey,
) -> Result<(PeerKeys, Message), Error> {
    check_min(enc, MIN_INIT_CRYPTO_RCV_SIZE)?;

    let ep = pub_key_at(enc, 0)?;
    let ep_rollover = pub_key_at(enc, 1)?;

    let secret = ep_local.exchange(&ep)?;
    let split = HEADER_CONN_ID_SIZE + 2 * PUB_KEY_SIZE;
    let (sn, payload) = open_chained(false, &secret, &enc[..split], &enc[split..])?;
    if sn != 0 {
        return Err(Error::BadHandshakeSequence);
    }
    trace!(variant = "InitCryptoRcv", "0-RTT reply authenticated");

    Ok((
        PeerKeys {
            id: None,
            ep,
            ep_rollover,
        },
        Message {
            msg_type: MsgType::InitCryptoRcv,
            sn,
            payload,
            shared_secret: Some(secret),
        },
    ))
}

/// Decode a `DataRot` epoch transition.
///
/// `ep_local` is the decoder's current ephemeral key; the wire carries the
/// peer's activated rollover key and the derived secret becomes the new
/// epoch secret. `local_is_initiator` is the decoder's own connection role.
///
/// # Errors
///
/// Size, key, authentication or sequence-number failures.
pub fn decode_data_rot(
    enc: &[u8],
    local_is_initiator: bool,
    ep_local: &PrivateKey,
) -> Result<(PublicKey, Message), Error> {
    check_min(enc, MIN_DATA_ROT_SIZE)?;

    let ep_rollover = pub_key_at(enc, 0)?;
    let epoch_secret = ep_local.exchange(&ep_rollover)?;

    let split = HEADER_CONN_ID_SIZE + PUB_KEY_SIZE;
    let (sn, payload) = open_chained(
        !local_is_initiator,
        &epoch_secret,
        &enc[..split],
        &enc[split..],
    )?;
    if sn != 0 {
        return Err(Error::BadHandshakeSequence);
    }
    trace!(variant = "DataRot", "epoch transition authenticated");

    Ok((
        ep_rollover,
        Message {
            msg_type: MsgType::DataRot,
            sn,
            payload,
            shared_secret: Some(epoch_secret),
        },
    ))
}

/// Decode a steady-state data datagram.
///
/// `local_is_initiator` is the decoder's own connection role; the secret is
/// the current epoch's session secret held by the caller.
///
/// # Errors
///
/// Size or authentication failures.
pub fn decode_data(
    enc: &[u8],
    local_is_initiator: bool,
    secret: &SharedSecret,
) -> Result<Message, Error> {
    check_min(enc, MIN_DATA_SIZE)?;

    let (sn, payload) = open_chained(
        !local_is_initiator,
        secret,
        &enc[..HEADER_CONN_ID_SIZE],
        &enc[HEADER_CONN_ID_SIZE..],
    )?;

    Ok(Message {
        msg_type: MsgType::Data,
        sn,
        payload,
        shared_secret: None,
    })
}

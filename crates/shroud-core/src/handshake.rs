//! Handshake state machine and per-connection key management.
//!
//! A [`Connection`] owns one side of a connection: role, handshake state,
//! the local identity key, the current ephemeral and pre-staged rollover
//! keypairs, whatever is known of the peer's keys, the session secret and
//! the outbound sequence counter.
//!
//! The dialer chooses between the plain open (no payload in the first
//! flight) and the 0-RTT open (payload sealed to the responder's identity
//! key, not forward secret). Either peer may later rotate keys: the
//! pre-staged rollover key is activated in a single datagram, a fresh one
//! is staged, and the epoch secret changes without an extra round trip.
//!
//! Connections are not thread-safe by design: the connection-id lookup in
//! the enclosing I/O loop is the synchronization point, and two datagrams
//! for the same connection must not be processed concurrently.

use rand_core::{CryptoRng, RngCore};
use shroud_crypto::{PrivateKey, PublicKey, SharedSecret};
use tracing::debug;

use crate::envelope::{
    decode_data, decode_data_rot, decode_header, decode_init_crypto_rcv, decode_init_crypto_snd,
    decode_init_rcv, decode_init_snd, encode_data, encode_data_rot, encode_init_crypto_rcv,
    encode_init_crypto_snd, encode_init_rcv, encode_init_snd, Message, MsgType,
};
use crate::error::Error;
use crate::wire;
use crate::CONN_ID_SIZE;

/// Which side of the connection this endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sent the first datagram.
    Initiator,
    /// Answered it.
    Responder,
}

/// Handshake progress for one side of a connection.
///
/// Both handshake shapes deliver the peer's ephemeral and rollover keys in
/// a single datagram, so establishment and rollover knowledge coincide:
/// `Established` always implies the peer's next-epoch key is on hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No handshake traffic yet.
    Idle,
    /// Dialer sent its first datagram and awaits the reply.
    InitSent,
    /// Session secret derived; steady-state traffic may flow.
    Established,
    /// At least one key rotation has been applied.
    Rotated,
}

/// Tunables for a connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Outbound packets under one epoch secret before [`Connection::should_rotate`]
    /// starts returning true.
    pub rekey_packet_limit: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            rekey_packet_limit: 1_000_000,
        }
    }
}

/// One side of a connection: keys, state and counters.
pub struct Connection {
    role: Role,
    state: HandshakeState,
    config: ConnectionConfig,
    id_local: PrivateKey,
    id_remote: Option<PublicKey>,
    ep_local: PrivateKey,
    ep_rollover_local: PrivateKey,
    ep_remote: Option<PublicKey>,
    ep_rollover_remote: Option<PublicKey>,
    secret: Option<SharedSecret>,
    sn_out: u64,
    epoch: u64,
}

impl Connection {
    /// Open a connection without payload in the first flight.
    ///
    /// Returns the connection in `InitSent` state and the `InitSnd`
    /// datagram to send.
    pub fn initiate<R: RngCore + CryptoRng>(id_local: PrivateKey, rng: &mut R) -> (Self, Vec<u8>) {
        let ep_local = PrivateKey::generate(rng);
        let ep_rollover_local = PrivateKey::generate(rng);
        let datagram = encode_init_snd(&id_local.public_key(), &ep_local, &ep_rollover_local);
        debug!(role = "initiator", "sent handshake knock");

        (
            Self {
                role: Role::Initiator,
                state: HandshakeState::InitSent,
                config: ConnectionConfig::default(),
                id_local,
                id_remote: None,
                ep_local,
                ep_rollover_local,
                ep_remote: None,
                ep_rollover_remote: None,
                secret: None,
                sn_out: 1,
                epoch: 0,
            },
            datagram,
        )
    }

    /// Open a connection with 0-RTT payload in the first flight.
    ///
    /// `id_remote` is the responder's long-term key the payload is sealed
    /// to; the payload is not forward secret and must be at least 8 bytes.
    ///
    /// # Errors
    ///
    /// Encoding failures ([`Error::PayloadTooLarge`], payload too short,
    /// key agreement).
    pub fn initiate_with_payload<R: RngCore + CryptoRng>(
        id_local: PrivateKey,
        id_remote: PublicKey,
        payload: &[u8],
        rng: &mut R,
    ) -> Result<(Self, Vec<u8>), Error> {
        let ep_local = PrivateKey::generate(rng);
        let ep_rollover_local = PrivateKey::generate(rng);
        let datagram = encode_init_crypto_snd(
            &id_remote,
            &id_local.public_key(),
            &ep_local,
            &ep_rollover_local,
            payload,
        )?;
        debug!(role = "initiator", "sent 0-RTT open");

        Ok((
            Self {
                role: Role::Initiator,
                state: HandshakeState::InitSent,
                config: ConnectionConfig::default(),
                id_local,
                id_remote: Some(id_remote),
                ep_local,
                ep_rollover_local,
                ep_remote: None,
                ep_rollover_remote: None,
                secret: None,
                sn_out: 1,
                epoch: 0,
            },
            datagram,
        ))
    }

    /// Accept a first datagram on the responder side.
    ///
    /// Handles `InitSnd` and `InitCryptoSnd`, derives the session secret,
    /// and produces the matching reply carrying `reply_payload` (at least
    /// 8 bytes). Returns the established connection, the reply datagram,
    /// and the decoded message (whose payload is the 0-RTT data, if any).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] for non-handshake variants, plus any decode
    /// or encode failure.
    pub fn accept<R: RngCore + CryptoRng>(
        id_local: PrivateKey,
        datagram: &[u8],
        reply_payload: &[u8],
        rng: &mut R,
    ) -> Result<(Self, Vec<u8>, Message), Error> {
        let (_, msg_type) = decode_header(datagram)?;
        let ep_local = PrivateKey::generate(rng);
        let ep_rollover_local = PrivateKey::generate(rng);

        let (peer, message, reply) = match msg_type {
            MsgType::InitSnd => {
                let (peer, message) = decode_init_snd(datagram, &ep_local)?;
                let reply = encode_init_rcv(
                    &id_local.public_key(),
                    &peer.ep,
                    &ep_local,
                    &ep_rollover_local,
                    reply_payload,
                )?;
                (peer, message, reply)
            }
            MsgType::InitCryptoSnd => {
                let (peer, message) = decode_init_crypto_snd(datagram, &id_local, &ep_local)?;
                let reply =
                    encode_init_crypto_rcv(&peer.ep, &ep_local, &ep_rollover_local, reply_payload)?;
                (peer, message, reply)
            }
            _ => return Err(Error::InvalidState),
        };

        debug!(role = "responder", ?msg_type, "connection established");
        Ok((
            Self {
                role: Role::Responder,
                state: HandshakeState::Established,
                config: ConnectionConfig::default(),
                id_local,
                id_remote: peer.id,
                ep_local,
                ep_rollover_local,
                ep_remote: Some(peer.ep),
                ep_rollover_remote: Some(peer.ep_rollover),
                secret: message.shared_secret.clone(),
                sn_out: 1,
                epoch: 0,
            },
            reply,
            message,
        ))
    }

    /// Process the responder's reply on the initiator side.
    ///
    /// Handles `InitRcv` and `InitCryptoRcv`; on success the connection is
    /// `Established` and the returned message carries the responder's first
    /// payload.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] outside `InitSent` or for other variants,
    /// plus any decode failure.
    pub fn on_reply(&mut self, datagram: &[u8]) -> Result<Message, Error> {
        if self.role != Role::Initiator || self.state != HandshakeState::InitSent {
            return Err(Error::InvalidState);
        }

        let (_, msg_type) = decode_header(datagram)?;
        let (peer, message) = match msg_type {
            MsgType::InitRcv => decode_init_rcv(datagram, &self.ep_local)?,
            MsgType::InitCryptoRcv => decode_init_crypto_rcv(datagram, &self.ep_local)?,
            _ => return Err(Error::InvalidState),
        };

        if let Some(id) = peer.id {
            self.id_remote = Some(id);
        }
        self.ep_remote = Some(peer.ep);
        self.ep_rollover_remote = Some(peer.ep_rollover);
        self.secret = message.shared_secret.clone();
        self.state = HandshakeState::Established;
        debug!(role = "initiator", ?msg_type, "connection established");
        Ok(message)
    }

    /// Seal a payload (at least 8 bytes) as a `Data` datagram and advance
    /// the outbound counter.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] before establishment; `SnOutOfRange` once
    /// the 48-bit counter is exhausted (rotate instead).
    pub fn send(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        let (secret, ep_remote) = self.session()?;
        let enc = encode_data(
            &self.ep_local.public_key(),
            &ep_remote,
            self.role == Role::Initiator,
            &secret,
            self.sn_out,
            payload,
        )?;
        self.sn_out += 1;
        Ok(enc)
    }

    /// Process a steady-state datagram: `Data` or an inbound `DataRot`.
    ///
    /// A rotation updates the epoch secret, the peer's ephemeral key and
    /// the connection id as a side effect.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] before establishment or for handshake
    /// variants, plus any decode failure.
    pub fn receive(&mut self, datagram: &[u8]) -> Result<Message, Error> {
        let (secret, _) = self.session()?;
        let (_, msg_type) = decode_header(datagram)?;

        match msg_type {
            MsgType::Data => decode_data(datagram, self.role == Role::Initiator, &secret),
            MsgType::DataRot => {
                let (peer_ep, message) =
                    decode_data_rot(datagram, self.role == Role::Initiator, &self.ep_local)?;
                self.ep_remote = Some(peer_ep);
                self.secret = message.shared_secret.clone();
                self.sn_out = 1;
                self.epoch += 1;
                self.state = HandshakeState::Rotated;
                debug!(epoch = self.epoch, "peer rotated keys");
                Ok(message)
            }
            _ => Err(Error::InvalidState),
        }
    }

    /// Rotate keys: activate the pre-staged rollover keypair, stage a fresh
    /// one, and seal `payload` (at least 8 bytes) as the epoch's `DataRot`
    /// datagram.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] before establishment, plus encode failures.
    pub fn rotate<R: RngCore + CryptoRng>(
        &mut self,
        payload: &[u8],
        rng: &mut R,
    ) -> Result<Vec<u8>, Error> {
        let (_, ep_remote) = self.session()?;
        let enc = encode_data_rot(
            &self.ep_local.public_key(),
            &ep_remote,
            self.role == Role::Initiator,
            &self.ep_rollover_local,
            payload,
        )?;

        self.secret = Some(self.ep_rollover_local.exchange(&ep_remote)?);
        self.ep_local = self.ep_rollover_local.clone();
        self.ep_rollover_local = PrivateKey::generate(rng);
        self.sn_out = 1;
        self.epoch += 1;
        self.state = HandshakeState::Rotated;
        debug!(epoch = self.epoch, "rotated keys");
        Ok(enc)
    }

    /// Whether the outbound counter has crossed the configured rekey
    /// threshold for this epoch.
    #[must_use]
    pub fn should_rotate(&self) -> bool {
        self.sn_out > self.config.rekey_packet_limit
    }

    /// Replace the connection tunables.
    pub fn set_config(&mut self, config: ConnectionConfig) {
        self.config = config;
    }

    /// This endpoint's role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current handshake state.
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Current key epoch, starting at 0.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Long-term identity key of the peer, once known.
    #[must_use]
    pub fn peer_identity(&self) -> Option<PublicKey> {
        self.id_remote
    }

    /// Own long-term identity public key.
    #[must_use]
    pub fn local_identity(&self) -> PublicKey {
        self.id_local.public_key()
    }

    /// The XOR-form connection id current `Data` datagrams carry, once both
    /// ephemeral keys are known.
    #[must_use]
    pub fn connection_id(&self) -> Option<u64> {
        let ep_remote = self.ep_remote.as_ref()?;
        let local = wire::read_u64(&self.ep_local.public_key().as_bytes()[..CONN_ID_SIZE]);
        let remote = wire::read_u64(&ep_remote.as_bytes()[..CONN_ID_SIZE]);
        Some(local ^ remote)
    }

    /// Peer's pre-staged rollover key, once known.
    #[must_use]
    pub fn peer_rollover(&self) -> Option<PublicKey> {
        self.ep_rollover_remote
    }

    fn session(&self) -> Result<(SharedSecret, PublicKey), Error> {
        if !matches!(
            self.state,
            HandshakeState::Established | HandshakeState::Rotated
        ) {
            return Err(Error::InvalidState);
        }
        match (&self.secret, self.ep_remote) {
            (Some(secret), Some(ep_remote)) => Ok((secret.clone(), ep_remote)),
            _ => Err(Error::InvalidState),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    fn identity(seed: u8) -> PrivateKey {
        let mut bytes = [seed; 32];
        bytes[0] = seed.wrapping_add(1);
        PrivateKey::from_bytes(bytes)
    }

    #[test]
    fn test_plain_handshake_and_data() {
        let (mut alice, knock) = Connection::initiate(identity(1), &mut OsRng);
        assert_eq!(alice.state(), HandshakeState::InitSent);

        let (mut bob, reply, first) =
            Connection::accept(identity(2), &knock, b"welcome!", &mut OsRng).unwrap();
        assert_eq!(bob.state(), HandshakeState::Established);
        assert!(first.payload.is_empty());
        assert_eq!(bob.peer_identity().unwrap(), identity(1).public_key());

        let msg = alice.on_reply(&reply).unwrap();
        assert_eq!(alice.state(), HandshakeState::Established);
        assert_eq!(msg.payload, b"welcome!");
        assert_eq!(alice.peer_identity().unwrap(), identity(2).public_key());

        assert_eq!(alice.connection_id(), bob.connection_id());

        let data = alice.send(b"hello bob").unwrap();
        let received = bob.receive(&data).unwrap();
        assert_eq!(received.payload, b"hello bob");
        assert_eq!(received.sn, 1);

        let data = bob.send(b"hello alice").unwrap();
        let received = alice.receive(&data).unwrap();
        assert_eq!(received.payload, b"hello alice");
    }

    #[test]
    fn test_zero_rtt_handshake() {
        let bob_id = identity(2);
        let (mut alice, open) = Connection::initiate_with_payload(
            identity(1),
            bob_id.public_key(),
            b"early data in first flight",
            &mut OsRng,
        )
        .unwrap();

        let (mut bob, reply, first) =
            Connection::accept(bob_id, &open, b"accepted", &mut OsRng).unwrap();
        assert_eq!(first.payload, b"early data in first flight");

        let msg = alice.on_reply(&reply).unwrap();
        assert_eq!(msg.payload, b"accepted");
        // No identity key on the crypto reply; it was pinned at dial time.
        assert_eq!(alice.peer_identity().unwrap(), identity(2).public_key());

        let data = bob.send(b"post-handshake").unwrap();
        assert_eq!(alice.receive(&data).unwrap().payload, b"post-handshake");
    }

    #[test]
    fn test_rotation_both_directions() {
        let (mut alice, knock) = Connection::initiate(identity(1), &mut OsRng);
        let (mut bob, reply, _) =
            Connection::accept(identity(2), &knock, b"welcome!", &mut OsRng).unwrap();
        alice.on_reply(&reply).unwrap();

        let old_conn_id = alice.connection_id().unwrap();

        // Initiator-driven rotation.
        let rot = alice.rotate(b"new epoch", &mut OsRng).unwrap();
        let msg = bob.receive(&rot).unwrap();
        assert_eq!(msg.msg_type, MsgType::DataRot);
        assert_eq!(msg.payload, b"new epoch");
        assert_eq!(alice.epoch(), 1);
        assert_eq!(bob.epoch(), 1);
        assert_eq!(alice.state(), HandshakeState::Rotated);
        assert_eq!(alice.connection_id(), bob.connection_id());
        assert_ne!(alice.connection_id().unwrap(), old_conn_id);

        // Data flows under the new epoch secret, counters reset.
        let data = alice.send(b"epoch 1 data").unwrap();
        let received = bob.receive(&data).unwrap();
        assert_eq!(received.payload, b"epoch 1 data");
        assert_eq!(received.sn, 1);

        // Responder-driven rotation on top.
        let rot = bob.rotate(b"epoch two!", &mut OsRng).unwrap();
        let msg = alice.receive(&rot).unwrap();
        assert_eq!(msg.payload, b"epoch two!");
        assert_eq!(alice.epoch(), 2);

        let data = bob.send(b"epoch 2 data").unwrap();
        assert_eq!(alice.receive(&data).unwrap().payload, b"epoch 2 data");
    }

    #[test]
    fn test_send_before_established_fails() {
        let (mut alice, _) = Connection::initiate(identity(1), &mut OsRng);
        assert!(matches!(
            alice.send(b"too early"),
            Err(Error::InvalidState)
        ));
    }

    #[test]
    fn test_reply_wrong_variant_rejected() {
        let (mut alice, knock) = Connection::initiate(identity(1), &mut OsRng);
        assert!(matches!(alice.on_reply(&knock), Err(Error::InvalidState)));
    }

    #[test]
    fn test_accept_rejects_data() {
        let (mut alice, knock) = Connection::initiate(identity(1), &mut OsRng);
        let (bob, reply, _) =
            Connection::accept(identity(2), &knock, b"welcome!", &mut OsRng).unwrap();
        alice.on_reply(&reply).unwrap();
        let data = alice.send(b"not a handshake").unwrap();
        assert!(matches!(
            Connection::accept(identity(3), &data, b"whatever", &mut OsRng),
            Err(Error::InvalidState)
        ));
        let _ = bob;
    }

    #[test]
    fn test_should_rotate_threshold() {
        let (mut alice, knock) = Connection::initiate(identity(1), &mut OsRng);
        let (_, reply, _) =
            Connection::accept(identity(2), &knock, b"welcome!", &mut OsRng).unwrap();
        alice.on_reply(&reply).unwrap();

        alice.set_config(ConnectionConfig {
            rekey_packet_limit: 2,
        });
        assert!(!alice.should_rotate());
        alice.send(b"packet 1").unwrap();
        alice.send(b"packet 2").unwrap();
        assert!(alice.should_rotate());
    }

    #[test]
    fn test_tampered_reply_dropped() {
        let (mut alice, knock) = Connection::initiate(identity(1), &mut OsRng);
        let (_, mut reply, _) =
            Connection::accept(identity(2), &knock, b"welcome!", &mut OsRng).unwrap();
        let last = reply.len() - 1;
        reply[last] ^= 0x40;
        assert!(alice.on_reply(&reply).is_err());
        // Still waiting for a valid reply.
        assert_eq!(alice.state(), HandshakeState::InitSent);
    }
}

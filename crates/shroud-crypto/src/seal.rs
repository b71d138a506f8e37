//! The chained AEAD envelope.
//!
//! A sealed datagram is `header || enc_sn || ciphertext`:
//!
//! 1. The payload is sealed with ChaCha20-Poly1305 under a deterministic
//!    nonce built from the 48-bit sequence number, with the full wire
//!    header (variant byte, connection id, any public keys) as associated
//!    data.
//! 2. The first 24 ciphertext bytes then serve as an XChaCha20-Poly1305
//!    nonce under the same key to encrypt the 6-byte sequence number; only
//!    the ciphertext half survives, the tag is discarded. The outer AEAD
//!    already authenticates everything, so the sequence number needs
//!    confidentiality only.
//!
//! The deterministic nonce places the little-endian sequence number in the
//! first half when the packet sender is the connection initiator and in the
//! second half otherwise, which is what lets both directions share a single
//! secret without nonce collisions.

use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::XChaCha20;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce, XChaCha20Poly1305, XNonce};

use crate::{
    CryptoError, SharedSecret, MAC_SIZE, MIN_PAYLOAD_SIZE, NONCE_SIZE, SN_SIZE, XNONCE_SIZE,
};

/// Largest encodable sequence number (48 bits).
pub const SN_MAX: u64 = (1 << (SN_SIZE * 8)) - 1;

/// Build the deterministic payload nonce for a sequence number.
///
/// The initiator-to-responder direction occupies the first six bytes, the
/// reverse direction the last six; the remainder stays zero.
fn det_nonce(sn: u64, sender_is_initiator: bool) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    let offset = if sender_is_initiator { 0 } else { SN_SIZE };
    nonce[offset..offset + SN_SIZE].copy_from_slice(&sn.to_le_bytes()[..SN_SIZE]);
    nonce
}

/// Seal `plaintext` under `secret`, authenticating `header` as AAD.
///
/// Returns the full datagram `header || enc_sn || ciphertext`.
/// `sender_is_initiator` is the connection role of the party sending this
/// packet.
///
/// # Errors
///
/// - [`CryptoError::PayloadTooShort`] if `plaintext` is under 8 bytes
/// - [`CryptoError::SnOutOfRange`] if `sn` does not fit in 48 bits
pub fn seal_chained(
    sn: u64,
    sender_is_initiator: bool,
    secret: &SharedSecret,
    header: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if plaintext.len() < MIN_PAYLOAD_SIZE {
        return Err(CryptoError::PayloadTooShort);
    }
    if sn > SN_MAX {
        return Err(CryptoError::SnOutOfRange);
    }

    let key = Key::from_slice(secret.as_bytes());
    let nonce = det_nonce(sn, sender_is_initiator);
    let ciphertext = ChaCha20Poly1305::new(key)
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: header,
            },
        )
        .map_err(|_| CryptoError::Seal)?;

    // MIN_PAYLOAD_SIZE plus the tag guarantees these 24 bytes exist.
    let sn_nonce = XNonce::from_slice(&ciphertext[..XNONCE_SIZE]);
    let enc_sn = XChaCha20Poly1305::new(key)
        .encrypt(
            sn_nonce,
            Payload {
                msg: &sn.to_le_bytes()[..SN_SIZE],
                aad: &[],
            },
        )
        .map_err(|_| CryptoError::Seal)?;

    let mut out = Vec::with_capacity(header.len() + SN_SIZE + ciphertext.len());
    out.extend_from_slice(header);
    out.extend_from_slice(&enc_sn[..SN_SIZE]);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open the `enc_sn || ciphertext` part of a datagram.
///
/// `header` is the associated-data prefix that was authenticated at seal
/// time; `sender_is_initiator` is the connection role of the party that
/// sent the packet. Returns the recovered sequence number and plaintext.
///
/// # Errors
///
/// - [`CryptoError::CiphertextTooShort`] if `enc` cannot hold an encrypted
///   sequence number plus a minimum sealed payload
/// - [`CryptoError::AeadAuthentication`] if the tag check fails
pub fn open_chained(
    sender_is_initiator: bool,
    secret: &SharedSecret,
    header: &[u8],
    enc: &[u8],
) -> Result<(u64, Vec<u8>), CryptoError> {
    let min = SN_SIZE + MIN_PAYLOAD_SIZE + MAC_SIZE;
    if enc.len() < min {
        return Err(CryptoError::CiphertextTooShort {
            expected: min,
            actual: enc.len(),
        });
    }

    let (enc_sn, ciphertext) = enc.split_at(SN_SIZE);
    let mut sn_ser = [0u8; SN_SIZE];
    sn_ser.copy_from_slice(enc_sn);

    let mut sn_nonce = [0u8; XNONCE_SIZE];
    sn_nonce.copy_from_slice(&ciphertext[..XNONCE_SIZE]);
    keystream_xor(secret, &sn_nonce, &mut sn_ser);

    let mut sn_bytes = [0u8; 8];
    sn_bytes[..SN_SIZE].copy_from_slice(&sn_ser);
    let sn = u64::from_le_bytes(sn_bytes);

    let nonce = det_nonce(sn, sender_is_initiator);
    let plaintext = ChaCha20Poly1305::new(Key::from_slice(secret.as_bytes()))
        .decrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: ciphertext,
                aad: header,
            },
        )
        .map_err(|_| CryptoError::AeadAuthentication)?;

    Ok((sn, plaintext))
}

/// XOR `buf` with the XChaCha20 keystream, block counter pre-set to 1.
///
/// An XChaCha20-Poly1305 sealer spends counter block 0 on the Poly1305 key,
/// so the ciphertext stream starts at block 1; this recovers the sequence
/// number without running the (discarded) tag check.
fn keystream_xor(secret: &SharedSecret, nonce: &[u8; XNONCE_SIZE], buf: &mut [u8]) {
    let mut cipher = XChaCha20::new(secret.as_bytes().into(), nonce.into());
    cipher.seek(64u64);
    cipher.apply_keystream(buf);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> SharedSecret {
        SharedSecret::from_bytes([7u8; 32])
    }

    #[test]
    fn test_seal_open_round_trip() {
        let header = [0x05u8, 1, 2, 3, 4, 5, 6, 7, 8];
        let sealed = seal_chained(42, true, &secret(), &header, b"hello world").unwrap();
        assert_eq!(&sealed[..header.len()], &header);

        let (sn, plaintext) =
            open_chained(true, &secret(), &header, &sealed[header.len()..]).unwrap();
        assert_eq!(sn, 42);
        assert_eq!(plaintext, b"hello world");
    }

    #[test]
    fn test_direction_mismatch_fails() {
        let header = [0u8; 9];
        let sealed = seal_chained(9, true, &secret(), &header, b"directional").unwrap();
        assert!(matches!(
            open_chained(false, &secret(), &header, &sealed[header.len()..]),
            Err(CryptoError::AeadAuthentication)
        ));
    }

    #[test]
    fn test_sn_hidden_on_wire() {
        let header = [0u8; 9];
        let sealed = seal_chained(1, true, &secret(), &header, b"payload1").unwrap();
        let enc_sn = &sealed[header.len()..header.len() + SN_SIZE];
        assert_ne!(enc_sn, &1u64.to_le_bytes()[..SN_SIZE]);
    }

    #[test]
    fn test_header_is_authenticated() {
        let header = [0x05u8, 1, 2, 3, 4, 5, 6, 7, 8];
        let sealed = seal_chained(3, false, &secret(), &header, b"aad test").unwrap();

        let mut tampered = header;
        tampered[4] ^= 0x01;
        assert!(matches!(
            open_chained(false, &secret(), &tampered, &sealed[header.len()..]),
            Err(CryptoError::AeadAuthentication)
        ));
    }

    #[test]
    fn test_tampered_enc_sn_fails() {
        let header = [0u8; 9];
        let sealed = seal_chained(500, true, &secret(), &header, b"sn tamper").unwrap();

        let mut enc = sealed[header.len()..].to_vec();
        enc[0] ^= 0x80;
        assert!(open_chained(true, &secret(), &header, &enc).is_err());
    }

    #[test]
    fn test_payload_minimum_enforced() {
        assert!(matches!(
            seal_chained(0, true, &secret(), &[], b"short"),
            Err(CryptoError::PayloadTooShort)
        ));
    }

    #[test]
    fn test_sn_range_enforced() {
        assert!(matches!(
            seal_chained(1 << 48, true, &secret(), &[], b"12345678"),
            Err(CryptoError::SnOutOfRange)
        ));
        assert!(seal_chained(SN_MAX, true, &secret(), &[], b"12345678").is_ok());
    }

    #[test]
    fn test_det_nonce_directions_disjoint() {
        let a = det_nonce(0x0000_0000_0001, true);
        let b = det_nonce(0x0000_0000_0001, false);
        assert_ne!(a, b);
        assert_eq!(&a[SN_SIZE..], &[0u8; SN_SIZE]);
        assert_eq!(&b[..SN_SIZE], &[0u8; SN_SIZE]);
    }
}

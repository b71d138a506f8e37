//! X25519 Diffie-Hellman key exchange (RFC 7748).
//!
//! Every key the transport handles is a plain X25519 keypair: the long-term
//! identity key, the per-epoch ephemeral, and the pre-staged rollover
//! ephemeral. Exchange rejects the all-zero shared secret produced by
//! low-order peer points.

use core::fmt;

use rand_core::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{CryptoError, PUB_KEY_SIZE};

/// X25519 private key (32 bytes).
#[derive(Clone)]
pub struct PrivateKey(x25519_dalek::StaticSecret);

/// X25519 public key (32 bytes, little-endian curve encoding).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(x25519_dalek::PublicKey);

/// Raw 32-byte shared secret, fed directly to the AEAD layer.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl PrivateKey {
    /// Generate a new random private key with RFC 7748 clamping.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(x25519_dalek::StaticSecret::random_from_rng(&mut *rng))
    }

    /// Derive the public key for this private key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0))
    }

    /// Perform Diffie-Hellman key exchange with a peer public key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyAgreement`] if the exchange yields the
    /// all-zero secret (low-order peer point).
    pub fn exchange(&self, peer: &PublicKey) -> Result<SharedSecret, CryptoError> {
        let shared = self.0.diffie_hellman(&peer.0);
        if shared.as_bytes() == &[0u8; 32] {
            return Err(CryptoError::KeyAgreement);
        }
        Ok(SharedSecret(*shared.as_bytes()))
    }

    /// Import from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::StaticSecret::from(bytes))
    }

    /// Export as raw bytes. The result contains live key material.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}

impl PublicKey {
    /// Import from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    /// Import from a byte slice, which must be exactly 32 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::BadPublicKey`] on any other length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; PUB_KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::BadPublicKey)?;
        Ok(Self::from_bytes(arr))
    }

    /// Parse the user-facing hex form, with or without the `0x` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::BadPublicKey`] on malformed hex or wrong length.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| CryptoError::BadPublicKey)?;
        Self::from_slice(&bytes)
    }

    /// The user-facing hex form, `0x`-prefixed.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0.as_bytes()))
    }

    /// Export as raw bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        *self.0.as_bytes()
    }

    /// Borrow the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl SharedSecret {
    /// Wrap raw secret bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw secret, used directly as the AEAD key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn test_key_generation() {
        let private = PrivateKey::generate(&mut OsRng);
        let public = private.public_key();
        assert_ne!(public.to_bytes(), [0u8; 32]);
    }

    #[test]
    fn test_key_exchange_agrees() {
        let alice = PrivateKey::generate(&mut OsRng);
        let bob = PrivateKey::generate(&mut OsRng);

        let shared_alice = alice.exchange(&bob.public_key()).unwrap();
        let shared_bob = bob.exchange(&alice.public_key()).unwrap();
        assert_eq!(shared_alice.as_bytes(), shared_bob.as_bytes());
    }

    #[test]
    fn test_low_order_point_rejected() {
        let private = PrivateKey::generate(&mut OsRng);
        let identity = PublicKey::from_bytes([0u8; 32]);
        assert!(matches!(
            private.exchange(&identity),
            Err(CryptoError::KeyAgreement)
        ));
    }

    #[test]
    fn test_hex_round_trip() {
        let public = PrivateKey::generate(&mut OsRng).public_key();
        let parsed = PublicKey::from_hex(&public.to_hex()).unwrap();
        assert_eq!(public, parsed);
    }

    #[test]
    fn test_hex_rejects_garbage() {
        assert!(PublicKey::from_hex("0xzz").is_err());
        assert!(PublicKey::from_hex("0x0011").is_err());
    }
}

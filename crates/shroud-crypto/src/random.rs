//! Randomness for key material.
//!
//! Identity, ephemeral and rollover keypairs are the only protocol
//! consumers of entropy, and all of it comes from the operating system
//! CSPRNG. The host contract is "uniform bytes, never fails in practice";
//! a refusal surfaces as [`CryptoError::RandomFailed`] and aborts whatever
//! key operation needed it.

use crate::{CryptoError, KEY_SIZE};

/// Draw `buf.len()` bytes from the OS CSPRNG.
///
/// # Errors
///
/// [`CryptoError::RandomFailed`] when the host refuses entropy.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    getrandom::getrandom(buf).map_err(|_| CryptoError::RandomFailed)
}

/// Draw one key-sized block — the seed shape every X25519 keypair and
/// rollover stage starts from.
///
/// # Errors
///
/// [`CryptoError::RandomFailed`] when the host refuses entropy.
pub fn random_32() -> Result<[u8; KEY_SIZE], CryptoError> {
    let mut seed = [0u8; KEY_SIZE];
    fill_random(&mut seed)?;
    Ok(seed)
}

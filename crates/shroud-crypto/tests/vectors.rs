//! Known-answer tests against published vectors.

use shroud_crypto::{PrivateKey, PublicKey};

fn unhex(s: &str) -> [u8; 32] {
    let v = hex::decode(s).unwrap();
    v.try_into().unwrap()
}

/// RFC 7748 §6.1 Diffie-Hellman vector.
#[test]
fn rfc7748_x25519_vector() {
    let alice_private = PrivateKey::from_bytes(unhex(
        "77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a",
    ));
    let bob_private = PrivateKey::from_bytes(unhex(
        "5dab087e624a8a4b79e17f8b83800ee66f3bb1292618b6fd1c2f8b27ff88e0eb",
    ));

    let alice_public = unhex("8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a");
    let bob_public = unhex("de9edb7d7b7dc1b4d35b61c2ece435373f8343c85b78674dadfc7e146f882b4f");
    assert_eq!(alice_private.public_key().to_bytes(), alice_public);
    assert_eq!(bob_private.public_key().to_bytes(), bob_public);

    let expected = unhex("4a5d9d5ba4ce2de1728e3bf480350f25e07e21c947d19e3376f09b3c1e161742");
    let shared_alice = alice_private
        .exchange(&PublicKey::from_bytes(bob_public))
        .unwrap();
    let shared_bob = bob_private
        .exchange(&PublicKey::from_bytes(alice_public))
        .unwrap();
    assert_eq!(shared_alice.as_bytes(), &expected);
    assert_eq!(shared_bob.as_bytes(), &expected);
}

use once_cell::sync::Lazy;
use secp256k1::ecdsa::Signature;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};

use crate::hash::sha256;

/// Shared verification/signing context. Context creation is expensive; the
/// secp256k1 crate recommends reusing one for the process lifetime.
static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Sign `message` with deterministic (RFC 6979) ECDSA over the SHA-256
/// digest. Returns the 64-byte compact signature as lowercase hex.
pub fn sign(secret: &SecretKey, message: &[u8]) -> String {
    let digest = sha256(message);
    let msg = Message::from_digest(*digest.as_bytes());
    let sig = SECP.sign_ecdsa(&msg, secret);
    hex::encode(sig.serialize_compact())
}

/// Verify a compact hex signature by `public_key_hex` (compressed, hex) over
/// `message`. Any parse failure verifies false.
pub fn verify(public_key_hex: &str, message: &[u8], signature_hex: &str) -> bool {
    let Ok(pk_bytes) = hex::decode(public_key_hex) else {
        return false;
    };
    let Ok(pk) = PublicKey::from_slice(&pk_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(sig) = Signature::from_compact(&sig_bytes) else {
        return false;
    };
    let digest = sha256(message);
    let msg = Message::from_digest(*digest.as_bytes());
    SECP.verify_ecdsa(&msg, &sig, &pk).is_ok()
}

pub(crate) fn context() -> &'static Secp256k1<All> {
    &SECP
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let (sk, pk) = SECP.generate_keypair(&mut rand::thread_rng());
        let pk_hex = hex::encode(pk.serialize());
        let sig = sign(&sk, b"ledger message");
        assert!(verify(&pk_hex, b"ledger message", &sig));
        assert!(!verify(&pk_hex, b"other message", &sig));
    }

    #[test]
    fn signing_is_deterministic() {
        let (sk, _) = SECP.generate_keypair(&mut rand::thread_rng());
        assert_eq!(sign(&sk, b"m"), sign(&sk, b"m"));
    }

    #[test]
    fn garbage_inputs_verify_false() {
        assert!(!verify("zz", b"m", "00"));
        assert!(!verify(&"02".repeat(33), b"m", "not-hex"));
    }
}

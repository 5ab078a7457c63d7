//! xai-crypto — secp256k1 identities, ECDSA signing, SHA-256 hashing,
//! address derivation, and the PoW target check.

pub mod ecdsa;
pub mod hash;
pub mod keypair;
pub mod pow;

pub use ecdsa::{sign, verify};
pub use hash::{merkle_root, sha256, txid_from_preimage};
pub use keypair::{address_from_pubkey, pubkey_controls_address, KeyPair};
pub use pow::hash_meets_difficulty;

use secp256k1::{PublicKey, SecretKey};
use sha3::{Digest, Keccak256};

use xai_core::address::Address;
use xai_core::config::NetworkType;
use xai_core::error::XaiError;

use crate::ecdsa;

/// An XAI signing identity: secp256k1 keypair plus the derived,
/// checksummed address for one network.
pub struct KeyPair {
    secret_key: SecretKey,
    pub public_key: PublicKey,
    pub address: Address,
}

impl KeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate(network: NetworkType) -> Self {
        let (secret_key, public_key) = ecdsa::context().generate_keypair(&mut rand::thread_rng());
        let address = address_from_pubkey(&public_key, network);
        Self {
            secret_key,
            public_key,
            address,
        }
    }

    /// Restore a keypair from a 32-byte secret key in hex (e.g. a wallet file).
    pub fn from_secret_hex(secret_hex: &str, network: NetworkType) -> Result<Self, XaiError> {
        let bytes = hex::decode(secret_hex)
            .map_err(|e| XaiError::MalformedEncoding(format!("secret key hex: {e}")))?;
        let secret_key = SecretKey::from_slice(&bytes)
            .map_err(|e| XaiError::MalformedEncoding(format!("secret key: {e}")))?;
        let public_key = secret_key.public_key(ecdsa::context());
        let address = address_from_pubkey(&public_key, network);
        Ok(Self {
            secret_key,
            public_key,
            address,
        })
    }

    /// Compressed public key as lowercase hex (the wire form).
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Sign `message` (RFC 6979 deterministic); returns compact hex.
    pub fn sign(&self, message: &[u8]) -> String {
        ecdsa::sign(&self.secret_key, message)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ address: {} }}", self.address)
    }
}

/// Derive the account address: network prefix + checksummed hex of the last
/// 20 bytes of Keccak-256 over the compressed public key.
pub fn address_from_pubkey(public_key: &PublicKey, network: NetworkType) -> Address {
    let digest = Keccak256::digest(public_key.serialize());
    let mut payload = [0u8; 20];
    payload.copy_from_slice(&digest[12..]);
    Address::from_payload(network.address_prefix(), &payload)
}

/// True when the hex-encoded compressed public key derives `address` on
/// either network. Unparseable keys control nothing.
pub fn pubkey_controls_address(public_key_hex: &str, address: &Address) -> bool {
    let Ok(bytes) = hex::decode(public_key_hex) else {
        return false;
    };
    let Ok(pk) = PublicKey::from_slice(&bytes) else {
        return false;
    };
    let network = if address.as_str().starts_with("TXAI") {
        NetworkType::Testnet
    } else {
        NetworkType::Mainnet
    };
    address_from_pubkey(&pk, network) == *address
}

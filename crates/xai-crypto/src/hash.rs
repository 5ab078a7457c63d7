use sha2::{Digest, Sha256};
use xai_core::types::{Hash256, TxId};

/// SHA-256 of arbitrary bytes.
pub fn sha256(data: &[u8]) -> Hash256 {
    Hash256::from_bytes(Sha256::digest(data).into())
}

/// Derive a TxId from the canonical signing bytes of a transaction.
pub fn txid_from_preimage(preimage_bytes: &[u8]) -> TxId {
    sha256(preimage_bytes)
}

/// Merkle root over transaction ids: SHA-256 of concatenated child digests,
/// duplicating the last node at odd levels. The empty tree hashes the empty
/// byte string.
pub fn merkle_root(txids: &[TxId]) -> Hash256 {
    if txids.is_empty() {
        return sha256(b"");
    }
    let mut level: Vec<Hash256> = txids.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = *pair.last().unwrap();
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(left.as_bytes());
            buf[32..].copy_from_slice(right.as_bytes());
            next.push(sha256(&buf));
        }
        level = next;
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u8) -> Hash256 {
        Hash256::from_bytes([n; 32])
    }

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            sha256(b"").to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn merkle_single_leaf_hashes_pair_of_itself() {
        // One leaf is its own root only after the tree collapses; with a
        // single element the root is the element itself.
        assert_eq!(merkle_root(&[h(1)]), h(1));
    }

    #[test]
    fn merkle_duplicates_odd_tail() {
        let three = merkle_root(&[h(1), h(2), h(3)]);
        let padded = merkle_root(&[h(1), h(2), h(3), h(3)]);
        assert_eq!(three, padded);
    }

    #[test]
    fn merkle_is_order_sensitive() {
        assert_ne!(merkle_root(&[h(1), h(2)]), merkle_root(&[h(2), h(1)]));
    }

    #[test]
    fn merkle_empty_is_defined() {
        assert_eq!(merkle_root(&[]), sha256(b""));
    }
}

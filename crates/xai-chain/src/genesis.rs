use std::collections::BTreeMap;

use xai_core::address::Address;
use xai_core::amount::Amount;
use xai_core::block::{Block, BlockHeader};
use xai_core::config::NetworkType;
use xai_core::constants::{BLOCK_HEADER_VERSION, GENESIS_TIMESTAMP};
use xai_core::transaction::{Transaction, TxKind};
use xai_core::types::Hash256;
use xai_crypto::{merkle_root, sha256, txid_from_preimage};

/// Deterministic genesis block for a network. Carries a single zero-value
/// coinbase; all supply is issued by mining. Genesis is a trusted constant:
/// it is exempt from PoW, header-signature, and coinbase-amount rules.
pub fn genesis_block(network: NetworkType) -> Block {
    let mut metadata = BTreeMap::new();
    metadata.insert("network".to_string(), format!("{network:?}").to_lowercase());
    metadata.insert(
        "message".to_string(),
        "the ledger remembers what the market forgets".to_string(),
    );

    let mut coinbase = Transaction {
        txid: Hash256::zero(),
        sender: Address::coinbase(),
        recipient: Address::coinbase(),
        amount: Amount::ZERO,
        fee: Amount::ZERO,
        public_key: None,
        signature: None,
        kind: TxKind::Coinbase,
        nonce: None,
        inputs: vec![],
        outputs: vec![],
        rbf_enabled: false,
        replaces_txid: None,
        timestamp: GENESIS_TIMESTAMP,
        metadata,
    };
    coinbase.txid = txid_from_preimage(
        &coinbase
            .signing_bytes()
            .expect("genesis coinbase always serializes"),
    );

    let mut header = BlockHeader {
        index: 0,
        previous_hash: Hash256::zero(),
        merkle_root: merkle_root(&[coinbase.txid]),
        timestamp: GENESIS_TIMESTAMP,
        difficulty: 1,
        nonce: 0,
        version: BLOCK_HEADER_VERSION,
        miner_pubkey: String::new(),
        signature: String::new(),
        hash: Hash256::zero(),
    };
    header.hash = sha256(
        &header
            .pow_bytes()
            .expect("genesis header always serializes"),
    );

    Block {
        header,
        transactions: vec![coinbase],
    }
}

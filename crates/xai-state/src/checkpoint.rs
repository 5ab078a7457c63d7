use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use xai_core::amount::Amount;
use xai_core::codec;
use xai_core::error::XaiError;
use xai_core::transaction::TxOutput;
use xai_core::types::{BlockHash, Hash256, Height};

use crate::utxo::OutPoint;

/// Durable record of a confirmed block, used to refuse deep reorganizations
/// and to verify state after recovery. Immutable once written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub height: Height,
    pub block_hash: BlockHash,
    /// SHA-256 over the canonical encoding of the sorted live UTXO entries.
    pub utxo_digest: Hash256,
    pub total_supply: Amount,
}

/// Digest of a sorted UTXO entry listing, as stored in checkpoints.
pub fn utxo_digest(entries: &[(OutPoint, TxOutput)]) -> Result<Hash256, XaiError> {
    Ok(xai_crypto::hash::sha256(&codec::canonical_bytes(&entries)?))
}

/// One file per checkpoint, keyed by height, under `checkpoints/`.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn open(data_dir: &Path) -> Result<Self, XaiError> {
        let dir = data_dir.join("checkpoints");
        fs::create_dir_all(&dir)
            .map_err(|e| XaiError::StorageFailure(format!("creating {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    fn path(&self, height: Height) -> PathBuf {
        self.dir.join(format!("{height}.ckpt"))
    }

    /// Persist a checkpoint. An existing file at the same height is left
    /// untouched — checkpoints never change once written.
    pub fn write(&self, checkpoint: &Checkpoint) -> Result<(), XaiError> {
        let path = self.path(checkpoint.height);
        if path.exists() {
            return Ok(());
        }
        let bytes = bincode::serialize(checkpoint)
            .map_err(|e| XaiError::StorageFailure(format!("encoding checkpoint: {e}")))?;
        fs::write(&path, bytes)
            .map_err(|e| XaiError::StorageFailure(format!("writing {}: {e}", path.display())))?;
        info!(height = checkpoint.height, hash = %checkpoint.block_hash, "checkpoint written");
        Ok(())
    }

    pub fn read(&self, height: Height) -> Result<Option<Checkpoint>, XaiError> {
        let path = self.path(height);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(XaiError::StorageFailure(format!(
                    "reading {}: {e}",
                    path.display()
                )))
            }
        };
        let checkpoint = bincode::deserialize(&bytes)
            .map_err(|e| XaiError::StorageFailure(format!("decoding {}: {e}", path.display())))?;
        Ok(Some(checkpoint))
    }

    /// The newest trusted checkpoint, if any.
    pub fn read_latest(&self) -> Result<Option<Checkpoint>, XaiError> {
        let mut best: Option<Height> = None;
        let iter = fs::read_dir(&self.dir)
            .map_err(|e| XaiError::StorageFailure(format!("listing {}: {e}", self.dir.display())))?;
        for entry in iter {
            let entry =
                entry.map_err(|e| XaiError::StorageFailure(format!("listing entry: {e}")))?;
            let name = entry.file_name();
            let Some(height) = name
                .to_str()
                .and_then(|n| n.strip_suffix(".ckpt"))
                .and_then(|n| n.parse::<Height>().ok())
            else {
                continue;
            };
            best = Some(best.map_or(height, |b| b.max(height)));
        }
        match best {
            Some(h) => self.read(h),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xai_core::address::Address;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("xai_checkpoint_test_{name}"));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn checkpoint(height: Height) -> Checkpoint {
        Checkpoint {
            height,
            block_hash: Hash256::from_bytes([height as u8; 32]),
            utxo_digest: Hash256::zero(),
            total_supply: Amount::from_xai(50),
        }
    }

    #[test]
    fn write_read_latest() {
        let store = CheckpointStore::open(&temp_dir("latest")).unwrap();
        assert!(store.read_latest().unwrap().is_none());

        store.write(&checkpoint(1000)).unwrap();
        store.write(&checkpoint(2000)).unwrap();
        store.write(&checkpoint(500)).unwrap();

        let latest = store.read_latest().unwrap().unwrap();
        assert_eq!(latest.height, 2000);
    }

    #[test]
    fn existing_checkpoint_is_immutable() {
        let store = CheckpointStore::open(&temp_dir("immutable")).unwrap();
        store.write(&checkpoint(100)).unwrap();

        let mut altered = checkpoint(100);
        altered.total_supply = Amount::from_xai(999);
        store.write(&altered).unwrap();

        assert_eq!(store.read(100).unwrap().unwrap(), checkpoint(100));
    }

    #[test]
    fn digest_tracks_entry_changes() {
        let addr = Address::parse(&format!("XAI{}", "ab".repeat(20))).unwrap();
        let entries = vec![(
            OutPoint::new(Hash256::zero(), 0),
            TxOutput {
                address: addr.clone(),
                amount: Amount::from_xai(1),
            },
        )];
        let d1 = utxo_digest(&entries).unwrap();
        let entries2 = vec![(
            OutPoint::new(Hash256::zero(), 1),
            TxOutput {
                address: addr,
                amount: Amount::from_xai(1),
            },
        )];
        assert_ne!(d1, utxo_digest(&entries2).unwrap());
    }
}

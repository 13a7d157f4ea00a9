use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::transformation::Delivered;

/// Human-readable copy of committed blocks.
///
/// Every transaction of block `h` gets its own directory
/// `b<h>/<i>-<reference>/`, where `i` is its position in the block, holding
/// the binary `request` and `response` plus `request.json` and
/// `response.json`. The archive is write-only: the store never reads it
/// back. It follows the latest commit: a block committed at a height that is
/// already archived, on another branch after a checkout, replaces the older
/// block's directory.
#[derive(Clone, Debug)]
pub struct BlockArchive {
    root: PathBuf,
}

impl BlockArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of block `height`.
    pub fn block_dir(&self, height: u64) -> PathBuf {
        self.root.join(format!("b{height}"))
    }

    pub(crate) fn write_block(&self, height: u64, transactions: &[&Delivered]) -> StoreResult<()> {
        let block_dir = self.block_dir(height);
        if block_dir.exists() {
            debug!(height, dir = %block_dir.display(), "replacing archived block of another branch");
            fs::remove_dir_all(&block_dir)?;
        }
        for (position, delivered) in transactions.iter().enumerate() {
            let dir = block_dir.join(format!("{position}-{}", delivered.reference));
            fs::create_dir_all(&dir)?;
            write_pair(&dir, "request", &delivered.request)?;
            write_pair(&dir, "response", &delivered.response)?;
        }
        debug!(height, transactions = transactions.len(), dir = %block_dir.display(), "block archived");
        Ok(())
    }
}

fn write_pair<T: Serialize>(dir: &Path, name: &str, value: &T) -> StoreResult<()> {
    let binary = bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    fs::write(dir.join(name), binary)?;
    let text =
        serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    fs::write(dir.join(format!("{name}.json")), text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::StoreConfig;
    use crate::store::Store;
    use crate::testing::{Script, ScriptedProcessor};
    use keel_types::{Timestamp, TransactionRequest, TransactionResponse};

    #[test]
    fn committed_block_is_archived() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::on_disk(dir.path());
        let base = Store::open(&config, Arc::new(ScriptedProcessor::new())).unwrap();

        let first = Script::noop(1);
        let second = Script::create("k", b"v");
        let mut tx = base.begin_transformation(Timestamp::from_millis(5));
        tx.deliver_transaction(&first).unwrap();
        tx.deliver_transaction(&second).unwrap();
        tx.deliver_reward_transaction(&["me".to_string()], &[]).unwrap();
        tx.commit().unwrap();

        let archive = BlockArchive::new(config.archive_dir().unwrap());
        let block = archive.block_dir(1);
        let entry = block.join(format!("1-{}", second.reference()));

        let request: TransactionRequest =
            bincode::deserialize(&fs::read(entry.join("request")).unwrap()).unwrap();
        assert_eq!(request, second);
        let response: TransactionResponse =
            serde_json::from_slice(&fs::read(entry.join("response.json")).unwrap()).unwrap();
        assert!(response.is_success());

        // Two transactions plus the reward.
        assert_eq!(fs::read_dir(&block).unwrap().count(), 3);
        assert!(block.join(format!("0-{}", first.reference())).is_dir());
    }

    #[test]
    fn block_from_another_branch_replaces_archived_block() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::on_disk(dir.path());
        let genesis = Store::open(&config, Arc::new(ScriptedProcessor::new())).unwrap();

        let mut tx = genesis.begin_transformation(Timestamp::from_millis(1));
        tx.deliver_transaction(&Script::noop(1)).unwrap();
        tx.deliver_transaction(&Script::noop(2)).unwrap();
        let first = tx.commit().unwrap();

        let back = first.checkout(&genesis.state_id()).unwrap();
        let replacement = Script::noop(3);
        let mut tx = back.begin_transformation(Timestamp::from_millis(2));
        tx.deliver_transaction(&replacement).unwrap();
        tx.commit().unwrap();

        let block = BlockArchive::new(config.archive_dir().unwrap()).block_dir(1);
        let entries: Vec<_> = fs::read_dir(&block)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec![format!("0-{}", replacement.reference())]);
    }

    #[test]
    fn in_memory_store_has_no_archive() {
        let config = StoreConfig::in_memory();
        assert!(config.archive_dir().is_none());
    }
}

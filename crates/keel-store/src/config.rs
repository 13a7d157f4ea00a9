use std::path::{Path, PathBuf};

use keel_trie::SyncMode;
use serde::{Deserialize, Serialize};

/// Where and how the store keeps its data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the node log and `HEAD`. `None` keeps everything in
    /// memory.
    pub dir: Option<PathBuf>,
    /// Write a human-readable copy of every committed block under
    /// `<dir>/blocks`. Ignored for in-memory stores.
    pub archive: bool,
    /// Flush strategy of the node log.
    pub sync: SyncMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: None,
            archive: false,
            sync: SyncMode::EveryBatch,
        }
    }
}

impl StoreConfig {
    /// A store that lives only in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A durable store rooted at `dir`, with the block archive enabled.
    pub fn on_disk(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            archive: true,
            ..Self::default()
        }
    }

    pub fn nodes_path(&self) -> Option<PathBuf> {
        self.dir.as_deref().map(|dir| dir.join("nodes.log"))
    }

    pub fn head_path(&self) -> Option<PathBuf> {
        self.dir.as_deref().map(|dir| dir.join("HEAD"))
    }

    pub fn archive_dir(&self) -> Option<PathBuf> {
        match (&self.dir, self.archive) {
            (Some(dir), true) => Some(Path::new(dir).join("blocks")),
            _ => None,
        }
    }
}

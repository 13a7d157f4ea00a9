use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::info;

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::processor::TransactionProcessor;
use crate::state::StateId;
use crate::store::Store;

/// The current snapshot of a store.
///
/// The handle is the only mutable piece of shared state: [`Self::publish`]
/// swaps in a newly committed snapshot atomically, and every later call to
/// [`Self::current`] sees it. Readers holding an older `Arc<Store>` keep a
/// consistent view of the snapshot they started with.
///
/// For durable stores the id of the current snapshot is also written to
/// `<dir>/HEAD`, so a reopened store resumes where it stopped.
pub struct StoreHandle {
    current: RwLock<Arc<Store>>,
    head_path: Option<PathBuf>,
}

impl StoreHandle {
    /// Open the store described by `config`, resuming from `HEAD` if present.
    pub fn open(config: &StoreConfig, processor: Arc<dyn TransactionProcessor>) -> StoreResult<Self> {
        let genesis = Store::open(config, processor)?;
        let head_path = config.head_path();
        let store = match &head_path {
            Some(path) if path.exists() => {
                let id = read_head(path)?;
                genesis.checkout(&id)?
            }
            _ => genesis,
        };
        info!(
            state = %store.state_id(),
            height = store.height(),
            durable = head_path.is_some(),
            "store opened"
        );
        Ok(Self {
            current: RwLock::new(Arc::new(store)),
            head_path,
        })
    }

    /// Wrap an already opened store. Nothing is persisted on publish.
    pub fn new(store: Store) -> Self {
        Self {
            current: RwLock::new(Arc::new(store)),
            head_path: None,
        }
    }

    /// The latest published snapshot.
    pub fn current(&self) -> Arc<Store> {
        self.current.read().expect("lock poisoned").clone()
    }

    /// Make `store` the current snapshot.
    pub fn publish(&self, store: Store) -> StoreResult<()> {
        let mut current = self.current.write().expect("lock poisoned");
        self.install(&mut current, store)
    }

    /// Make `store` the current snapshot only if the current one is still
    /// `expected`.
    ///
    /// A block built on a snapshot that has since been replaced, for example
    /// by a checkout, fails with [`StoreError::HeadMoved`] and leaves both the
    /// current snapshot and `HEAD` untouched.
    pub fn publish_if(&self, expected: &StateId, store: Store) -> StoreResult<()> {
        let mut current = self.current.write().expect("lock poisoned");
        let actual = current.state_id();
        if actual != *expected {
            return Err(StoreError::HeadMoved {
                expected: *expected,
                actual,
            });
        }
        self.install(&mut current, store)
    }

    fn install(&self, current: &mut Arc<Store>, store: Store) -> StoreResult<()> {
        if let Some(path) = &self.head_path {
            write_head(path, &store.state_id())?;
        }
        *current = Arc::new(store);
        Ok(())
    }

    /// Repoint the current snapshot to the committed snapshot `id`.
    pub fn checkout(&self, id: &StateId) -> StoreResult<Arc<Store>> {
        let store = self.current().checkout(id)?;
        let height = store.height();
        self.publish(store)?;
        info!(state = %id, height, "checked out snapshot");
        Ok(self.current())
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("current", &self.current().state_id())
            .field("head_path", &self.head_path)
            .finish()
    }
}

fn read_head(path: &Path) -> StoreResult<StateId> {
    let text = fs::read_to_string(path)?;
    StateId::from_hex(&text).map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))
}

/// Replace `HEAD` atomically: write a sibling file, then rename over it.
fn write_head(path: &Path, id: &StateId) -> StoreResult<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, format!("{id}\n"))?;
    fs::rename(&tmp, path)?;
    Ok(())
}

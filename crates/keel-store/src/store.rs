use std::collections::BTreeMap;
use std::sync::Arc;

use keel_trie::{InMemoryNodeStore, LogNodeStore, NodeStore};
use keel_types::{
    StorageReference, Timestamp, TransactionReference, TransactionRequest, TransactionResponse,
};
use tracing::debug;

use crate::archive::BlockArchive;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::processor::{guarded, ProcessorError, TransactionProcessor};
use crate::state::{StateId, StateRecord};
use crate::transformation::StoreTransformation;
use crate::tries::Tries;
use crate::view::StoreView;

/// Shared by every snapshot of one store.
pub(crate) struct StoreContext {
    pub nodes: Arc<dyn NodeStore>,
    pub processor: Arc<dyn TransactionProcessor>,
    pub archive: Option<BlockArchive>,
}

/// An immutable snapshot of the transaction store.
///
/// A `Store` maps transaction references to their request and response,
/// objects to their histories, and holds the optional manifest. Snapshots of
/// one lineage share trie nodes, and cloning a `Store` is cheap. New
/// snapshots are produced only by [`StoreTransformation::commit`]; any
/// committed snapshot can be reopened with [`Store::checkout`].
#[derive(Clone)]
pub struct Store {
    ctx: Arc<StoreContext>,
    record: StateRecord,
    id: StateId,
}

impl Store {
    /// Open the backing node store described by `config` and return the
    /// empty snapshot of it.
    ///
    /// Use [`crate::StoreHandle::open`] to resume from the last published
    /// snapshot instead.
    pub fn open(config: &StoreConfig, processor: Arc<dyn TransactionProcessor>) -> StoreResult<Self> {
        let nodes: Arc<dyn NodeStore> = match config.nodes_path() {
            Some(path) => Arc::new(LogNodeStore::open(&path, config.sync)?),
            None => Arc::new(InMemoryNodeStore::new()),
        };
        let archive = config.archive_dir().map(BlockArchive::new);
        Self::with_nodes(nodes, processor, archive)
    }

    /// An in-memory store with no archive.
    pub fn in_memory(processor: Arc<dyn TransactionProcessor>) -> StoreResult<Self> {
        Self::with_nodes(Arc::new(InMemoryNodeStore::new()), processor, None)
    }

    fn with_nodes(
        nodes: Arc<dyn NodeStore>,
        processor: Arc<dyn TransactionProcessor>,
        archive: Option<BlockArchive>,
    ) -> StoreResult<Self> {
        let record = StateRecord::genesis();
        let bytes = record.encode()?;
        let id = StateRecord::id_of(&bytes);
        nodes.write_batch(&[(*id.hash(), bytes)])?;
        Ok(Self {
            ctx: Arc::new(StoreContext {
                nodes,
                processor,
                archive,
            }),
            record,
            id,
        })
    }

    pub(crate) fn from_parts(ctx: Arc<StoreContext>, record: StateRecord, id: StateId) -> Self {
        Self { ctx, record, id }
    }

    pub(crate) fn context(&self) -> &Arc<StoreContext> {
        &self.ctx
    }

    pub(crate) fn tries(&self) -> Tries {
        Tries::open(&self.ctx.nodes, &self.record)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Identifier of this snapshot.
    pub fn state_id(&self) -> StateId {
        self.id
    }

    /// The snapshot this one was committed on top of.
    pub fn parent(&self) -> Option<StateId> {
        self.record.parent
    }

    /// Number of blocks committed in this lineage.
    pub fn height(&self) -> u64 {
        self.record.height
    }

    /// Block time of the last committed block.
    pub fn now(&self) -> Timestamp {
        self.record.now
    }

    pub fn get_request(&self, reference: &TransactionReference) -> StoreResult<TransactionRequest> {
        self.tries()
            .request(reference)?
            .ok_or(StoreError::UnknownReference(*reference))
    }

    pub fn get_response(
        &self,
        reference: &TransactionReference,
    ) -> StoreResult<TransactionResponse> {
        self.tries()
            .response(reference)?
            .ok_or(StoreError::UnknownReference(*reference))
    }

    /// Transactions that updated `object`, oldest first.
    pub fn get_history(&self, object: &StorageReference) -> StoreResult<Vec<TransactionReference>> {
        self.tries().history(object)
    }

    pub fn get_manifest(&self) -> Option<StorageReference> {
        self.record.manifest
    }

    /// Returns `true` if `reference` was delivered in this lineage.
    pub fn contains(&self, reference: &TransactionReference) -> StoreResult<bool> {
        self.tries().contains_request(reference)
    }

    /// Current field values of `object`.
    pub fn get_object_state(
        &self,
        object: &StorageReference,
    ) -> StoreResult<BTreeMap<String, Vec<u8>>> {
        self.object_state(object)
    }

    // -----------------------------------------------------------------------
    // Versioning
    // -----------------------------------------------------------------------

    /// Reopen the committed snapshot with the given id.
    ///
    /// Any snapshot ever committed to the same node store can be reached,
    /// whether or not it is an ancestor of `self`.
    pub fn checkout(&self, id: &StateId) -> StoreResult<Store> {
        if *id == self.id {
            return Ok(self.clone());
        }
        let bytes = self
            .ctx
            .nodes
            .read(id.hash())?
            .ok_or(StoreError::UnknownRoot(*id))?;
        let record = StateRecord::decode(id, &bytes)?;
        debug!(state = %id, height = record.height, "snapshot checked out");
        Ok(Self::from_parts(self.ctx.clone(), record, *id))
    }

    /// Open a transformation on top of this snapshot. Every transaction
    /// delivered to it observes `now` as the block time.
    pub fn begin_transformation(&self, now: Timestamp) -> StoreTransformation {
        StoreTransformation::new(self.clone(), now)
    }

    /// Run the processor's admission check against this snapshot.
    ///
    /// Requests already delivered in this lineage are rejected here, before
    /// they reach a transformation.
    pub fn check_transaction(&self, request: &TransactionRequest) -> StoreResult<()> {
        let reference = request.reference();
        if self.contains(&reference)? {
            return Err(StoreError::Rejected(format!(
                "transaction {} already delivered",
                reference.short_hex()
            )));
        }
        match guarded(|| self.ctx.processor.check(request, self)) {
            Ok(()) => Ok(()),
            Err(ProcessorError::Rejected(reason)) | Err(ProcessorError::Failed(reason)) => {
                Err(StoreError::Rejected(reason))
            }
        }
    }
}

impl StoreView for Store {
    fn request(&self, reference: &TransactionReference) -> StoreResult<Option<TransactionRequest>> {
        self.tries().request(reference)
    }

    fn response(
        &self,
        reference: &TransactionReference,
    ) -> StoreResult<Option<TransactionResponse>> {
        self.tries().response(reference)
    }

    fn history(&self, object: &StorageReference) -> StoreResult<Vec<TransactionReference>> {
        self.tries().history(object)
    }

    fn manifest(&self) -> Option<StorageReference> {
        self.record.manifest
    }

    fn height(&self) -> u64 {
        self.record.height
    }

    fn now(&self) -> Timestamp {
        self.record.now
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("state", &self.id)
            .field("height", &self.record.height)
            .field("manifest", &self.record.manifest)
            .finish()
    }
}


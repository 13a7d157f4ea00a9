use std::collections::BTreeMap;
use std::sync::Arc;

use keel_mempool::{Mempool, Outcome, Ticket};
use keel_store::{StateId, Store, StoreError, StoreHandle, TransactionProcessor};
use keel_types::{
    StorageReference, TransactionReference, TransactionRequest, TransactionResponse,
};
use tracing::info;

use crate::config::NodeConfig;
use crate::error::{NodeError, NodeResult};

/// A single-process node: one store, one mempool feeding it.
///
/// Submissions go through the mempool; queries always read the latest
/// published snapshot.
pub struct LocalNode {
    head: Arc<StoreHandle>,
    mempool: Mempool,
    config: NodeConfig,
}

impl LocalNode {
    /// Open the store and start the mempool. Must be called inside a tokio
    /// runtime.
    pub fn start(config: NodeConfig, processor: Arc<dyn TransactionProcessor>) -> NodeResult<Self> {
        config.mempool.validate()?;
        let head = Arc::new(StoreHandle::open(&config.store, processor)?);
        let mempool = Mempool::start(Arc::clone(&head), config.mempool.clone())?;
        info!(
            node = %config.mempool.node_id,
            state = %head.current().state_id(),
            height = head.current().height(),
            "node started"
        );
        Ok(Self {
            head,
            mempool,
            config,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Queue `request`; see [`Mempool::add`].
    pub fn add(&self, request: TransactionRequest) -> NodeResult<Ticket> {
        Ok(self.mempool.add(request)?)
    }

    /// Queue `request` and wait for its outcome.
    pub async fn submit(&self, request: TransactionRequest) -> NodeResult<Outcome> {
        let ticket = self.add(request)?;
        Ok(ticket.outcome().await)
    }

    /// The latest published snapshot.
    pub fn store(&self) -> Arc<Store> {
        self.head.current()
    }

    pub fn state_id(&self) -> StateId {
        self.store().state_id()
    }

    pub fn height(&self) -> u64 {
        self.store().height()
    }

    pub fn get_request(&self, reference: &TransactionReference) -> NodeResult<TransactionRequest> {
        Ok(self.store().get_request(reference)?)
    }

    /// The committed response for `reference`.
    ///
    /// A request that is not in the store but was recently rejected fails
    /// with [`NodeError::Rejected`] and the reason, so it can be told apart
    /// from one that is still pending.
    pub fn get_response(
        &self,
        reference: &TransactionReference,
    ) -> NodeResult<TransactionResponse> {
        match self.store().get_response(reference) {
            Ok(response) => Ok(response),
            Err(StoreError::UnknownReference(r)) => match self.mempool.rejection(reference) {
                Some(reason) => Err(NodeError::Rejected(reason)),
                None => Err(StoreError::UnknownReference(r).into()),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Poll the outcome of a request by reference: `Delivered` once
    /// committed, `Rejected` if recently rejected, `None` otherwise.
    pub fn poll_outcome(&self, reference: &TransactionReference) -> NodeResult<Option<Outcome>> {
        match self.get_response(reference) {
            Ok(response) => Ok(Some(Outcome::Delivered(response))),
            Err(NodeError::Rejected(reason)) => Ok(Some(Outcome::Rejected(reason))),
            Err(NodeError::Store(StoreError::UnknownReference(_))) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn get_history(&self, object: &StorageReference) -> NodeResult<Vec<TransactionReference>> {
        Ok(self.store().get_history(object)?)
    }

    pub fn get_manifest(&self) -> Option<StorageReference> {
        self.store().get_manifest()
    }

    pub fn get_object_state(
        &self,
        object: &StorageReference,
    ) -> NodeResult<BTreeMap<String, Vec<u8>>> {
        Ok(self.store().get_object_state(object)?)
    }

    /// Repoint the node to an earlier snapshot. The next block builds on it.
    pub fn checkout(&self, id: &StateId) -> NodeResult<Arc<Store>> {
        Ok(self.head.checkout(id)?)
    }

    /// Drain the mempool and commit the last open block.
    pub async fn shutdown(&self) -> NodeResult<()> {
        self.mempool.shutdown().await?;
        info!(state = %self.state_id(), height = self.height(), "node stopped");
        Ok(())
    }
}

impl std::fmt::Debug for LocalNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNode")
            .field("head", &self.head)
            .field("mempool", &self.mempool)
            .finish()
    }
}

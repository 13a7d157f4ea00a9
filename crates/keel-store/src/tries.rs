use std::sync::Arc;

use keel_trie::{MerklePatriciaTrie, NodeStore};
use keel_types::{
    Hash, StorageReference, TransactionReference, TransactionRequest, TransactionResponse,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StoreError, StoreResult};
use crate::state::StateRecord;

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Corrupt(e.to_string()))
}

/// New roots of the three tries after a batch of inserts.
pub(crate) struct Roots {
    pub requests: Option<Hash>,
    pub responses: Option<Hash>,
    pub histories: Option<Hash>,
}

/// The three tries of one snapshot, with typed access.
pub(crate) struct Tries {
    requests: MerklePatriciaTrie,
    responses: MerklePatriciaTrie,
    histories: MerklePatriciaTrie,
}

impl Tries {
    pub fn open(nodes: &Arc<dyn NodeStore>, record: &StateRecord) -> Self {
        Self {
            requests: MerklePatriciaTrie::open(nodes.clone(), record.requests),
            responses: MerklePatriciaTrie::open(nodes.clone(), record.responses),
            histories: MerklePatriciaTrie::open(nodes.clone(), record.histories),
        }
    }

    pub fn request(&self, reference: &TransactionReference) -> StoreResult<Option<TransactionRequest>> {
        self.requests
            .get(reference.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn contains_request(&self, reference: &TransactionReference) -> StoreResult<bool> {
        Ok(self.requests.contains_key(reference.as_bytes())?)
    }

    pub fn response(
        &self,
        reference: &TransactionReference,
    ) -> StoreResult<Option<TransactionResponse>> {
        self.responses
            .get(reference.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn history(&self, object: &StorageReference) -> StoreResult<Vec<TransactionReference>> {
        Ok(self
            .histories
            .get(&object.to_key_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()?
            .unwrap_or_default())
    }

    pub fn put_transaction(
        &mut self,
        reference: &TransactionReference,
        request: &TransactionRequest,
        response: &TransactionResponse,
    ) -> StoreResult<()> {
        self.requests.insert(reference.as_bytes(), encode(request)?)?;
        self.responses.insert(reference.as_bytes(), encode(response)?)?;
        Ok(())
    }

    pub fn put_history(
        &mut self,
        object: &StorageReference,
        history: &[TransactionReference],
    ) -> StoreResult<()> {
        self.histories.insert(&object.to_key_bytes(), encode(&history)?)?;
        Ok(())
    }

    /// New roots plus every node that must be written for them.
    pub fn into_batch(self) -> (Roots, Vec<(Hash, Vec<u8>)>) {
        let (requests, mut batch) = self.requests.into_batch();
        let (responses, more) = self.responses.into_batch();
        batch.extend(more);
        let (histories, more) = self.histories.into_batch();
        batch.extend(more);
        (
            Roots {
                requests,
                responses,
                histories,
            },
            batch,
        )
    }
}

use std::collections::BTreeMap;

use keel_types::{
    StorageReference, Timestamp, TransactionReference, TransactionRequest, TransactionResponse,
};

use crate::error::{StoreError, StoreResult};

/// Read access to a store, committed or pending.
///
/// Implemented by [`crate::Store`] for committed snapshots and by
/// [`crate::StoreTransformation`] for the pending state of an open block.
pub trait StoreView {
    fn request(&self, reference: &TransactionReference) -> StoreResult<Option<TransactionRequest>>;

    fn response(
        &self,
        reference: &TransactionReference,
    ) -> StoreResult<Option<TransactionResponse>>;

    /// Transactions that updated `object`, oldest first. Empty if the object
    /// was never updated.
    fn history(&self, object: &StorageReference) -> StoreResult<Vec<TransactionReference>>;

    fn manifest(&self) -> Option<StorageReference>;

    /// Number of committed blocks below this view.
    fn height(&self) -> u64;

    /// Block time. Constant for every transaction of a block.
    fn now(&self) -> Timestamp;

    /// Current field values of `object`, rebuilt from its history. The most
    /// recent update of each field wins.
    fn object_state(&self, object: &StorageReference) -> StoreResult<BTreeMap<String, Vec<u8>>> {
        let mut fields = BTreeMap::new();
        for reference in self.history(object)?.iter().rev() {
            let response = self.response(reference)?.ok_or_else(|| {
                StoreError::Corrupt(format!("history of {object} names missing {reference}"))
            })?;
            for update in response.updates.iter().rev() {
                if update.object == *object && !fields.contains_key(&update.field) {
                    fields.insert(update.field.clone(), update.value.clone());
                }
            }
        }
        Ok(fields)
    }
}

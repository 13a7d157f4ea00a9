use serde::{Deserialize, Serialize};

use crate::reference::StorageReference;

/// Whether the processor executed a transaction successfully.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Success,
    /// The transaction was executed and recorded, but failed. Its updates,
    /// if any, still apply (e.g. resource charges).
    Failed { reason: String },
}

/// A single field update reported by the processor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    /// The object whose field changed.
    pub object: StorageReference,
    /// Field name, opaque to the store.
    pub field: String,
    /// New value, opaque to the store.
    pub value: Vec<u8>,
}

/// An opaque transaction response.
///
/// Besides the processor's payload, the response carries the structural
/// fields the store needs: the field updates that drive object histories, an
/// optional manifest designation, and consumed resource units that feed
/// reward accounting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub status: Status,
    pub updates: Vec<Update>,
    /// Set by the initialization transaction that designates the manifest.
    pub manifest: Option<StorageReference>,
    /// Resource units consumed executing the transaction.
    pub consumed: u64,
    pub payload: Vec<u8>,
}

impl TransactionResponse {
    /// A successful response with no effects.
    pub fn success() -> Self {
        Self {
            status: Status::Success,
            updates: Vec::new(),
            manifest: None,
            consumed: 0,
            payload: Vec::new(),
        }
    }

    /// A failed response with no effects.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: Status::Failed {
                reason: reason.into(),
            },
            ..Self::success()
        }
    }

    /// Add a field update.
    pub fn with_update(
        mut self,
        object: StorageReference,
        field: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        self.updates.push(Update {
            object,
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Designate `object` as the store's manifest.
    pub fn with_manifest(mut self, object: StorageReference) -> Self {
        self.manifest = Some(object);
        self
    }

    pub fn with_consumed(mut self, consumed: u64) -> Self {
        self.consumed = consumed;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Returns `true` if the transaction succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self.status, Status::Success)
    }

    /// Distinct objects updated by this response, in first-update order.
    pub fn touched(&self) -> Vec<StorageReference> {
        let mut touched: Vec<StorageReference> = Vec::new();
        for update in &self.updates {
            if !touched.contains(&update.object) {
                touched.push(update.object);
            }
        }
        touched
    }
}

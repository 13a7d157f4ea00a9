//! A scripted [`TransactionProcessor`] for tests.
//!
//! Request payloads are JSON-encoded [`Script`]s describing what the
//! transaction should do. Enabled for other crates by the `test-utils`
//! feature.

use std::sync::Mutex;

use keel_types::{
    RewardDetails, StorageReference, TransactionReference, TransactionRequest,
    TransactionResponse,
};
use serde::{Deserialize, Serialize};

use crate::processor::{ProcessorError, TransactionProcessor};
use crate::view::StoreView;

/// What a scripted request does when delivered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Script {
    /// Create object `#0` of this transaction with the given fields.
    Create { fields: Vec<(String, Vec<u8>)> },
    /// Set a field of an existing object.
    Set {
        object: StorageReference,
        field: String,
        value: Vec<u8>,
    },
    /// Create object `#0` and designate it as the manifest.
    Initialize,
    /// No effects; `tag` keeps requests distinct.
    Noop { tag: u64 },
    /// Rejected by the check.
    Invalid,
    /// Passes the check, rejected on delivery.
    RejectOnDeliver,
    /// Passes the check, fails during delivery.
    Fail,
    /// Passes the check, panics during delivery.
    Panic,
    /// Panics during the check.
    PanicOnCheck,
}

impl Script {
    /// Encode the script as a standard request.
    pub fn request(&self) -> TransactionRequest {
        TransactionRequest::standard(serde_json::to_vec(self).expect("script serializes"))
    }

    /// Shorthand for a distinct no-effect request.
    pub fn noop(tag: u64) -> TransactionRequest {
        Script::Noop { tag }.request()
    }

    /// Shorthand for creating an object with a single field.
    pub fn create(field: &str, value: &[u8]) -> TransactionRequest {
        Script::Create {
            fields: vec![(field.to_string(), value.to_vec())],
        }
        .request()
    }

    /// Shorthand for setting a field of an existing object.
    pub fn set(object: StorageReference, field: &str, value: &[u8]) -> TransactionRequest {
        Script::Set {
            object,
            field: field.to_string(),
            value: value.to_vec(),
        }
        .request()
    }

    fn parse(request: &TransactionRequest) -> Result<Self, ProcessorError> {
        serde_json::from_slice(&request.payload)
            .map_err(|e| ProcessorError::Rejected(format!("malformed payload: {e}")))
    }
}

/// The object created by a `Create` or `Initialize` request.
pub fn created_by(request: &TransactionRequest) -> StorageReference {
    StorageReference::new(request.reference(), 0)
}

/// Executes [`Script`] payloads and records what it saw.
pub struct ScriptedProcessor {
    consumed_per_transaction: u64,
    reject_rewards: bool,
    rewards: Mutex<Vec<RewardDetails>>,
    deliveries: Mutex<Vec<TransactionReference>>,
}

impl ScriptedProcessor {
    pub fn new() -> Self {
        Self {
            consumed_per_transaction: 10,
            reject_rewards: false,
            rewards: Mutex::new(Vec::new()),
            deliveries: Mutex::new(Vec::new()),
        }
    }

    /// A processor that refuses every reward transaction.
    pub fn rejecting_rewards() -> Self {
        Self {
            reject_rewards: true,
            ..Self::new()
        }
    }

    /// Reward details seen so far, in delivery order.
    pub fn rewards(&self) -> Vec<RewardDetails> {
        self.rewards.lock().expect("lock poisoned").clone()
    }

    /// Standard requests executed so far, in delivery order, including
    /// those later rejected by the store.
    pub fn deliveries(&self) -> Vec<TransactionReference> {
        self.deliveries.lock().expect("lock poisoned").clone()
    }
}

impl Default for ScriptedProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionProcessor for ScriptedProcessor {
    fn check(
        &self,
        request: &TransactionRequest,
        _view: &dyn StoreView,
    ) -> Result<(), ProcessorError> {
        if request.is_reward() {
            return Ok(());
        }
        match Script::parse(request)? {
            Script::Invalid => Err(ProcessorError::Rejected("invalid request".into())),
            Script::PanicOnCheck => panic!("check exploded"),
            _ => Ok(()),
        }
    }

    fn deliver(
        &self,
        request: &TransactionRequest,
        view: &dyn StoreView,
    ) -> Result<TransactionResponse, ProcessorError> {
        if request.is_reward() {
            if self.reject_rewards {
                return Err(ProcessorError::Rejected("reward refused".into()));
            }
            let details = request
                .reward_details()
                .map_err(|e| ProcessorError::Failed(e.to_string()))?
                .ok_or_else(|| ProcessorError::Failed("missing reward details".into()))?;
            self.rewards.lock().expect("lock poisoned").push(details);
            return Ok(TransactionResponse::success());
        }

        let reference = request.reference();
        self.deliveries
            .lock()
            .expect("lock poisoned")
            .push(reference);
        let consumed = self.consumed_per_transaction;

        match Script::parse(request)? {
            Script::Create { fields } => {
                let object = StorageReference::new(reference, 0);
                let mut response = TransactionResponse::success().with_consumed(consumed);
                for (field, value) in fields {
                    response = response.with_update(object, field, value);
                }
                Ok(response)
            }
            Script::Set {
                object,
                field,
                value,
            } => {
                let history = view
                    .history(&object)
                    .map_err(|e| ProcessorError::Failed(e.to_string()))?;
                if history.is_empty() {
                    return Err(ProcessorError::Rejected(format!("unknown object {object}")));
                }
                Ok(TransactionResponse::success()
                    .with_consumed(consumed)
                    .with_update(object, field, value))
            }
            Script::Initialize => {
                if view.manifest().is_some() {
                    return Err(ProcessorError::Rejected("already initialized".into()));
                }
                let object = StorageReference::new(reference, 0);
                Ok(TransactionResponse::success()
                    .with_consumed(consumed)
                    .with_update(object, "initialized", vec![1])
                    .with_manifest(object))
            }
            Script::Noop { tag } => Ok(TransactionResponse::success()
                .with_consumed(consumed)
                .with_payload(tag.to_le_bytes().to_vec())),
            Script::Invalid => Err(ProcessorError::Rejected("invalid request".into())),
            Script::RejectOnDeliver => Err(ProcessorError::Rejected("refused at delivery".into())),
            Script::Fail => Err(ProcessorError::Failed("execution failed".into())),
            Script::Panic => panic!("delivery exploded"),
            Script::PanicOnCheck => Ok(TransactionResponse::success().with_consumed(consumed)),
        }
    }
}

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use keel_types::{TransactionRequest, TransactionResponse};
use tracing::error;

use crate::view::StoreView;

/// How the processor refused or failed a request.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProcessorError {
    /// The request is invalid. Nothing is recorded for it.
    #[error("rejected: {0}")]
    Rejected(String),
    /// Execution failed unexpectedly. A failed response is recorded for this
    /// transaction only.
    #[error("failed: {0}")]
    Failed(String),
}

/// The external capability that decides whether a request is valid and what
/// it changes.
///
/// The store never interprets payloads itself. `check` is the cheap
/// admission test run against the latest committed snapshot; `deliver`
/// executes the request against a transformation's pending view, which
/// already reflects every earlier delivery of the same block.
pub trait TransactionProcessor: Send + Sync {
    fn check(&self, request: &TransactionRequest, view: &dyn StoreView)
        -> Result<(), ProcessorError>;

    fn deliver(
        &self,
        request: &TransactionRequest,
        view: &dyn StoreView,
    ) -> Result<TransactionResponse, ProcessorError>;
}

/// Run one processor call, turning a panic into [`ProcessorError::Failed`].
///
/// The processor is external code; a panic in it must not unwind through the
/// store or the worker that drives it.
pub(crate) fn guarded<T>(
    call: impl FnOnce() -> Result<T, ProcessorError>,
) -> Result<T, ProcessorError> {
    panic::catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        error!(%message, "transaction processor panicked");
        Err(ProcessorError::Failed(format!("processor panicked: {message}")))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

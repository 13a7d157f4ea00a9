use keel_types::{TransactionReference, TransactionResponse};
use tokio::sync::oneshot;

/// Final result of a submitted request. Reported exactly once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The request's block was committed and published; the response is
    /// queryable in the current store.
    Delivered(TransactionResponse),
    /// The request was refused by the check or the deliver stage. Terminal.
    Rejected(String),
    /// The pipeline stopped before the request's block could be committed.
    Aborted(String),
}

impl Outcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Outcome::Delivered(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Outcome::Rejected(_))
    }

    /// The response, for delivered requests.
    pub fn response(&self) -> Option<&TransactionResponse> {
        match self {
            Outcome::Delivered(response) => Some(response),
            _ => None,
        }
    }
}

/// Handle to the eventual [`Outcome`] of a submitted request.
#[derive(Debug)]
pub struct Ticket {
    reference: TransactionReference,
    receiver: oneshot::Receiver<Outcome>,
}

impl Ticket {
    pub(crate) fn new(reference: TransactionReference, receiver: oneshot::Receiver<Outcome>) -> Self {
        Self {
            reference,
            receiver,
        }
    }

    /// Reference of the submitted request.
    pub fn reference(&self) -> TransactionReference {
        self.reference
    }

    /// Wait for the request to leave the pipeline.
    pub async fn outcome(self) -> Outcome {
        self.receiver
            .await
            .unwrap_or_else(|_| Outcome::Aborted("mempool stopped before the request completed".into()))
    }
}

//! The two pipeline stages. Each runs as a single tokio task, so requests
//! leave a stage in the order they entered it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use keel_store::{StoreError, StoreHandle, StoreTransformation};
use keel_types::{Timestamp, TransactionReference, TransactionRequest, TransactionResponse};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::MempoolConfig;
use crate::error::{MempoolError, MempoolResult};
use crate::outcome::Outcome;
use crate::rejections::RecentRejections;

/// A request travelling through the pipeline with its reply channel.
pub(crate) struct Submission {
    pub reference: TransactionReference,
    pub request: TransactionRequest,
    pub reply: oneshot::Sender<Outcome>,
}

impl Submission {
    fn reply(self, outcome: Outcome) {
        // The submitter may have dropped its ticket.
        let _ = self.reply.send(outcome);
    }
}

/// Validate admitted requests against the latest published snapshot and
/// forward the valid ones to the deliver stage.
pub(crate) async fn check_stage(
    mut input: mpsc::Receiver<Submission>,
    output: mpsc::Sender<Submission>,
    head: Arc<StoreHandle>,
    rejections: Arc<RecentRejections>,
    halted: Arc<AtomicBool>,
) {
    while let Some(submission) = input.recv().await {
        match head.current().check_transaction(&submission.request) {
            Ok(()) => {
                if let Err(mpsc::error::SendError(submission)) = output.send(submission).await {
                    // Nothing can be delivered any more; refuse further admissions.
                    halted.store(true, Ordering::Release);
                    submission.reply(Outcome::Aborted("deliver stage stopped".into()));
                    break;
                }
            }
            Err(e) => {
                let reason = match e {
                    StoreError::Rejected(reason) => reason,
                    other => other.to_string(),
                };
                warn!(transaction = %submission.reference, %reason, "request failed check");
                rejections.record(submission.reference, &reason);
                submission.reply(Outcome::Rejected(reason));
            }
        }
    }
    debug!("check stage stopped");
}

/// The open block and the submitters waiting for it to commit.
struct Block {
    transformation: StoreTransformation,
    waiting: Vec<(Submission, TransactionResponse)>,
}

impl Block {
    fn delivered_count(&self) -> usize {
        self.transformation.delivered_count()
    }
}

/// Executes checked requests into blocks and closes them.
pub(crate) struct DeliverStage {
    head: Arc<StoreHandle>,
    config: MempoolConfig,
    rejections: Arc<RecentRejections>,
    halted: Arc<AtomicBool>,
}

impl DeliverStage {
    pub fn new(
        head: Arc<StoreHandle>,
        config: MempoolConfig,
        rejections: Arc<RecentRejections>,
        halted: Arc<AtomicBool>,
    ) -> Self {
        Self {
            head,
            config,
            rejections,
            halted,
        }
    }

    pub async fn run(self, mut input: mpsc::Receiver<Submission>) -> MempoolResult<()> {
        let idle = self.config.idle_timeout();
        let full = self.config.block_size - 1;
        let mut block = self.open_block();

        loop {
            match timeout(idle, input.recv()).await {
                Ok(Some(submission)) => {
                    // The head moves under an empty block after a checkout.
                    if block.delivered_count() == 0
                        && block.transformation.base().state_id() != self.head.current().state_id()
                    {
                        block = self.open_block();
                    }
                    self.deliver(&mut block, submission)?;
                    while block.delivered_count() >= full {
                        block = self.close(block)?;
                    }
                }
                Ok(None) => {
                    while block.delivered_count() > 0 {
                        block = self.close(block)?;
                    }
                    debug!("deliver stage stopped");
                    return Ok(());
                }
                Err(_) => {
                    if block.delivered_count() > 0 {
                        debug!(transactions = block.delivered_count(), "idle timeout, closing block");
                    }
                    block = self.close(block)?;
                }
            }
        }
    }

    fn open_block(&self) -> Block {
        Block {
            transformation: self.head.current().begin_transformation(Timestamp::now()),
            waiting: Vec::new(),
        }
    }

    fn deliver(&self, block: &mut Block, submission: Submission) -> MempoolResult<()> {
        match block.transformation.deliver_transaction(&submission.request) {
            Ok(response) => {
                block.waiting.push((submission, response));
                Ok(())
            }
            Err(StoreError::Rejected(reason)) => {
                warn!(transaction = %submission.reference, %reason, "request rejected at delivery");
                // A duplicate of a request in this block must not shadow its outcome.
                if !block.waiting.iter().any(|(s, _)| s.reference == submission.reference) {
                    self.rejections.record(submission.reference, &reason);
                }
                submission.reply(Outcome::Rejected(reason));
                Ok(())
            }
            Err(e) => {
                submission.reply(Outcome::Aborted(e.to_string()));
                let waiting = std::mem::take(&mut block.waiting);
                Err(self.halt(waiting, e))
            }
        }
    }

    /// Deliver the reward, commit, publish, then notify the waiting
    /// submitters. An empty block is never committed; it is replaced by a
    /// fresh one with a current timestamp.
    ///
    /// The block is published only if the head is still its base. When a
    /// checkout moved the head meanwhile, the committed block is dropped and
    /// its requests are delivered again into a block on the new head.
    fn close(&self, block: Block) -> MempoolResult<Block> {
        if block.delivered_count() == 0 {
            return Ok(self.open_block());
        }

        let Block {
            mut transformation,
            waiting,
        } = block;
        let base = transformation.base().state_id();
        let behaving = [self.config.node_id.clone()];
        let committed = transformation
            .deliver_reward_transaction(&behaving, &[])
            .and_then(|()| transformation.commit())
            .and_then(|store| {
                let (id, height) = (store.state_id(), store.height());
                self.head.publish_if(&base, store)?;
                Ok((id, height))
            });

        match committed {
            Ok((state, height)) => {
                info!(%state, height, transactions = waiting.len(), "block published");
                for (submission, response) in waiting {
                    self.rejections.forget(&submission.reference);
                    submission.reply(Outcome::Delivered(response));
                }
                Ok(self.open_block())
            }
            Err(StoreError::HeadMoved { expected, actual }) => {
                warn!(
                    %expected,
                    %actual,
                    transactions = waiting.len(),
                    "head moved under the open block, delivering again on the new head"
                );
                let mut block = self.open_block();
                for (submission, _) in waiting {
                    self.deliver(&mut block, submission)?;
                }
                Ok(block)
            }
            Err(e) => Err(self.halt(waiting, e)),
        }
    }

    /// Stop the pipeline after a store failure. Every request of the open
    /// block is aborted and later submissions fail with `Halted`.
    fn halt(
        &self,
        waiting: Vec<(Submission, TransactionResponse)>,
        e: StoreError,
    ) -> MempoolError {
        error!(error = %e, transactions = waiting.len(), "block could not be committed, halting mempool");
        self.halted.store(true, Ordering::Release);
        for (submission, _) in waiting {
            submission.reply(Outcome::Aborted(e.to_string()));
        }
        MempoolError::Store(e)
    }
}

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use keel_store::StoreHandle;
use keel_types::{TransactionReference, TransactionRequest};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MempoolConfig;
use crate::error::{MempoolError, MempoolResult};
use crate::outcome::Ticket;
use crate::rejections::RecentRejections;
use crate::workers::{check_stage, DeliverStage, Submission};

struct Workers {
    check: JoinHandle<()>,
    deliver: JoinHandle<MempoolResult<()>>,
}

/// Bounded two-stage pipeline from submitted requests to committed blocks.
///
/// [`Mempool::add`] never blocks: a request is either queued or refused
/// with [`MempoolError::Overflow`]. Queued requests are checked against the
/// current snapshot, then delivered into the open block in submission
/// order. Each request's [`Ticket`] resolves once, when its block is
/// published or when it is rejected.
pub struct Mempool {
    admission: Mutex<Option<mpsc::Sender<Submission>>>,
    workers: Mutex<Option<Workers>>,
    halted: Arc<AtomicBool>,
    rejections: Arc<RecentRejections>,
    head: Arc<StoreHandle>,
    config: MempoolConfig,
}

impl Mempool {
    /// Spawn the check and deliver stages on the current tokio runtime.
    pub fn start(head: Arc<StoreHandle>, config: MempoolConfig) -> MempoolResult<Self> {
        config.validate()?;
        let cache_capacity = NonZeroUsize::new(config.rejection_cache_capacity).ok_or_else(|| {
            MempoolError::InvalidConfig("rejection_cache_capacity must be positive".into())
        })?;

        let (admission_tx, admission_rx) = mpsc::channel(config.admission_capacity);
        let (checked_tx, checked_rx) = mpsc::channel(config.checked_capacity);
        let halted = Arc::new(AtomicBool::new(false));
        let rejections = Arc::new(RecentRejections::new(cache_capacity));

        let check = tokio::spawn(check_stage(
            admission_rx,
            checked_tx,
            Arc::clone(&head),
            Arc::clone(&rejections),
            Arc::clone(&halted),
        ));
        let stage = DeliverStage::new(
            Arc::clone(&head),
            config.clone(),
            Arc::clone(&rejections),
            Arc::clone(&halted),
        );
        let deliver = tokio::spawn(stage.run(checked_rx));

        info!(
            block_size = config.block_size,
            capacity = config.admission_capacity,
            idle_timeout_ms = config.idle_timeout_ms,
            node = %config.node_id,
            "mempool started"
        );
        Ok(Self {
            admission: Mutex::new(Some(admission_tx)),
            workers: Mutex::new(Some(Workers { check, deliver })),
            halted,
            rejections,
            head,
            config,
        })
    }

    /// Queue `request` for execution.
    pub fn add(&self, request: TransactionRequest) -> MempoolResult<Ticket> {
        if self.is_halted() {
            return Err(MempoolError::Halted);
        }
        let guard = self.admission.lock().expect("lock poisoned");
        let sender = guard.as_ref().ok_or(MempoolError::ShutDown)?;

        let reference = request.reference();
        let (reply, receiver) = tokio::sync::oneshot::channel();
        let submission = Submission {
            reference,
            request,
            reply,
        };
        match sender.try_send(submission) {
            Ok(()) => {
                debug!(transaction = %reference, "request admitted");
                Ok(Ticket::new(reference, receiver))
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    transaction = %reference,
                    capacity = self.config.admission_capacity,
                    "admission queue full"
                );
                Err(MempoolError::Overflow)
            }
            Err(TrySendError::Closed(_)) => Err(MempoolError::Halted),
        }
    }

    /// Why `reference` was recently rejected, if it was.
    ///
    /// Only the most recent rejections are remembered; `None` means pending,
    /// delivered, never submitted, or rejected too long ago.
    pub fn rejection(&self, reference: &TransactionReference) -> Option<String> {
        self.rejections.get(reference)
    }

    /// Whether a store failure stopped the pipeline.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    pub fn head(&self) -> &Arc<StoreHandle> {
        &self.head
    }

    pub fn config(&self) -> &MempoolConfig {
        &self.config
    }

    /// Stop admitting requests, drain both stages, and commit the last
    /// open block. Returns the error that halted the pipeline, if any.
    pub async fn shutdown(&self) -> MempoolResult<()> {
        drop(self.admission.lock().expect("lock poisoned").take());
        let workers = self.workers.lock().expect("lock poisoned").take();
        let Some(Workers { check, deliver }) = workers else {
            return Ok(());
        };

        check
            .await
            .map_err(|e| MempoolError::Worker(e.to_string()))?;
        let result = deliver
            .await
            .map_err(|e| MempoolError::Worker(e.to_string()))?;
        info!(height = self.head.current().height(), "mempool stopped");
        result
    }
}

impl std::fmt::Debug for Mempool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mempool")
            .field("config", &self.config)
            .field("halted", &self.is_halted())
            .finish()
    }
}

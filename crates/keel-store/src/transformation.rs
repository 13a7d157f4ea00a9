use keel_types::{
    RewardDetails, StorageReference, Timestamp, TransactionReference, TransactionRequest,
    TransactionResponse,
};
use tracing::{debug, error, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::processor::{guarded, ProcessorError};
use crate::state::StateRecord;
use crate::store::Store;
use crate::tries::Tries;
use crate::view::StoreView;

/// A transaction recorded by a transformation.
pub(crate) struct Delivered {
    pub reference: TransactionReference,
    pub request: TransactionRequest,
    pub response: TransactionResponse,
}

/// A mutable working view on one snapshot, accumulating one block.
///
/// Transactions are executed strictly one after another; each one sees the
/// effects of every earlier delivery in the same transformation. Nothing is
/// visible outside until [`Self::commit`] folds the block into a new
/// snapshot whose parent is the base snapshot.
pub struct StoreTransformation {
    base: Store,
    now: Timestamp,
    tries: Tries,
    manifest: Option<StorageReference>,
    delivered: Vec<Delivered>,
    reward: Option<Delivered>,
    consumed: u64,
}

impl StoreTransformation {
    pub(crate) fn new(base: Store, now: Timestamp) -> Self {
        let tries = base.tries();
        let manifest = base.get_manifest();
        Self {
            base,
            now,
            tries,
            manifest,
            delivered: Vec::new(),
            reward: None,
            consumed: 0,
        }
    }

    /// The snapshot this transformation started from.
    pub fn base(&self) -> &Store {
        &self.base
    }

    /// Number of transactions successfully delivered so far, excluding the
    /// reward transaction.
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    /// References of the delivered transactions, in delivery order.
    pub fn delivered(&self) -> Vec<TransactionReference> {
        self.delivered.iter().map(|d| d.reference).collect()
    }

    /// Execute `request` against the pending state and record the result.
    ///
    /// Fails with [`StoreError::Rejected`], leaving the transformation
    /// unchanged, if the processor rejects the request, if the request was
    /// already delivered in this lineage, or if the response breaks a store
    /// invariant. A processor failure, including a panic inside the
    /// processor, is recorded as a failed response.
    pub fn deliver_transaction(
        &mut self,
        request: &TransactionRequest,
    ) -> StoreResult<TransactionResponse> {
        let reference = request.reference();
        if request.is_reward() {
            return Err(StoreError::Rejected(
                "reward transactions cannot be submitted".into(),
            ));
        }
        if self.tries.contains_request(&reference)? {
            warn!(transaction = %reference, "duplicate transaction rejected");
            return Err(StoreError::Rejected(format!(
                "transaction {} already delivered",
                reference.short_hex()
            )));
        }

        let processor = self.base.context().processor.clone();
        let response = match guarded(|| processor.deliver(request, &*self)) {
            Ok(response) => response,
            Err(ProcessorError::Rejected(reason)) => {
                debug!(transaction = %reference, %reason, "transaction rejected");
                return Err(StoreError::Rejected(reason));
            }
            Err(ProcessorError::Failed(reason)) => {
                warn!(transaction = %reference, %reason, "transaction failed");
                TransactionResponse::failed(reason)
            }
        };

        self.record(reference, request, &response)?;
        self.delivered.push(Delivered {
            reference,
            request: request.clone(),
            response: response.clone(),
        });
        debug!(
            transaction = %reference,
            success = response.is_success(),
            delivered = self.delivered.len(),
            "transaction delivered"
        );
        Ok(response)
    }

    /// Close the block with the synthetic reward transaction.
    ///
    /// Does nothing if no transaction was delivered, so empty blocks are
    /// never produced, or if the reward was already delivered. The reward
    /// carries the block's height, time, delivered count and consumed
    /// resources. The processor must accept it: a refusal is reported as
    /// [`StoreError::RewardRejected`].
    pub fn deliver_reward_transaction(
        &mut self,
        behaving: &[String],
        misbehaving: &[String],
    ) -> StoreResult<()> {
        if self.delivered.is_empty() {
            debug!("no transactions delivered; skipping reward");
            return Ok(());
        }
        if self.reward.is_some() {
            return Ok(());
        }

        let height = self.base.height() + 1;
        let details = RewardDetails {
            behaving: behaving.to_vec(),
            misbehaving: misbehaving.to_vec(),
            consumed: self.consumed,
            delivered: self.delivered.len() as u64,
            height,
            now: self.now,
        };
        let request = TransactionRequest::reward(&details)?;
        let reference = request.reference();

        let processor = self.base.context().processor.clone();
        let response = guarded(|| processor.deliver(&request, &*self)).map_err(|e| {
            error!(height, error = %e, "reward transaction refused by processor");
            StoreError::RewardRejected(e.to_string())
        })?;
        self.record(reference, &request, &response)
            .map_err(|e| match e {
                StoreError::Rejected(reason) => {
                    error!(height, %reason, "reward transaction rejected by store");
                    StoreError::RewardRejected(reason)
                }
                other => other,
            })?;

        self.reward = Some(Delivered {
            reference,
            request,
            response,
        });
        Ok(())
    }

    /// Validate a response against the pending state, then apply it.
    fn record(
        &mut self,
        reference: TransactionReference,
        request: &TransactionRequest,
        response: &TransactionResponse,
    ) -> StoreResult<()> {
        let touched = response.touched();
        let mut histories = Vec::with_capacity(touched.len());
        for object in &touched {
            let mut history = self.tries.history(object)?;
            if history.is_empty() && object.transaction != reference {
                return Err(StoreError::Rejected(format!(
                    "update of unknown object {object}"
                )));
            }
            history.push(reference);
            histories.push((*object, history));
        }

        if let Some(designated) = response.manifest {
            if let Some(existing) = self.manifest {
                return Err(StoreError::Rejected(format!(
                    "manifest already set to {existing}"
                )));
            }
            let known = touched.contains(&designated)
                || designated.transaction == reference
                || !self.tries.history(&designated)?.is_empty();
            if !known {
                return Err(StoreError::Rejected(format!(
                    "manifest designates unknown object {designated}"
                )));
            }
        }

        self.tries.put_transaction(&reference, request, response)?;
        for (object, history) in &histories {
            self.tries.put_history(object, history)?;
        }
        if let Some(designated) = response.manifest {
            info!(manifest = %designated, transaction = %reference, "manifest designated");
            self.manifest = Some(designated);
        }
        self.consumed = self.consumed.saturating_add(response.consumed);
        Ok(())
    }

    /// Fold the block into a new snapshot.
    ///
    /// All new trie nodes and the state record are written in a single
    /// atomic batch. With nothing delivered, the base snapshot is returned
    /// unchanged.
    pub fn commit(self) -> StoreResult<Store> {
        if self.delivered.is_empty() {
            debug!(state = %self.base.state_id(), "empty transformation; nothing to commit");
            return Ok(self.base);
        }

        let Self {
            base,
            now,
            tries,
            manifest,
            delivered,
            reward,
            ..
        } = self;

        let (roots, mut batch) = tries.into_batch();
        let record = StateRecord {
            requests: roots.requests,
            responses: roots.responses,
            histories: roots.histories,
            manifest,
            parent: Some(base.state_id()),
            height: base.height() + 1,
            now,
        };
        let bytes = record.encode()?;
        let id = StateRecord::id_of(&bytes);
        batch.push((*id.hash(), bytes));

        let ctx = base.context().clone();
        ctx.nodes.write_batch(&batch)?;

        let transactions: Vec<&Delivered> = delivered.iter().chain(reward.iter()).collect();
        if let Some(archive) = &ctx.archive {
            archive.write_block(record.height, &transactions)?;
        }

        info!(
            height = record.height,
            state = %id,
            parent = %base.state_id(),
            transactions = transactions.len(),
            nodes = batch.len(),
            "block committed"
        );
        Ok(Store::from_parts(ctx, record, id))
    }
}

impl StoreView for StoreTransformation {
    fn request(&self, reference: &TransactionReference) -> StoreResult<Option<TransactionRequest>> {
        self.tries.request(reference)
    }

    fn response(
        &self,
        reference: &TransactionReference,
    ) -> StoreResult<Option<TransactionResponse>> {
        self.tries.response(reference)
    }

    fn history(&self, object: &StorageReference) -> StoreResult<Vec<TransactionReference>> {
        self.tries.history(object)
    }

    fn manifest(&self) -> Option<StorageReference> {
        self.manifest
    }

    fn height(&self) -> u64 {
        self.base.height()
    }

    fn now(&self) -> Timestamp {
        self.now
    }
}

impl std::fmt::Debug for StoreTransformation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreTransformation")
            .field("base", &self.base.state_id())
            .field("now", &self.now)
            .field("delivered", &self.delivered.len())
            .field("rewarded", &self.reward.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{created_by, Script, ScriptedProcessor};
    use keel_types::Status;
    use proptest::prelude::*;

    fn store() -> (Store, Arc<ScriptedProcessor>) {
        let processor = Arc::new(ScriptedProcessor::new());
        (Store::in_memory(processor.clone()).unwrap(), processor)
    }

    fn node_ids() -> Vec<String> {
        vec!["node-a".to_string()]
    }

    fn at(millis: u64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    #[test]
    fn delivered_transaction_is_invisible_until_commit() {
        let (base, _) = store();
        let request = Script::create("balance", b"100");
        let reference = request.reference();

        let mut tx = base.begin_transformation(at(1));
        tx.deliver_transaction(&request).unwrap();

        assert_eq!(tx.delivered_count(), 1);
        assert!(tx.response(&reference).unwrap().is_some());
        assert!(matches!(
            base.get_response(&reference),
            Err(StoreError::UnknownReference(_))
        ));

        let committed = tx.commit().unwrap();
        assert_eq!(committed.get_request(&reference).unwrap(), request);
        assert!(committed.get_response(&reference).unwrap().is_success());
        assert_eq!(committed.parent(), Some(base.state_id()));
        assert_eq!(committed.height(), 1);
        assert_eq!(committed.now(), at(1));
    }

    #[test]
    fn later_deliveries_see_earlier_ones() {
        let (base, processor) = store();
        let create = Script::create("owner", b"alice");
        let object = created_by(&create);
        let set = Script::set(object, "owner", b"bob");

        let mut tx = base.begin_transformation(at(1));
        tx.deliver_transaction(&create).unwrap();
        tx.deliver_transaction(&set).unwrap();

        assert_eq!(
            tx.history(&object).unwrap(),
            vec![create.reference(), set.reference()]
        );
        assert_eq!(
            tx.object_state(&object).unwrap().get("owner"),
            Some(&b"bob".to_vec())
        );
        assert_eq!(processor.deliveries().len(), 2);
    }

    #[test]
    fn rejected_transaction_leaves_state_unchanged() {
        let (base, _) = store();
        let mut tx = base.begin_transformation(at(1));
        let request = Script::RejectOnDeliver.request();

        let err = tx.deliver_transaction(&request).unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(tx.delivered_count(), 0);
        assert!(tx.request(&request.reference()).unwrap().is_none());
    }

    #[test]
    fn processor_failure_records_failed_response() {
        let (base, _) = store();
        let mut tx = base.begin_transformation(at(1));
        let request = Script::Fail.request();

        let response = tx.deliver_transaction(&request).unwrap();
        assert_eq!(
            response.status,
            Status::Failed {
                reason: "execution failed".into()
            }
        );
        assert_eq!(tx.delivered_count(), 1);
        let committed = tx.commit().unwrap();
        assert!(!committed.get_response(&request.reference()).unwrap().is_success());
    }

    #[test]
    fn processor_panic_records_failed_response_and_block_continues() {
        let (base, _) = store();
        let mut tx = base.begin_transformation(at(1));
        tx.deliver_transaction(&Script::noop(1)).unwrap();

        let exploding = Script::Panic.request();
        let response = tx.deliver_transaction(&exploding).unwrap();
        assert_eq!(
            response.status,
            Status::Failed {
                reason: "processor panicked: delivery exploded".into()
            }
        );

        tx.deliver_transaction(&Script::noop(2)).unwrap();
        tx.deliver_reward_transaction(&node_ids(), &[]).unwrap();
        assert_eq!(tx.delivered_count(), 3);
        let committed = tx.commit().unwrap();
        assert!(!committed.get_response(&exploding.reference()).unwrap().is_success());
        assert!(committed.contains(&Script::noop(2).reference()).unwrap());
    }

    #[test]
    fn processor_panic_during_check_is_a_rejection() {
        let (base, _) = store();
        let err = base
            .check_transaction(&Script::PanicOnCheck.request())
            .unwrap_err();
        assert!(err.is_rejection());
        assert!(base.check_transaction(&Script::noop(1)).is_ok());
    }

    #[test]
    fn duplicate_in_same_block_is_rejected() {
        let (base, _) = store();
        let mut tx = base.begin_transformation(at(1));
        tx.deliver_transaction(&Script::noop(1)).unwrap();
        let err = tx.deliver_transaction(&Script::noop(1)).unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(tx.delivered_count(), 1);
    }

    #[test]
    fn duplicate_across_blocks_is_rejected() {
        let (base, _) = store();
        let mut tx = base.begin_transformation(at(1));
        tx.deliver_transaction(&Script::noop(1)).unwrap();
        let first = tx.commit().unwrap();

        assert!(first.check_transaction(&Script::noop(1)).is_err());
        let mut tx = first.begin_transformation(at(2));
        assert!(tx.deliver_transaction(&Script::noop(1)).is_err());
    }

    #[test]
    fn submitted_reward_request_is_rejected() {
        let (base, _) = store();
        let mut tx = base.begin_transformation(at(1));
        let forged = TransactionRequest::reward(&RewardDetails {
            behaving: vec![],
            misbehaving: vec![],
            consumed: 0,
            delivered: 0,
            height: 1,
            now: at(1),
        })
        .unwrap();
        assert!(tx.deliver_transaction(&forged).unwrap_err().is_rejection());
    }

    #[test]
    fn update_of_unknown_object_is_rejected() {
        struct Rogue;
        impl crate::TransactionProcessor for Rogue {
            fn check(&self, _: &TransactionRequest, _: &dyn StoreView) -> Result<(), ProcessorError> {
                Ok(())
            }
            fn deliver(
                &self,
                _: &TransactionRequest,
                _: &dyn StoreView,
            ) -> Result<TransactionResponse, ProcessorError> {
                let stranger = StorageReference::new(
                    TransactionReference::from_hash(keel_types::Hash::of(b"elsewhere")),
                    0,
                );
                Ok(TransactionResponse::success().with_update(stranger, "f", vec![1]))
            }
        }

        let base = Store::in_memory(Arc::new(Rogue)).unwrap();
        let mut tx = base.begin_transformation(at(1));
        let err = tx
            .deliver_transaction(&TransactionRequest::standard(b"x".to_vec()))
            .unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(tx.delivered_count(), 0);
    }

    // -----------------------------------------------------------------------
    // Manifest
    // -----------------------------------------------------------------------

    #[test]
    fn manifest_is_set_once() {
        let (base, _) = store();
        let init = Script::Initialize.request();
        let mut tx = base.begin_transformation(at(1));
        tx.deliver_transaction(&init).unwrap();
        assert_eq!(tx.manifest(), Some(created_by(&init)));

        let committed = tx.commit().unwrap();
        assert_eq!(committed.get_manifest(), Some(created_by(&init)));

        // A second initialization is refused, whatever the processor thinks.
        let mut tx = committed.begin_transformation(at(2));
        assert!(tx
            .deliver_transaction(&Script::Initialize.request())
            .is_err());
        tx.deliver_transaction(&Script::noop(7)).unwrap();
        let next = tx.commit().unwrap();
        assert_eq!(next.get_manifest(), Some(created_by(&init)));
    }

    // -----------------------------------------------------------------------
    // Reward
    // -----------------------------------------------------------------------

    #[test]
    fn reward_is_skipped_for_empty_block() {
        let (base, processor) = store();
        let mut tx = base.begin_transformation(at(1));
        tx.deliver_reward_transaction(&node_ids(), &[]).unwrap();
        assert!(processor.rewards().is_empty());

        let committed = tx.commit().unwrap();
        assert_eq!(committed.state_id(), base.state_id());
        assert_eq!(committed.height(), 0);
    }

    #[test]
    fn reward_carries_block_accounting() {
        let (base, processor) = store();
        let mut tx = base.begin_transformation(at(42));
        for tag in 0..4 {
            tx.deliver_transaction(&Script::noop(tag)).unwrap();
        }
        tx.deliver_reward_transaction(&node_ids(), &["node-z".to_string()])
            .unwrap();
        // A second call is a no-op.
        tx.deliver_reward_transaction(&node_ids(), &[]).unwrap();
        assert_eq!(tx.delivered_count(), 4);

        let rewards = processor.rewards();
        assert_eq!(rewards.len(), 1);
        assert_eq!(rewards[0].behaving, node_ids());
        assert_eq!(rewards[0].misbehaving, vec!["node-z".to_string()]);
        assert_eq!(rewards[0].delivered, 4);
        assert_eq!(rewards[0].consumed, 40);
        assert_eq!(rewards[0].height, 1);
        assert_eq!(rewards[0].now, at(42));

        let committed = tx.commit().unwrap();
        let reward = TransactionRequest::reward(&rewards[0]).unwrap();
        assert!(committed.get_request(&reward.reference()).unwrap().is_reward());
    }

    #[test]
    fn refused_reward_is_a_store_failure() {
        let processor = Arc::new(ScriptedProcessor::rejecting_rewards());
        let base = Store::in_memory(processor).unwrap();
        let mut tx = base.begin_transformation(at(1));
        tx.deliver_transaction(&Script::noop(1)).unwrap();
        assert!(matches!(
            tx.deliver_reward_transaction(&node_ids(), &[]),
            Err(StoreError::RewardRejected(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Snapshots and checkout
    // -----------------------------------------------------------------------

    #[test]
    fn checkout_round_trip() {
        let (base, _) = store();
        let create = Script::create("v", b"1");
        let mut tx = base.begin_transformation(at(1));
        tx.deliver_transaction(&create).unwrap();
        let first = tx.commit().unwrap();

        let mut tx = first.begin_transformation(at(2));
        tx.deliver_transaction(&Script::set(created_by(&create), "v", b"2"))
            .unwrap();
        let second = tx.commit().unwrap();

        let back = second.checkout(&first.state_id()).unwrap();
        assert_eq!(back.state_id(), first.state_id());
        assert_eq!(back.height(), 1);
        assert_eq!(
            back.get_history(&created_by(&create)).unwrap(),
            first.get_history(&created_by(&create)).unwrap()
        );
        assert_eq!(
            back.get_object_state(&created_by(&create)).unwrap()["v"],
            b"1".to_vec()
        );

        // Both directions work: the newer snapshot is reachable from the older.
        let forward = back.checkout(&second.state_id()).unwrap();
        assert_eq!(
            forward.get_object_state(&created_by(&create)).unwrap()["v"],
            b"2".to_vec()
        );
        let genesis = forward.checkout(&base.state_id()).unwrap();
        assert_eq!(genesis.height(), 0);
    }

    #[test]
    fn checkout_unknown_root_fails() {
        let (base, _) = store();
        let bogus = StateRecord::id_of(b"never committed");
        assert!(matches!(
            base.checkout(&bogus),
            Err(StoreError::UnknownRoot(_))
        ));
    }

    #[test]
    fn get_response_is_stable() {
        let (base, _) = store();
        let request = Script::noop(3);
        let mut tx = base.begin_transformation(at(1));
        tx.deliver_transaction(&request).unwrap();
        let committed = tx.commit().unwrap();
        let first = committed.get_response(&request.reference()).unwrap();
        let second = committed.get_response(&request.reference()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_history_is_empty() {
        let (base, _) = store();
        let object = StorageReference::new(Script::noop(0).reference(), 5);
        assert!(base.get_history(&object).unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn histories_are_prefix_stable_across_blocks(
            blocks in proptest::collection::vec(1usize..4, 1..6)
        ) {
            let (base, _) = store();
            let create = Script::create("n", b"0");
            let object = created_by(&create);
            let mut tx = base.begin_transformation(at(0));
            tx.deliver_transaction(&create).unwrap();
            let mut current = tx.commit().unwrap();
            let mut previous = current.get_history(&object).unwrap();
            let mut counter = 0u64;

            for (i, updates) in blocks.iter().enumerate() {
                let mut tx = current.begin_transformation(at(i as u64 + 1));
                for _ in 0..*updates {
                    counter += 1;
                    tx.deliver_transaction(&Script::set(object, "n", &counter.to_le_bytes()))
                        .unwrap();
                }
                current = tx.commit().unwrap();
                let history = current.get_history(&object).unwrap();
                prop_assert_eq!(&history[..previous.len()], &previous[..]);
                prop_assert_eq!(history.len(), previous.len() + updates);
                previous = history;
            }
        }
    }
}

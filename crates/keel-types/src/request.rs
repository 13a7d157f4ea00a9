use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::reference::TransactionReference;
use crate::temporal::Timestamp;

/// What produced a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    /// Submitted by a client through the mempool.
    Standard,
    /// Synthetic block-closing transaction; its payload is an encoded
    /// [`RewardDetails`].
    Reward,
}

impl RequestKind {
    fn tag(self) -> u8 {
        match self {
            Self::Standard => 0,
            Self::Reward => 1,
        }
    }
}

/// An opaque transaction request.
///
/// The core never interprets `payload`; only the transaction processor does.
/// Identity is derived from [`Self::encode`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub kind: RequestKind,
    pub payload: Vec<u8>,
}

impl TransactionRequest {
    /// A client request carrying an opaque payload.
    pub fn standard(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: RequestKind::Standard,
            payload: payload.into(),
        }
    }

    /// The block-closing request built from reward accounting.
    pub fn reward(details: &RewardDetails) -> Result<Self, TypeError> {
        let payload =
            bincode::serialize(details).map_err(|e| TypeError::Serialization(e.to_string()))?;
        Ok(Self {
            kind: RequestKind::Reward,
            payload,
        })
    }

    /// Returns `true` for synthetic reward requests.
    pub fn is_reward(&self) -> bool {
        self.kind == RequestKind::Reward
    }

    /// Canonical byte encoding: one kind tag byte followed by the payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.payload.len());
        bytes.push(self.kind.tag());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// The content-derived reference of this request.
    pub fn reference(&self) -> TransactionReference {
        TransactionReference::of(self)
    }

    /// Decode the reward accounting carried by a reward request.
    ///
    /// Returns `Ok(None)` for standard requests.
    pub fn reward_details(&self) -> Result<Option<RewardDetails>, TypeError> {
        if !self.is_reward() {
            return Ok(None);
        }
        bincode::deserialize(&self.payload)
            .map(Some)
            .map_err(|e| TypeError::Serialization(e.to_string()))
    }
}

/// Accounting settled by the reward transaction that closes a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardDetails {
    /// Identifiers of the nodes that behaved correctly during the block.
    pub behaving: Vec<String>,
    /// Identifiers of the nodes that misbehaved during the block.
    pub misbehaving: Vec<String>,
    /// Resource units consumed by the block's transactions.
    pub consumed: u64,
    /// Transactions delivered in the block, excluding the reward itself.
    pub delivered: u64,
    /// Height of the block being closed.
    pub height: u64,
    /// Block time.
    pub now: Timestamp,
}

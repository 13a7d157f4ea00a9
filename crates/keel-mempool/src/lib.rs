//! Admission and scheduling pipeline for Keel.
//!
//! The [`Mempool`] accepts requests from any number of callers and feeds
//! them, in arrival order, through two sequential stages connected by
//! bounded queues:
//!
//! ```text
//! add ──▶ [admission queue] ──▶ check ──▶ [checked queue] ──▶ deliver ──▶ block
//!              │ full: Overflow         │ fail: Rejected        │ reject: Rejected
//! ```
//!
//! The deliver stage owns the open [`keel_store::StoreTransformation`]. A
//! block is closed when it holds `block_size - 1` transactions or when no
//! request arrives within the idle timeout: the reward transaction is
//! delivered, the block is committed, and the new snapshot is published.
//! Submitters learn the result through a [`Ticket`]. Reasons for recent
//! rejections stay queryable by reference through [`Mempool::rejection`].

pub mod config;
pub mod error;
pub mod mempool;
pub mod outcome;

mod rejections;
mod workers;

pub use config::MempoolConfig;
pub use error::{MempoolError, MempoolResult};
pub use mempool::Mempool;
pub use outcome::{Outcome, Ticket};

//! Versioned transaction store for Keel.
//!
//! A [`Store`] is an immutable snapshot mapping transaction references to
//! their request and response, objects to the ordered history of
//! transactions that updated them, plus an optional manifest. Snapshots are
//! backed by persistent Merkle-Patricia tries, so successive snapshots share
//! structure and every committed snapshot can be reopened by its
//! [`StateId`].
//!
//! Blocks are built in a [`StoreTransformation`]: transactions are executed
//! one at a time by an injected [`TransactionProcessor`], each seeing the
//! effects of the previous ones, and the whole block becomes visible at
//! once on [`StoreTransformation::commit`]. A [`StoreHandle`] holds the
//! current snapshot and swaps it atomically on publish.
//!
//! ```text
//! Store ──begin_transformation(now)──▶ StoreTransformation
//!   ▲                                     │ deliver_transaction(..)*
//!   │                                     │ deliver_reward_transaction(..)
//!   └──────────── commit() ◀──────────────┘
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod handle;
pub mod processor;
pub mod state;
pub mod store;
pub mod transformation;
pub mod view;

mod tries;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use archive::BlockArchive;
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use handle::StoreHandle;
pub use keel_trie::SyncMode;
pub use processor::{ProcessorError, TransactionProcessor};
pub use state::{StateId, StateRecord};
pub use store::Store;
pub use transformation::StoreTransformation;
pub use view::StoreView;

//! Local Keel node.
//!
//! Wires a [`keel_store::StoreHandle`] and a [`keel_mempool::Mempool`] together
//! behind [`LocalNode`], configured from a TOML file through [`NodeConfig`].
//! The transaction processor is supplied by the embedding application.
//!
//! The crate never installs a `tracing` subscriber; that is left to the
//! binary embedding it.

pub mod config;
pub mod error;
pub mod node;

pub use config::NodeConfig;
pub use error::{NodeError, NodeResult};
pub use node::LocalNode;

//! Foundation types for Keel.
//!
//! This crate provides the identity and record types shared by every other
//! Keel crate: content hashes, the references that name transactions and the
//! objects they create, and the opaque request/response records moved through
//! the mempool and the store.
//!
//! # Key Types
//!
//! - [`Hash`]: 32-byte BLAKE3 digest
//! - [`TransactionReference`]: content-derived identifier of a request
//! - [`StorageReference`]: an object created by a transaction
//! - [`TransactionRequest`] / [`TransactionResponse`]: the records stored per transaction
//! - [`Timestamp`]: block-level wall-clock time in milliseconds

pub mod error;
pub mod hash;
pub mod reference;
pub mod request;
pub mod response;
pub mod temporal;

pub use error::TypeError;
pub use hash::Hash;
pub use reference::{StorageReference, TransactionReference};
pub use request::{RequestKind, RewardDetails, TransactionRequest};
pub use response::{Status, TransactionResponse, Update};
pub use temporal::Timestamp;

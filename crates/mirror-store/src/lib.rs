//! Logical object model and reference store for Mirror Manager
//!
//! Defines the identity types the sync protocol relies on ([`Soid`],
//! branches, content attributes, FID bindings) together with the
//! [`ObjectStore`] trait the reconciliation engine mutates through, and
//! [`MemoryStore`], an in-memory implementation with undo-log transactions.
//!
//! Durability is an embedder concern; the engine only assumes the trait's
//! transactional contract.

pub mod error;
pub mod memory;
pub mod object;
pub mod store;

pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use object::{
    Branch, ContentAttr, LENGTH_ASSUME_CHANGED, ObjectAttr, ObjectId, ObjectType, Soid, StoreId,
};
pub use store::{ObjectStore, Transaction, TxOutcome};

//! Error types for mirror-store

use crate::object::Soid;
use mirror_fs::Fid;
use uuid::Uuid;

/// Result type for mirror-store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in mirror-store operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Object not found: {soid}")]
    ObjectNotFound { soid: Soid },

    #[error("Store not found: {store}")]
    StoreNotFound { store: Uuid },

    #[error("Store already exists: {store}")]
    StoreExists { store: Uuid },

    #[error("Name '{name}' already taken under {parent}")]
    NameTaken { parent: Soid, name: String },

    #[error("Fid {fid} is already bound to another object in this store")]
    FidTaken { fid: Fid },

    #[error("Object {soid} is not a container")]
    NotAContainer { soid: Soid },

    #[error("Refusing to remove the store root {soid}")]
    CannotRemoveRoot { soid: Soid },

    #[error("Refusing to move the store root {soid}")]
    CannotMoveRoot { soid: Soid },

    #[error("Cannot move {soid} across stores")]
    CrossStoreMove { soid: Soid },
}

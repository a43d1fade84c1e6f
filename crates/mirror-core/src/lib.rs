//! Reconciliation engine for Mirror Manager
//!
//! This crate decides what raw filesystem observations mean for the logical
//! object store and applies the result transactionally:
//!
//! - **Decision engines**: the create/update/replace matrix and the
//!   buffered-delete rules, tolerant of ephemeral FIDs, hardlinks, and
//!   name folding
//! - **Deletion buffer**: timeout-based staging with reference-counted
//!   holds and disk re-validation before any committed delete
//! - **Hash queue**: bounded background hashing with de-duplication and a
//!   synchronous overflow fallback
//! - **Root registry** and **orchestrator**: root lifecycle, pause/resume
//!   with mandatory rescan, and escalation of unclassified failures to
//!   full rescans
//!
//! # Architecture
//!
//! ```text
//!           notifier / scanner
//!                   |
//!             Orchestrator
//!             /     |      \
//!     CreateEngine  |   DeleteEngine
//!          |        |        |
//!       Executor    |   DeletionBuffer
//!           \       |       /
//!          ObjectStore (transactional)
//!                   |
//!              HashQueue (async)
//! ```

pub mod buffer;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod orchestrator;
pub mod roots;
pub mod scan;
pub mod scheduler;

pub use buffer::{DEFAULT_DELETION_TIMEOUT, DeletionBuffer, Holder};
pub use engine::{
    CreateEngine, Decision, DeleteEngine, Executor, PhysicalFacts, PhysicalOpMode,
};
pub use error::{Error, Result};
pub use hasher::{HashQueue, HashRequest, Submission};
pub use orchestrator::{EngineConfig, EngineState, Orchestrator};
pub use roots::{Root, RootEntry, RootRegistry, RootTable};
pub use scan::ScanReport;
pub use scheduler::{Clock, Scheduler};

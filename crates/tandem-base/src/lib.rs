//! Tandem Base - Causal multi-writer log
//!
//! Every peer holds one append-only core per writer. Nodes carry a Lamport
//! clock; all cores are merged into a single deterministic order and folded
//! through an [`Apply`] reducer to produce a view. Reducers admit new writers
//! through the [`Host`] they are handed, so the writer set is itself part of
//! the replicated state.
//!
//! - [`Storage`]: RocksDB-backed identity, bootstrap key and cores
//! - [`Base`]: the log itself, with append, update, ack and replication
//! - [`linearize`]: the pure ordering and apply walk

pub mod base;
pub mod error;
pub mod linearize;
pub mod node;
pub mod replicate;
pub mod storage;

pub use base::Base;
pub use error::{Error, Result};
pub use linearize::{linearize, Linearized, WriterSet};
pub use node::{Apply, Host, Node, WriterOptions};
pub use replicate::Wire;
pub use storage::Storage;
pub use tandem_protocols::WriterKey;

//! Log nodes and the reducer seam.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tandem_protocols::WriterKey;

/// One entry in a writer's local core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node<V> {
    /// Writer whose core holds this node.
    pub writer: WriterKey,
    /// Index within that core.
    pub seq: u64,
    /// Lamport clock at append time.
    pub clock: u64,
    /// `None` marks an ack node.
    pub value: Option<V>,
}

impl<V> Node<V> {
    /// Ordering key for linearization.
    pub fn order_key(&self) -> (u64, WriterKey, u64) {
        (self.clock, self.writer, self.seq)
    }

    pub fn is_ack(&self) -> bool {
        self.value.is_none()
    }
}

/// Options for granting a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    /// Indexers take part in ordering. Always true in Tandem.
    pub indexer: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self { indexer: true }
    }
}

/// Capabilities a reducer may call back into while applying nodes.
pub trait Host {
    /// Add a key to the writer set. Adding an existing writer is a no-op.
    fn add_writer(&mut self, key: WriterKey, options: WriterOptions);

    /// Whether a key is currently a writer.
    fn is_writer(&self, key: &WriterKey) -> bool;
}

/// Folds linearized nodes into a view.
///
/// `apply` is called with nodes in the same total order on every peer and
/// must be a pure function of that order.
pub trait Apply: Send + Sync + 'static {
    type Value: Clone + Serialize + DeserializeOwned + Send + Sync + 'static;
    type View: Default + Send + Sync + 'static;

    fn apply(&self, nodes: &[Node<Self::Value>], view: &mut Self::View, host: &mut dyn Host);
}

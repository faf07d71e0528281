//! Deterministic linearization.
//!
//! Every known node is ordered by `(clock, writer, seq)`. Because a writer's
//! clock always moves past every node it has seen, this order respects
//! causality: a grant is ordered before anything the granted writer appends
//! after learning about it. The walk applies a node only if its writer is in
//! the writer set at that point, so nodes from never-granted writers are
//! stored but never reach the view.

use std::collections::{BTreeMap, BTreeSet};

use tandem_protocols::WriterKey;

use crate::node::{Apply, Host, Node, WriterOptions};

/// The authorized writer set. Starts with the bootstrap key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterSet {
    writers: BTreeSet<WriterKey>,
}

impl WriterSet {
    pub fn new(bootstrap: WriterKey) -> Self {
        Self {
            writers: BTreeSet::from([bootstrap]),
        }
    }

    pub fn contains(&self, key: &WriterKey) -> bool {
        self.writers.contains(key)
    }

    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriterKey> {
        self.writers.iter()
    }
}

impl Host for WriterSet {
    fn add_writer(&mut self, key: WriterKey, _options: WriterOptions) {
        self.writers.insert(key);
    }

    fn is_writer(&self, key: &WriterKey) -> bool {
        self.contains(key)
    }
}

/// Result of one linearization pass.
pub struct Linearized<V> {
    pub view: V,
    pub writers: WriterSet,
    /// Nodes that reached the reducer.
    pub applied: usize,
}

/// Replay every core through `apply`.
pub fn linearize<A: Apply>(
    apply: &A,
    bootstrap: WriterKey,
    cores: &BTreeMap<WriterKey, Vec<Node<A::Value>>>,
) -> Linearized<A::View> {
    let mut ordered: Vec<&Node<A::Value>> = cores.values().flatten().collect();
    ordered.sort_by_key(|node| node.order_key());

    let mut view = A::View::default();
    let mut writers = WriterSet::new(bootstrap);
    let mut applied = 0;
    let mut run: Vec<Node<A::Value>> = Vec::new();

    for node in ordered {
        if !writers.contains(&node.writer) {
            // A pending grant may be in the current run.
            if !run.is_empty() {
                applied += run.len();
                apply.apply(&run, &mut view, &mut writers);
                run.clear();
            }
            if !writers.contains(&node.writer) {
                continue;
            }
        }
        run.push(node.clone());
    }

    if !run.is_empty() {
        applied += run.len();
        apply.apply(&run, &mut view, &mut writers);
    }

    Linearized {
        view,
        writers,
        applied,
    }
}

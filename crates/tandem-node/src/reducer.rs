//! Projection reducers for the log and key/value views.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tandem_base::{Apply, Host, Node, WriterOptions};
use tracing::Span;

use crate::ops::Operation;

/// A reducer over [`Operation`]s that a replicated instance can host.
pub trait Projection: Apply<Value = Operation> {
    /// Span that every task of one instance runs in.
    fn span(log_id: &str, writer: &str) -> Span;
}

/// One appended log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub data: Value,
    pub timestamp: u64,
}

/// Ordered list of appended entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogView {
    entries: Vec<LogEntry>,
}

impl LogView {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    /// The last `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> Vec<LogEntry> {
        let start = self.entries.len().saturating_sub(n);
        self.entries[start..].to_vec()
    }
}

/// Log projection: appends in linearized order.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReducer;

impl Apply for LogReducer {
    type Value = Operation;
    type View = LogView;

    fn apply(&self, nodes: &[Node<Operation>], view: &mut LogView, host: &mut dyn Host) {
        for node in nodes {
            match &node.value {
                Some(Operation::AddWriter { key }) => {
                    host.add_writer(*key, WriterOptions { indexer: true })
                }
                Some(Operation::Append { data, timestamp }) => view.entries.push(LogEntry {
                    data: data.clone(),
                    timestamp: *timestamp,
                }),
                _ => {}
            }
        }
    }
}

impl Projection for LogReducer {
    fn span(log_id: &str, writer: &str) -> Span {
        tracing::info_span!("shared_log", id = %log_id, writer = %writer)
    }
}

/// Key/value map plus a count of applied mutations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KvView {
    map: BTreeMap<String, Value>,
    version: u64,
}

impl KvView {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Every entry in key order.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Key/value projection: last put wins, del removes.
#[derive(Debug, Clone, Copy, Default)]
pub struct KvReducer;

impl Apply for KvReducer {
    type Value = Operation;
    type View = KvView;

    fn apply(&self, nodes: &[Node<Operation>], view: &mut KvView, host: &mut dyn Host) {
        for node in nodes {
            match &node.value {
                Some(Operation::AddWriter { key }) => {
                    host.add_writer(*key, WriterOptions { indexer: true })
                }
                Some(Operation::Put { key, value }) => {
                    view.map.insert(key.clone(), value.clone());
                    view.version += 1;
                }
                Some(Operation::Del { key }) => {
                    if view.map.remove(key).is_some() {
                        view.version += 1;
                    }
                }
                _ => {}
            }
        }
    }
}

impl Projection for KvReducer {
    fn span(log_id: &str, writer: &str) -> Span {
        tracing::info_span!("shared_kv", id = %log_id, writer = %writer)
    }
}

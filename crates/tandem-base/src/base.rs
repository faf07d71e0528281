//! The causal multi-writer log.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tandem_protocols::WriterKey;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::linearize::{linearize, WriterSet};
use crate::node::{Apply, Node};
use crate::replicate::{run_session, Wire};
use crate::storage::Storage;

/// Capacity of the node flood channel.
const FEED_CAPACITY: usize = 1024;

pub(crate) type Feed<V> = Arc<Vec<Node<V>>>;

struct State<A: Apply> {
    /// Writer -> that writer's core, contiguous from seq 0.
    cores: BTreeMap<WriterKey, Vec<Node<A::Value>>>,
    max_clock: u64,
    /// Node set changed since the view was built.
    dirty: bool,
    view: A::View,
    writers: WriterSet,
    applied: usize,
}

impl<A: Apply> State<A> {
    fn core_len(&self, key: &WriterKey) -> u64 {
        self.cores.get(key).map_or(0, |core| core.len() as u64)
    }

    /// Append if contiguous. Returns false for duplicates and gaps.
    fn insert(&mut self, node: Node<A::Value>) -> bool {
        let core = self.cores.entry(node.writer).or_default();
        if node.seq != core.len() as u64 {
            return false;
        }
        self.max_clock = self.max_clock.max(node.clock);
        core.push(node);
        self.dirty = true;
        true
    }
}

struct Inner<A: Apply> {
    key: WriterKey,
    local_key: WriterKey,
    storage: Arc<Storage>,
    apply: A,
    state: RwLock<State<A>>,
    writable: AtomicBool,
    feed: broadcast::Sender<Feed<A::Value>>,
    shutdown: watch::Sender<bool>,
}

/// A causal multi-writer log with a reducer-maintained view.
///
/// Cheap to clone; clones share state.
pub struct Base<A: Apply> {
    inner: Arc<Inner<A>>,
}

impl<A: Apply> Clone for Base<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Apply> Base<A> {
    /// Open the log stored in `storage`.
    ///
    /// With no `bootstrap`, the bootstrap remembered by the storage is used;
    /// failing that, the local writer becomes the bootstrap of a new log.
    pub fn open(storage: Arc<Storage>, bootstrap: Option<WriterKey>, apply: A) -> Result<Self> {
        let local_key = storage.local_key()?;
        let key = match bootstrap {
            Some(key) => key,
            None => storage.bootstrap()?.unwrap_or(local_key),
        };
        storage.set_bootstrap(&key)?;

        let mut state = State::<A> {
            cores: BTreeMap::new(),
            max_clock: 0,
            dirty: true,
            view: A::View::default(),
            writers: WriterSet::new(key),
            applied: 0,
        };
        for node in storage.load_nodes::<A::Value>()? {
            state.insert(node);
        }

        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        let base = Self {
            inner: Arc::new(Inner {
                key,
                local_key,
                storage,
                apply,
                state: RwLock::new(state),
                writable: AtomicBool::new(false),
                feed,
                shutdown,
            }),
        };

        info!(
            "Base opened: key={} local={} bootstrap={}",
            key.short(),
            local_key.short(),
            key == local_key
        );
        Ok(base)
    }

    /// Bootstrap key identifying this log.
    pub fn key(&self) -> WriterKey {
        self.inner.key
    }

    /// This peer's writer key.
    pub fn local_key(&self) -> WriterKey {
        self.inner.local_key
    }

    /// Whether the local writer was in the writer set at the last update.
    pub fn writable(&self) -> bool {
        self.inner.writable.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Rebuild the view if new nodes arrived since the last update.
    pub async fn update(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let mut state = self.inner.state.write().await;
        if !state.dirty {
            return Ok(());
        }

        let result = linearize(&self.inner.apply, self.inner.key, &state.cores);
        let writable = result.writers.contains(&self.inner.local_key);
        state.view = result.view;
        state.writers = result.writers;
        state.applied = result.applied;
        state.dirty = false;

        if writable != self.inner.writable.swap(writable, Ordering::AcqRel) {
            info!("Local writer {} writable={}", self.inner.local_key.short(), writable);
        }
        Ok(())
    }

    /// Append an operation to the local core.
    pub async fn append(&self, value: A::Value) -> Result<Node<A::Value>> {
        self.append_node(Some(value)).await
    }

    async fn append_node(&self, value: Option<A::Value>) -> Result<Node<A::Value>> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        if !self.writable() {
            return Err(Error::NotWritable);
        }

        let node = {
            let mut state = self.inner.state.write().await;
            let node = Node {
                writer: self.inner.local_key,
                seq: state.core_len(&self.inner.local_key),
                clock: state.max_clock + 1,
                value,
            };
            self.inner.storage.put_node(&node)?;
            state.insert(node.clone());
            node
        };

        let _ = self.inner.feed.send(Arc::new(vec![node.clone()]));
        Ok(node)
    }

    /// Append an ack node if another writer has a node at or past our last one.
    ///
    /// Returns whether a node was appended.
    pub async fn ack(&self) -> Result<bool> {
        if !self.writable() {
            return Ok(false);
        }
        let behind = {
            let state = self.inner.state.read().await;
            let local = self.inner.local_key;
            let head = state
                .cores
                .get(&local)
                .and_then(|core| core.last())
                .map_or(0, |node| node.clock);
            let remote = state
                .cores
                .iter()
                .filter(|(key, _)| **key != local)
                .filter_map(|(_, core)| core.last())
                .map(|node| node.clock)
                .max();
            matches!(remote, Some(clock) if clock >= head)
        };
        if behind {
            self.append_node(None).await?;
        }
        Ok(behind)
    }

    /// Read the view as of the last update.
    pub async fn view<R>(&self, f: impl FnOnce(&A::View) -> R) -> R {
        let state = self.inner.state.read().await;
        f(&state.view)
    }

    /// Current writer set as of the last update.
    pub async fn writers(&self) -> WriterSet {
        self.inner.state.read().await.writers.clone()
    }

    /// Nodes applied by the last update, ack nodes included.
    pub async fn applied(&self) -> usize {
        self.inner.state.read().await.applied
    }

    /// Total nodes known across all cores.
    pub async fn node_count(&self) -> usize {
        self.inner.state.read().await.cores.values().map(Vec::len).sum()
    }

    /// Replicate with a peer over `stream` until either side stops.
    pub async fn replicate<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        run_session(self.clone(), stream).await
    }

    /// Stop replication sessions and flush storage.
    pub async fn close(&self) -> Result<()> {
        if self.inner.shutdown.send_replace(true) {
            return Ok(());
        }
        self.inner.storage.flush()?;
        debug!("Base {} closed", self.inner.key.short());
        Ok(())
    }

    // --- Replication plumbing ---

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Feed<A::Value>> {
        self.inner.feed.subscribe()
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    pub(crate) async fn hello(&self) -> Wire<A::Value> {
        let state = self.inner.state.read().await;
        Wire::Hello {
            base: self.inner.key,
            have: state
                .cores
                .iter()
                .map(|(key, core)| (*key, core.len() as u64))
                .collect(),
        }
    }

    /// Every node beyond what `have` reports.
    pub(crate) async fn missing(&self, have: &BTreeMap<WriterKey, u64>) -> Vec<Node<A::Value>> {
        let state = self.inner.state.read().await;
        state
            .cores
            .iter()
            .flat_map(|(key, core)| {
                let from = have.get(key).copied().unwrap_or(0) as usize;
                core.iter().skip(from).cloned()
            })
            .collect()
    }

    /// Accept nodes from a peer. Returns true if a gap was seen.
    pub(crate) async fn receive(&self, nodes: Vec<Node<A::Value>>) -> Result<bool> {
        let mut gap = false;
        let mut accepted = Vec::new();
        {
            let mut state = self.inner.state.write().await;
            for node in nodes {
                let len = state.core_len(&node.writer);
                if node.seq > len {
                    gap = true;
                    continue;
                }
                if node.seq < len {
                    continue;
                }
                self.inner.storage.put_node(&node)?;
                state.insert(node.clone());
                accepted.push(node);
            }
        }

        if !accepted.is_empty() {
            let _ = self.inner.feed.send(Arc::new(accepted));
        }
        Ok(gap)
    }
}

//! In-process swarm.
//!
//! Every [`MemorySwarm`] created from the same [`Rendezvous`] can find the
//! others. Joining a channel connects to each swarm already announced on it
//! with a `tokio::io::duplex` pipe, so peers in one test process talk over
//! real async byte streams without sockets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::error::{Error, Result};
use crate::{Connection, Discovery, DiscoveryId, Flushed, JoinOptions, Swarm};

/// Default capacity of each in-memory pipe, in bytes.
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

struct Member {
    swarm: u64,
    name: String,
    options: JoinOptions,
    tx: mpsc::UnboundedSender<Connection>,
}

/// Shared meeting point for in-process swarms.
#[derive(Clone, Default)]
pub struct Rendezvous {
    channels: Arc<Mutex<HashMap<DiscoveryId, Vec<Member>>>>,
    next_swarm: Arc<AtomicU64>,
}

impl Rendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of swarms announced on a channel.
    pub async fn members(&self, id: &DiscoveryId) -> usize {
        self.channels.lock().await.get(id).map_or(0, Vec::len)
    }

    async fn withdraw(&self, swarm: u64, id: Option<DiscoveryId>) {
        let mut channels = self.channels.lock().await;
        match id {
            Some(id) => {
                if let Some(members) = channels.get_mut(&id) {
                    members.retain(|m| m.swarm != swarm);
                }
            }
            None => {
                for members in channels.values_mut() {
                    members.retain(|m| m.swarm != swarm);
                }
            }
        }
        channels.retain(|_, members| !members.is_empty());
    }
}

/// A swarm whose peers live in the same process.
pub struct MemorySwarm {
    id: u64,
    name: String,
    rendezvous: Rendezvous,
    capacity: usize,
    destroyed: AtomicBool,
}

impl MemorySwarm {
    /// Create a swarm that announces itself under `name`.
    pub fn new(rendezvous: &Rendezvous, name: impl Into<String>) -> Self {
        Self {
            id: rendezvous.next_swarm.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            rendezvous: rendezvous.clone(),
            capacity: DEFAULT_PIPE_CAPACITY,
            destroyed: AtomicBool::new(false),
        }
    }

    /// Override the per-pipe buffer size.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Swarm for MemorySwarm {
    async fn join_with(&self, id: DiscoveryId, options: JoinOptions) -> Result<Discovery> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(Error::Destroyed);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut channels = self.rendezvous.channels.lock().await;
        let members = channels.entry(id).or_default();

        // Drop our own earlier announcement and anyone whose receiver is gone.
        members.retain(|m| m.swarm != self.id && !m.tx.is_closed());

        for member in members.iter() {
            let we_dial = options.client && member.options.server;
            let they_dial = member.options.client && options.server;
            if !(we_dial || they_dial) {
                continue;
            }

            let (ours, theirs) = tokio::io::duplex(self.capacity);
            let delivered = member.tx.send(Connection {
                peer: self.name.clone(),
                stream: Box::new(theirs),
            });
            if delivered.is_err() {
                continue;
            }
            debug!("{} connected to {} on {}", self.name, member.name, id);
            let _ = tx.send(Connection {
                peer: member.name.clone(),
                stream: Box::new(ours),
            });
        }

        members.push(Member {
            swarm: self.id,
            name: self.name.clone(),
            options,
            tx,
        });

        Ok(Discovery::new(id, rx, Flushed::ready()))
    }

    async fn leave(&self, id: DiscoveryId) -> Result<()> {
        self.rendezvous.withdraw(self.id, Some(id)).await;
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.destroyed.store(true, Ordering::Release);
        self.rendezvous.withdraw(self.id, None).await;
        debug!("{} destroyed", self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_protocols::derive_ids;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn late_joiner_connects_to_existing_member() {
        let rendezvous = Rendezvous::new();
        let a = MemorySwarm::new(&rendezvous, "a");
        let b = MemorySwarm::new(&rendezvous, "b");
        let topic = derive_ids("room").data;

        let (mut a_rx, _) = a.join(topic).await.unwrap().split();
        let (mut b_rx, _) = b.join(topic).await.unwrap().split();

        let mut at_a = a_rx.recv().await.unwrap();
        let mut at_b = b_rx.recv().await.unwrap();
        assert_eq!(at_a.peer, "b");
        assert_eq!(at_b.peer, "a");

        at_a.stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        at_b.stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let rendezvous = Rendezvous::new();
        let a = MemorySwarm::new(&rendezvous, "a");
        let b = MemorySwarm::new(&rendezvous, "b");
        let ids = derive_ids("room");

        let (mut a_rx, _) = a.join(ids.data).await.unwrap().split();
        let (_b_rx, _) = b.join(ids.key).await.unwrap().split();

        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn destroy_withdraws_announcements() {
        let rendezvous = Rendezvous::new();
        let a = MemorySwarm::new(&rendezvous, "a");
        let topic = derive_ids("room").key;

        let _discovery = a.join(topic).await.unwrap();
        assert_eq!(rendezvous.members(&topic).await, 1);

        a.destroy().await.unwrap();
        assert_eq!(rendezvous.members(&topic).await, 0);
        assert!(matches!(a.join(topic).await, Err(Error::Destroyed)));
    }

    #[tokio::test]
    async fn client_only_peers_do_not_meet() {
        let rendezvous = Rendezvous::new();
        let a = MemorySwarm::new(&rendezvous, "a");
        let b = MemorySwarm::new(&rendezvous, "b");
        let topic = derive_ids("room").data;
        let client = JoinOptions {
            server: false,
            client: true,
        };

        let (mut a_rx, _) = a.join_with(topic, client).await.unwrap().split();
        let (mut b_rx, _) = b.join_with(topic, client).await.unwrap().split();

        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_err());
    }
}

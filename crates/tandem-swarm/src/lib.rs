//! Tandem Swarm - Topic-based peer discovery
//!
//! A [`Swarm`] joins rendezvous channels identified by a [`DiscoveryId`] and
//! hands back every duplex connection formed on that channel, inbound or
//! outbound. What runs over a connection is the caller's business.
//!
//! Two transports ship with the crate:
//!
//! - [`MemorySwarm`]: in-process peers meeting at a shared [`Rendezvous`]
//! - [`TcpSwarm`]: real sockets, dialing a static list of peer addresses
//!
//! # Example
//!
//! ```rust
//! use tandem_protocols::derive_ids;
//! use tandem_swarm::{MemorySwarm, Rendezvous, Swarm};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tandem_swarm::Result<()> {
//! let rendezvous = Rendezvous::new();
//! let a = MemorySwarm::new(&rendezvous, "a");
//! let b = MemorySwarm::new(&rendezvous, "b");
//!
//! let topic = derive_ids("room").key;
//! let (mut a_conns, a_flushed) = a.join(topic).await?.split();
//! let (_b_conns, _) = b.join(topic).await?.split();
//! a_flushed.wait().await;
//!
//! let conn = a_conns.recv().await.expect("b dialed a");
//! assert_eq!(conn.peer, "b");
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod memory;
pub mod tcp;

use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};

pub use error::{is_disconnect, Error, Result};
pub use memory::{MemorySwarm, Rendezvous};
pub use tandem_protocols::DiscoveryId;
pub use tcp::{TcpSwarm, TcpSwarmConfig};

/// Any duplex byte stream.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// Type-erased connection stream.
pub type BoxedStream = Box<dyn AsyncStream>;

/// A duplex connection formed on a discovery channel.
pub struct Connection {
    /// Human label for the remote end (address or swarm name).
    pub peer: String,
    pub stream: BoxedStream,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("peer", &self.peer).finish()
    }
}

/// Whether to accept and/or dial on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOptions {
    pub server: bool,
    pub client: bool,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            server: true,
            client: true,
        }
    }
}

/// Resolves once the initial announce/dial round for a join has finished.
#[derive(Debug, Clone)]
pub struct Flushed(watch::Receiver<bool>);

impl Flushed {
    /// Create a flushed signal and the sender that completes it.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self(rx))
    }

    /// A signal that is already complete.
    pub fn ready() -> Self {
        let (_, rx) = watch::channel(true);
        Self(rx)
    }

    /// Wait for the flush. Also returns if the swarm went away first.
    pub async fn wait(mut self) {
        let _ = self.0.wait_for(|done| *done).await;
    }
}

/// The result of joining a discovery channel.
#[derive(Debug)]
pub struct Discovery {
    pub id: DiscoveryId,
    connections: mpsc::UnboundedReceiver<Connection>,
    flushed: Flushed,
}

impl Discovery {
    pub fn new(
        id: DiscoveryId,
        connections: mpsc::UnboundedReceiver<Connection>,
        flushed: Flushed,
    ) -> Self {
        Self {
            id,
            connections,
            flushed,
        }
    }

    /// Separate the connection stream from the flush signal.
    pub fn split(self) -> (mpsc::UnboundedReceiver<Connection>, Flushed) {
        (self.connections, self.flushed)
    }
}

/// A topic-based discovery transport.
///
/// Futures are `Send` so joins can be driven from spawned tasks.
pub trait Swarm: Send + Sync + 'static {
    /// Join a channel with the given options.
    fn join_with(
        &self,
        id: DiscoveryId,
        options: JoinOptions,
    ) -> impl Future<Output = Result<Discovery>> + Send;

    /// Join a channel as both server and client.
    fn join(&self, id: DiscoveryId) -> impl Future<Output = Result<Discovery>> + Send {
        self.join_with(id, JoinOptions::default())
    }

    /// Stop announcing on a channel. Live connections are left alone.
    fn leave(&self, id: DiscoveryId) -> impl Future<Output = Result<()>> + Send;

    /// Leave every channel and stop accepting connections.
    fn destroy(&self) -> impl Future<Output = Result<()>> + Send;
}

/// A swarm plus whether its holder is responsible for destroying it.
///
/// An instance that built its own swarm owns it; a swarm passed in from
/// outside is shared and only released, never destroyed, on close.
#[derive(Debug)]
pub struct SwarmHandle<S> {
    swarm: Arc<S>,
    owned: bool,
}

impl<S: Swarm> SwarmHandle<S> {
    /// A swarm this holder destroys on release.
    pub fn owned(swarm: S) -> Self {
        Self {
            swarm: Arc::new(swarm),
            owned: true,
        }
    }

    /// A swarm shared with other holders.
    pub fn shared(swarm: Arc<S>) -> Self {
        Self {
            swarm,
            owned: false,
        }
    }

    pub fn swarm(&self) -> &Arc<S> {
        &self.swarm
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Tear down what this holder is responsible for.
    ///
    /// Owned swarms are destroyed; shared swarms only leave `joined`.
    pub async fn release(&self, joined: &[DiscoveryId]) -> Result<()> {
        if self.owned {
            self.swarm.destroy().await
        } else {
            for id in joined {
                self.swarm.leave(*id).await?;
            }
            Ok(())
        }
    }
}

impl<S> Clone for SwarmHandle<S> {
    fn clone(&self) -> Self {
        Self {
            swarm: Arc::clone(&self.swarm),
            owned: self.owned,
        }
    }
}

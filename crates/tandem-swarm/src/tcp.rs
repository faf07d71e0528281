//! TCP swarm with static peer addresses.
//!
//! Rendezvous is replaced by a fixed peer list: joining a channel dials every
//! configured peer and opens the connection with a one-line preamble,
//! `JOIN:<discovery id hex>`, which the acceptor uses to route the stream to
//! the matching channel. Connections for channels nobody joined are dropped.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::{Connection, Discovery, DiscoveryId, Flushed, JoinOptions, Swarm};

const PREAMBLE: &str = "JOIN";

/// Configuration for a TCP swarm.
#[derive(Debug, Clone)]
pub struct TcpSwarmConfig {
    /// Address to accept connections on.
    pub listen: SocketAddr,
    /// Peers dialed on every join.
    pub peers: Vec<SocketAddr>,
    /// Give up on a dial or preamble read after this long.
    pub connect_timeout: Duration,
}

impl Default for TcpSwarmConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 9000)),
            peers: Vec::new(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

type Routes = Arc<Mutex<HashMap<DiscoveryId, mpsc::UnboundedSender<Connection>>>>;

/// A swarm over plain TCP.
pub struct TcpSwarm {
    local_addr: SocketAddr,
    config: TcpSwarmConfig,
    routes: Routes,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpSwarm {
    /// Bind the listener and start accepting.
    pub async fn bind(config: TcpSwarmConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen).await?;
        let local_addr = listener.local_addr()?;
        info!("Swarm (TCP) listening on {}", local_addr);

        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&routes),
            config.connect_timeout,
        ));

        Ok(Self {
            local_addr,
            config,
            routes,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    /// The address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

async fn accept_loop(listener: TcpListener, routes: Routes, read_timeout: Duration) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("Incoming swarm connection from {}", addr);
                let routes = Arc::clone(&routes);
                tokio::spawn(async move {
                    if let Err(e) = route_inbound(stream, addr, routes, read_timeout).await {
                        debug!("Dropped inbound connection from {}: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                warn!("Accept error: {}", e);
            }
        }
    }
}

async fn route_inbound(
    stream: TcpStream,
    addr: SocketAddr,
    routes: Routes,
    read_timeout: Duration,
) -> Result<()> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    timeout(read_timeout, reader.read_line(&mut line))
        .await
        .map_err(|_| Error::Protocol("preamble timeout".into()))??;

    let id = line
        .trim()
        .strip_prefix(PREAMBLE)
        .and_then(|rest| rest.strip_prefix(':'))
        .and_then(DiscoveryId::from_hex)
        .ok_or_else(|| Error::Protocol(format!("bad preamble {:?}", line.trim())))?;

    let routes = routes.lock().await;
    let tx = routes
        .get(&id)
        .ok_or_else(|| Error::Protocol(format!("not joined to {}", id)))?;
    // The BufReader keeps any bytes read past the preamble.
    tx.send(Connection {
        peer: addr.to_string(),
        stream: Box::new(reader),
    })
    .map_err(|_| Error::Protocol(format!("channel {} closed", id)))
}

async fn dial(addr: SocketAddr, id: DiscoveryId, connect_timeout: Duration) -> Result<TcpStream> {
    let mut stream = timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::Protocol(format!("connect to {} timed out", addr)))??;
    stream
        .write_all(format!("{PREAMBLE}:{}\n", id.to_hex()).as_bytes())
        .await?;
    Ok(stream)
}

impl Swarm for TcpSwarm {
    async fn join_with(&self, id: DiscoveryId, options: JoinOptions) -> Result<Discovery> {
        if self.accept_task.lock().await.is_none() {
            return Err(Error::Destroyed);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if options.server {
            self.routes.lock().await.insert(id, tx.clone());
        }

        let (flushed_tx, flushed) = Flushed::channel();
        let peers = if options.client {
            self.config.peers.clone()
        } else {
            Vec::new()
        };
        let connect_timeout = self.config.connect_timeout;
        tokio::spawn(async move {
            for addr in peers {
                match dial(addr, id, connect_timeout).await {
                    Ok(stream) => {
                        info!("Connected to swarm peer {} on {}", addr, id);
                        let _ = tx.send(Connection {
                            peer: addr.to_string(),
                            stream: Box::new(stream),
                        });
                    }
                    Err(e) => warn!("Failed to connect to swarm peer {}: {}", addr, e),
                }
            }
            let _ = flushed_tx.send(true);
        });

        Ok(Discovery::new(id, rx, flushed))
    }

    async fn leave(&self, id: DiscoveryId) -> Result<()> {
        self.routes.lock().await.remove(&id);
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        if let Some(task) = self.accept_task.lock().await.take() {
            task.abort();
        }
        self.routes.lock().await.clear();
        info!("Swarm (TCP) on {} destroyed", self.local_addr);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_protocols::derive_ids;
    use tokio::io::AsyncReadExt;

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[tokio::test]
    async fn dialer_reaches_acceptor_channel() {
        let server = TcpSwarm::bind(TcpSwarmConfig {
            listen: loopback(),
            ..Default::default()
        })
        .await
        .unwrap();
        let client = TcpSwarm::bind(TcpSwarmConfig {
            listen: loopback(),
            peers: vec![server.local_addr()],
            ..Default::default()
        })
        .await
        .unwrap();
        let topic = derive_ids("room").key;

        let (mut server_rx, _) = server.join(topic).await.unwrap().split();
        let (mut client_rx, flushed) = client.join(topic).await.unwrap().split();
        flushed.wait().await;

        let mut outbound = client_rx.recv().await.unwrap();
        outbound.stream.write_all(b"hello\n").await.unwrap();

        let mut inbound = server_rx.recv().await.unwrap();
        let mut buf = [0u8; 6];
        inbound.stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello\n");

        client.destroy().await.unwrap();
        server.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_peer_still_flushes() {
        let client = TcpSwarm::bind(TcpSwarmConfig {
            listen: loopback(),
            peers: vec![SocketAddr::from(([127, 0, 0, 1], 1))],
            connect_timeout: Duration::from_millis(200),
        })
        .await
        .unwrap();

        let (_rx, flushed) = client.join(derive_ids("room").data).await.unwrap().split();
        flushed.wait().await;
        client.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn destroyed_swarm_rejects_join() {
        let swarm = TcpSwarm::bind(TcpSwarmConfig {
            listen: loopback(),
            ..Default::default()
        })
        .await
        .unwrap();
        swarm.destroy().await.unwrap();
        assert!(matches!(
            swarm.join(derive_ids("room").data).await,
            Err(Error::Destroyed)
        ));
    }
}

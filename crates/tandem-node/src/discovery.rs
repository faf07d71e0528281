//! Bootstrap key discovery over the key channel.
//!
//! A fresh peer that knows only the topic joins the key channel and listens
//! for the first `BASE_KEY` line any existing peer greets it with.

use std::time::Duration;

use tandem_protocols::{derive_ids, Field, LineDecoder, WriterKey};
use tandem_swarm::{Connection, Swarm};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::error::Result;

/// Learn the bootstrap key of the log on `topic`.
///
/// Returns `None` if no peer announced a valid key within `timeout`. The key
/// channel is left again before returning.
pub async fn discover_bootstrap_key<S: Swarm>(
    swarm: &S,
    topic: &str,
    timeout: Duration,
) -> Result<Option<WriterKey>> {
    let id = derive_ids(topic).key;
    let (mut connections, _) = swarm.join(id).await?.split();
    let (found_tx, mut found_rx) = mpsc::unbounded_channel();
    let mut readers = JoinSet::new();

    let search = async {
        loop {
            tokio::select! {
                Some(conn) = connections.recv() => {
                    readers.spawn(read_base_key(conn, found_tx.clone()));
                }
                key = found_rx.recv() => return key,
            }
        }
    };
    let found = tokio::time::timeout(timeout, search).await.ok().flatten();

    readers.shutdown().await;
    swarm.leave(id).await?;

    match found {
        Some(key) => info!("Discovered bootstrap key {} for {}", key.short(), topic),
        None => debug!("No bootstrap key announced for {} within {:?}", topic, timeout),
    }
    Ok(found)
}

async fn read_base_key(conn: Connection, found: mpsc::UnboundedSender<WriterKey>) {
    let mut stream = conn.stream;
    let mut decoder = LineDecoder::new();
    let mut buf = [0u8; 1024];

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        for field in decoder.feed(&buf[..n]) {
            if let Field::BaseKey(hex) = field {
                match WriterKey::from_hex(&hex) {
                    Ok(key) => {
                        let _ = found.send(key);
                        return;
                    }
                    Err(e) => debug!("Ignoring BASE_KEY from {}: {}", conn.peer, e),
                }
            }
        }
    }
}

//! Core replication over a duplex stream.
//!
//! JSON lines in both directions:
//!
//! ```text
//! {"type":"hello","base":"<bootstrap hex>","have":{"<writer hex>":<len>,...}}
//! {"type":"nodes","nodes":[{...},...]}
//! ```
//!
//! Each side opens with `hello`. A `hello` is answered with every node the
//! sender lacks. After that, nodes appended or accepted locally are flooded
//! to every session as they arrive. A node is accepted only if it extends its
//! core contiguously; a gap is answered with a fresh `hello`, which makes the
//! peer resend what is missing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tandem_protocols::WriterKey;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, trace};

use crate::base::{Base, Feed};
use crate::error::Result;
use crate::node::{Apply, Node};

/// Most nodes carried by one `nodes` message.
pub const MAX_BATCH: usize = 256;

/// A replication message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Wire<V> {
    Hello {
        base: WriterKey,
        have: BTreeMap<WriterKey, u64>,
    },
    Nodes {
        nodes: Vec<Node<V>>,
    },
}

type Outbox = mpsc::UnboundedSender<Vec<u8>>;

fn queue<V: Serialize>(out: &Outbox, msg: &Wire<V>) -> Result<()> {
    let mut line = serde_json::to_vec(msg)?;
    line.push(b'\n');
    // A closed outbox means the writer already failed; the session is ending.
    let _ = out.send(line);
    Ok(())
}

fn queue_nodes<V: Serialize + Clone>(out: &Outbox, nodes: &[Node<V>]) -> Result<()> {
    for batch in nodes.chunks(MAX_BATCH) {
        queue(out, &Wire::Nodes { nodes: batch.to_vec() })?;
    }
    Ok(())
}

/// Run one replication session until the stream ends or the base closes.
///
/// Writes drain from their own queue, so reading continues while a large
/// batch is in flight.
pub(crate) async fn run_session<A, S>(base: Base<A>, stream: S) -> Result<()>
where
    A: Apply,
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let (reader, writer) = tokio::io::split(stream);
    let (out, outbox) = mpsc::unbounded_channel();
    let feed = base.subscribe();
    let mut shutdown = base.shutdown_signal();
    if *shutdown.borrow_and_update() {
        return Ok(());
    }

    queue(&out, &base.hello().await)?;

    tokio::select! {
        read = read_loop(&base, reader, &out, feed, shutdown) => read,
        written = write_loop(writer, outbox) => written,
    }
}

async fn write_loop<W>(mut writer: W, mut outbox: mpsc::UnboundedReceiver<Vec<u8>>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = outbox.recv().await {
        writer.write_all(&line).await?;
    }
    Ok(())
}

async fn read_loop<A, R>(
    base: &Base<A>,
    reader: R,
    out: &Outbox,
    mut feed: broadcast::Receiver<Feed<A::Value>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    A: Apply,
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("Replication peer closed the stream");
                    break;
                };
                match serde_json::from_str::<Wire<A::Value>>(&line) {
                    Ok(Wire::Hello { base: remote_base, have }) => {
                        if remote_base != base.key() {
                            debug!("Replication peer is on base {}, not ours", remote_base.short());
                            break;
                        }
                        let nodes = base.missing(&have).await;
                        if !nodes.is_empty() {
                            trace!("Sending {} missing nodes", nodes.len());
                            queue_nodes(out, &nodes)?;
                        }
                    }
                    Ok(Wire::Nodes { nodes }) => {
                        if base.receive(nodes).await? {
                            queue(out, &base.hello().await)?;
                        }
                    }
                    Err(e) => debug!("Ignoring undecodable replication line: {}", e),
                }
            }
            fresh = feed.recv() => {
                match fresh {
                    Ok(nodes) => queue_nodes(out, &nodes)?,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Replication feed lagged by {}, resending everything", skipped);
                        queue_nodes(out, &base.missing(&BTreeMap::new()).await)?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            // The flag only ever flips to true.
            _ = shutdown.changed() => break,
        }
    }

    Ok(())
}

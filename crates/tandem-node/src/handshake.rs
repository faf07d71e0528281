//! Key-channel connection handling.
//!
//! Each connection gets our handshake record right away, then every pulse.
//! Records read back from the peer are handed to the [`Authorizer`].

use std::sync::Arc;

use tandem_base::{Apply, Base, WriterKey};
use tandem_protocols::{HandshakeRecord, LineDecoder, RecordAssembler};
use tandem_swarm::{is_disconnect, Connection};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::auth::{Authorizer, WriterState};
use crate::ops::Operation;

/// Read buffer size for key-channel connections.
const READ_BUF: usize = 4096;

/// Shared state for every key-channel connection of one instance.
pub(crate) struct KeyChannel<A: Apply> {
    pub base: Base<A>,
    pub authorizer: Arc<Authorizer>,
    pub record: HandshakeRecord,
    pub pulses: broadcast::Sender<Arc<str>>,
    pub shutdown: watch::Receiver<bool>,
}

impl<A: Apply<Value = Operation>> KeyChannel<A> {
    /// Current greeting, re-encoded so it always carries our keys.
    pub fn greeting(&self) -> Arc<str> {
        Arc::from(self.record.encode())
    }

    /// Serve one connection until it closes or the instance shuts down.
    pub async fn handle_connection(self: Arc<Self>, conn: Connection) {
        let peer = conn.peer;
        let (mut reader, mut writer) = tokio::io::split(conn.stream);
        let mut pulses = self.pulses.subscribe();
        let mut shutdown = self.shutdown.clone();

        if let Err(e) = writer.write_all(self.greeting().as_bytes()).await {
            log_io_error(&peer, &e);
            return;
        }
        let mut state = WriterState::Greeted;
        debug!("Greeted {} on key channel", peer);

        let mut decoder = LineDecoder::new();
        let mut assembler = RecordAssembler::new();
        let mut buf = vec![0u8; READ_BUF];

        loop {
            tokio::select! {
                read = reader.read(&mut buf) => {
                    match read {
                        Ok(0) => {
                            debug!("Key peer {} disconnected ({:?})", peer, state);
                            break;
                        }
                        Ok(n) => {
                            for field in decoder.feed(&buf[..n]) {
                                if let Some(record) = assembler.push(field) {
                                    state = WriterState::Authorizing;
                                    debug!("Key peer {}: {:?}", peer, state);
                                    self.on_record(&peer, record).await;
                                    state = if self.base.writable() {
                                        WriterState::Writable
                                    } else {
                                        WriterState::Waiting
                                    };
                                }
                            }
                        }
                        Err(e) => {
                            log_io_error(&peer, &e);
                            break;
                        }
                    }
                }
                pulse = pulses.recv() => {
                    match pulse {
                        Ok(record) => {
                            if let Err(e) = writer.write_all(record.as_bytes()).await {
                                log_io_error(&peer, &e);
                                break;
                            }
                        }
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn on_record(&self, peer: &str, record: HandshakeRecord) {
        if !record.base_key.is_empty() {
            let ours = self.base.key();
            if WriterKey::from_hex(&record.base_key).ok() != Some(ours) {
                debug!(
                    "Peer {} announced base {}, ours is {}",
                    peer,
                    record.base_key.get(..6).unwrap_or(&record.base_key),
                    ours.short()
                );
            }
        }

        match self.authorizer.authorize(&self.base, &record.writer_key).await {
            Ok(true) => info!("Authorized writer from {}", peer),
            Ok(false) => {}
            Err(e) => warn!("Failed to authorize writer from {}: {}", peer, e),
        }
    }
}

fn log_io_error(peer: &str, e: &std::io::Error) {
    if is_disconnect(e) {
        debug!("Key peer {} went away: {}", peer, e);
    } else {
        warn!("Key channel error with {}: {}", peer, e);
    }
}

//! Replicated instance lifecycle.
//!
//! A [`Replicated`] instance ties a [`Base`] to a swarm:
//!
//! - the **key channel** carries handshake records, so writable peers can
//!   grant peers that want in
//! - the **data channel** replicates the causal log
//!
//! `Constructed -> Readying -> Ready -> Closed`. Writability is a property of
//! the ready state and only ever moves from false to true.

use std::sync::Arc;

use tandem_base::{Base, Storage, WriterKey};
use tandem_protocols::{derive_ids, DiscoveryIds, HandshakeRecord};
use tandem_swarm::{is_disconnect, Connection, Swarm, SwarmHandle};
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn, Instrument, Span};

use crate::auth::{wait_writable, Authorizer};
use crate::config::InstanceConfig;
use crate::discovery::discover_bootstrap_key;
use crate::error::{Error, Result};
use crate::handshake::KeyChannel;
use crate::ops::Operation;
use crate::pulse::run_pulse;
use crate::reducer::Projection;

/// Capacity of the pulse channel.
const PULSE_CAPACITY: usize = 16;

struct Running<A: Projection> {
    base: Base<A>,
    authorizer: Arc<Authorizer>,
    ids: DiscoveryIds,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    span: Span,
}

enum Phase<A: Projection> {
    Constructed(A),
    Readying,
    Ready(Running<A>),
    Closed,
}

impl<A: Projection> Phase<A> {
    fn name(&self) -> &'static str {
        match self {
            Phase::Constructed(_) => "constructed",
            Phase::Readying => "readying",
            Phase::Ready(_) => "ready",
            Phase::Closed => "closed",
        }
    }
}

/// A causal log replicated over a swarm, with writer authorization.
pub struct Replicated<A: Projection, S: Swarm> {
    config: InstanceConfig,
    swarm: SwarmHandle<S>,
    phase: RwLock<Phase<A>>,
}

impl<A: Projection, S: Swarm> Replicated<A, S> {
    pub fn new(config: InstanceConfig, swarm: SwarmHandle<S>, reducer: A) -> Self {
        Self {
            config,
            swarm,
            phase: RwLock::new(Phase::Constructed(reducer)),
        }
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn swarm(&self) -> &SwarmHandle<S> {
        &self.swarm
    }

    /// Open storage, join both channels and start the background tasks.
    ///
    /// May be called once. A failed `ready()` leaves the instance closed,
    /// with any channels it joined released again.
    pub async fn ready(&self) -> Result<()> {
        let reducer = {
            let mut phase = self.phase.write().await;
            match std::mem::replace(&mut *phase, Phase::Readying) {
                Phase::Constructed(reducer) => reducer,
                other => {
                    let actual = other.name();
                    *phase = other;
                    return Err(Error::InvalidState {
                        expected: "constructed",
                        actual,
                    });
                }
            }
        };

        let started = self.start(reducer).await;
        let mut phase = self.phase.write().await;
        match started {
            Ok(running) if matches!(*phase, Phase::Readying) => {
                *phase = Phase::Ready(running);
                Ok(())
            }
            Ok(running) => {
                // close() ran while we were starting.
                drop(phase);
                self.stop(running).await
            }
            Err(e) => {
                *phase = Phase::Closed;
                Err(e)
            }
        }
    }

    async fn start(&self, reducer: A) -> Result<Running<A>> {
        let config = &self.config;
        config.validate()?;
        let storage = Arc::new(Storage::open(&config.storage)?);
        let local_key = storage.local_key()?;
        let span = A::span(config.log_id(), &local_key.short());

        async {
            let bootstrap = match config.bootstrap {
                Some(key) => Some(key),
                None if config.discover_bootstrap && storage.bootstrap()?.is_none() => {
                    discover_bootstrap_key(
                        self.swarm.swarm().as_ref(),
                        &config.topic,
                        config.discovery_timeout,
                    )
                    .await?
                }
                None => None,
            };

            let base = Base::open(storage, bootstrap, reducer)?;
            let (shutdown, shutdown_rx) = watch::channel(false);
            let mut running = Running {
                base,
                authorizer: Arc::new(Authorizer::new(local_key)),
                ids: derive_ids(&config.topic),
                shutdown,
                tasks: Vec::new(),
                span: Span::current(),
            };

            match self.launch(&mut running, shutdown_rx).await {
                Ok(()) => Ok::<_, Error>(running),
                Err(e) => {
                    warn!("Start failed, tearing down: {}", e);
                    if let Err(stop_err) = self.stop(running).await {
                        warn!("Teardown after failed start: {}", stop_err);
                    }
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Join both channels and spawn the background tasks into `running`.
    async fn launch(
        &self,
        running: &mut Running<A>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let config = &self.config;
        let base = &running.base;
        let (pulses, _) = broadcast::channel(PULSE_CAPACITY);
        let record = HandshakeRecord::new(config.topic.clone(), &base.key(), &base.local_key());

        let key_channel = Arc::new(KeyChannel {
            base: base.clone(),
            authorizer: Arc::clone(&running.authorizer),
            record,
            pulses: pulses.clone(),
            shutdown: shutdown.clone(),
        });
        let greeting = key_channel.greeting();

        let (key_conns, key_flushed) = self.swarm.swarm().join(running.ids.key).await?.split();
        running.tasks.push(tokio::spawn(
            accept_key_connections(key_channel, key_conns, shutdown.clone()).in_current_span(),
        ));
        let (data_conns, data_flushed) = self.swarm.swarm().join(running.ids.data).await?.split();
        running.tasks.push(tokio::spawn(
            accept_data_connections(base.clone(), data_conns, shutdown.clone()).in_current_span(),
        ));

        let flushed = async {
            tokio::join!(key_flushed.wait(), data_flushed.wait());
        };
        if tokio::time::timeout(config.flush_timeout, flushed).await.is_err() {
            warn!("Swarm flush timed out after {:?}", config.flush_timeout);
        }

        running.tasks.push(tokio::spawn(
            run_pulse(base.clone(), greeting, pulses, config.pulse_interval, shutdown)
                .in_current_span(),
        ));

        base.update().await?;
        info!(
            "Ready: topic={} base={} writable={}",
            config.topic,
            base.key().short(),
            base.writable()
        );
        Ok(())
    }

    async fn stop(&self, running: Running<A>) -> Result<()> {
        let Running {
            base,
            ids,
            shutdown,
            tasks,
            span,
            ..
        } = running;

        async move {
            shutdown.send_replace(true);
            // Tasks hold the base, and with it the storage lock.
            for task in tasks {
                if let Err(e) = task.await {
                    warn!("Background task failed: {}", e);
                }
            }
            if let Err(e) = self.swarm.release(&[ids.key, ids.data]).await {
                warn!("Failed to release swarm: {}", e);
            }
            base.close().await?;
            info!("Closed");
            Ok::<_, Error>(())
        }
        .instrument(span)
        .await
    }

    /// Stop background tasks, release the swarm and close storage.
    ///
    /// Owned swarms are destroyed; shared swarms only leave our channels.
    /// Calling `close()` again is a no-op.
    pub async fn close(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.phase.write().await, Phase::Closed);
        match previous {
            Phase::Ready(running) => self.stop(running).await,
            _ => Ok(()),
        }
    }

    async fn running<R>(&self, f: impl FnOnce(&Running<A>) -> R) -> Option<R> {
        match &*self.phase.read().await {
            Phase::Ready(running) => Some(f(running)),
            _ => None,
        }
    }

    /// The base, if ready.
    pub async fn base(&self) -> Option<Base<A>> {
        self.running(|r| r.base.clone()).await
    }

    async fn require_base(&self) -> Result<(Base<A>, Span)> {
        self.running(|r| (r.base.clone(), r.span.clone()))
            .await
            .ok_or(Error::NotReady)
    }

    pub async fn is_ready(&self) -> bool {
        self.running(|_| ()).await.is_some()
    }

    pub async fn base_key(&self) -> Option<WriterKey> {
        self.running(|r| r.base.key()).await
    }

    pub async fn writer_key(&self) -> Option<WriterKey> {
        self.running(|r| r.base.local_key()).await
    }

    pub async fn is_writable(&self) -> bool {
        self.running(|r| r.base.writable()).await.unwrap_or(false)
    }

    /// First six hex characters of the writer key.
    pub async fn short_id(&self) -> Option<String> {
        self.writer_key().await.map(|k| k.short())
    }

    /// Block until the local writer has been granted.
    ///
    /// Never times out on its own: a peer nobody grants waits forever.
    pub async fn wait_writable(&self) -> Result<()> {
        let (base, span) = self.require_base().await?;
        wait_writable(&base, self.config.wait_interval)
            .instrument(span)
            .await
    }

    /// Append an operation, waiting for write access first.
    ///
    /// Like [`wait_writable`](Self::wait_writable), this hangs until some
    /// writable peer grants us.
    pub(crate) async fn submit(&self, op: Operation) -> Result<()> {
        let (base, span) = self.require_base().await?;
        async {
            if !base.writable() {
                wait_writable(&base, self.config.wait_interval).await?;
            }
            base.append(op).await?;
            base.update().await?;
            Ok::<_, Error>(())
        }
        .instrument(span)
        .await
    }

    /// Grant a writer by hex key. Returns whether a grant was appended.
    pub async fn add_writer(&self, key_hex: &str) -> Result<bool> {
        let (base, authorizer, span) = self
            .running(|r| (r.base.clone(), Arc::clone(&r.authorizer), r.span.clone()))
            .await
            .ok_or(Error::NotReady)?;
        authorizer.authorize(&base, key_hex).instrument(span).await
    }

    /// Refresh the view and, if writable, ack what we have seen.
    pub async fn sync(&self) -> Result<()> {
        let (base, span) = self.require_base().await?;
        async {
            base.update().await?;
            if base.writable() {
                if base.ack().await? {
                    debug!("Acked remote nodes");
                }
                base.update().await?;
            }
            Ok::<_, Error>(())
        }
        .instrument(span)
        .await
    }

    /// Update, then read the view. `None` when not ready.
    pub(crate) async fn read<R>(&self, f: impl FnOnce(&A::View) -> R) -> Result<Option<R>> {
        let Some(base) = self.base().await else {
            return Ok(None);
        };
        base.update().await?;
        Ok(Some(base.view(f).await))
    }
}

async fn accept_key_connections<A: Projection>(
    channel: Arc<KeyChannel<A>>,
    mut connections: mpsc::UnboundedReceiver<Connection>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut handlers = JoinSet::new();
    let mut open = true;
    loop {
        tokio::select! {
            conn = connections.recv(), if open => {
                let Some(conn) = conn else {
                    // Left the channel; live connections carry on.
                    open = false;
                    continue;
                };
                debug!("Key connection from {}", conn.peer);
                handlers.spawn(Arc::clone(&channel).handle_connection(conn).in_current_span());
            }
            Some(_) = handlers.join_next() => {}
            _ = shutdown.changed() => break,
        }
    }
    handlers.shutdown().await;
}

async fn accept_data_connections<A: Projection>(
    base: Base<A>,
    mut connections: mpsc::UnboundedReceiver<Connection>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sessions = JoinSet::new();
    let mut open = true;
    loop {
        tokio::select! {
            conn = connections.recv(), if open => {
                let Some(conn) = conn else {
                    open = false;
                    continue;
                };
                let peer = conn.peer;
                let base = base.clone();
                debug!("Data connection from {}", peer);
                sessions.spawn(
                    async move {
                        match base.replicate(conn.stream).await {
                            Ok(()) => debug!("Replication with {} ended", peer),
                            Err(tandem_base::Error::Io(e)) if is_disconnect(&e) => {
                                debug!("Replication peer {} went away: {}", peer, e)
                            }
                            Err(e) => warn!("Replication with {} failed: {}", peer, e),
                        }
                    }
                    .in_current_span(),
                );
            }
            Some(_) = sessions.join_next() => {}
            _ = shutdown.changed() => break,
        }
    }
    sessions.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::LogReducer;
    use std::time::Duration;
    use tandem_protocols::DiscoveryId;
    use tandem_swarm::{Discovery, JoinOptions, MemorySwarm, Rendezvous};
    use tempfile::tempdir;

    /// Memory swarm that refuses to join one channel.
    struct RefusingSwarm {
        inner: MemorySwarm,
        refuse: DiscoveryId,
    }

    impl Swarm for RefusingSwarm {
        async fn join_with(
            &self,
            id: DiscoveryId,
            options: JoinOptions,
        ) -> tandem_swarm::Result<Discovery> {
            if id == self.refuse {
                return Err(tandem_swarm::Error::Protocol("join refused".into()));
            }
            self.inner.join_with(id, options).await
        }

        async fn leave(&self, id: DiscoveryId) -> tandem_swarm::Result<()> {
            self.inner.leave(id).await
        }

        async fn destroy(&self) -> tandem_swarm::Result<()> {
            self.inner.destroy().await
        }
    }

    fn config(dir: &tempfile::TempDir) -> InstanceConfig {
        InstanceConfig::new("failing-start", dir.path())
            .with_pulse_interval(Duration::from_millis(200))
            .with_flush_timeout(Duration::from_millis(200))
    }

    fn refusing_data(rendezvous: &Rendezvous) -> RefusingSwarm {
        RefusingSwarm {
            inner: MemorySwarm::new(rendezvous, "a"),
            refuse: derive_ids("failing-start").data,
        }
    }

    #[tokio::test]
    async fn failed_join_releases_shared_swarm() {
        let dir = tempdir().unwrap();
        let rendezvous = Rendezvous::new();
        let swarm = Arc::new(refusing_data(&rendezvous));
        let log = Replicated::new(
            config(&dir),
            SwarmHandle::shared(Arc::clone(&swarm)),
            LogReducer,
        );

        assert!(matches!(log.ready().await, Err(Error::Swarm(_))));
        assert_eq!(rendezvous.members(&derive_ids("failing-start").key).await, 0);
        assert!(!log.is_ready().await);
        assert!(matches!(
            log.ready().await,
            Err(Error::InvalidState { actual: "closed", .. })
        ));
        log.close().await.unwrap();

        // The shared swarm is still usable and the storage lock is free.
        assert!(swarm.join(derive_ids("other").key).await.is_ok());
        Storage::open(dir.path()).unwrap();
    }

    #[tokio::test]
    async fn failed_join_destroys_owned_swarm() {
        let dir = tempdir().unwrap();
        let rendezvous = Rendezvous::new();
        let log = Replicated::new(
            config(&dir),
            SwarmHandle::owned(refusing_data(&rendezvous)),
            LogReducer,
        );

        assert!(log.ready().await.is_err());
        assert_eq!(rendezvous.members(&derive_ids("failing-start").key).await, 0);
        assert!(matches!(
            log.swarm().swarm().join(derive_ids("other").key).await,
            Err(tandem_swarm::Error::Destroyed)
        ));
    }

    #[tokio::test]
    async fn zero_pulse_interval_is_rejected_before_joining() {
        let dir = tempdir().unwrap();
        let rendezvous = Rendezvous::new();
        let log = Replicated::new(
            config(&dir).with_pulse_interval(Duration::ZERO),
            SwarmHandle::owned(MemorySwarm::new(&rendezvous, "a")),
            LogReducer,
        );

        assert!(matches!(log.ready().await, Err(Error::Config(_))));
        assert_eq!(rendezvous.members(&derive_ids("failing-start").key).await, 0);
    }
}

//! Multi-peer harness for Tandem integration tests.
//!
//! Peers run in one process on a shared [`Rendezvous`], each with its own
//! temporary storage directory.

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tandem_node::{InstanceConfig, SharedKv, SharedLog};
use tandem_swarm::{MemorySwarm, Rendezvous, Swarm, SwarmHandle};
use tempfile::TempDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Upper bound for any single convergence wait.
pub const CONVERGE_TIMEOUT: Duration = Duration::from_secs(15);

static TRACING: Once = Once::new();

/// Install a fmt subscriber filtered by `RUST_LOG` (default `warn`).
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

/// Config with intervals short enough for tests.
pub fn fast_config(topic: &str, dir: &TempDir) -> InstanceConfig {
    InstanceConfig::new(topic, dir.path())
        .with_pulse_interval(Duration::from_millis(100))
        .with_wait_interval(Duration::from_millis(50))
        .with_flush_timeout(Duration::from_millis(500))
}

/// A peer and the storage directory it lives in.
pub struct Peer<T> {
    pub name: String,
    pub dir: TempDir,
    pub node: T,
}

impl<T> std::ops::Deref for Peer<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.node
    }
}

fn temp_dir() -> TempDir {
    match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(e) => panic!("failed to create temp dir: {e}"),
    }
}

/// Build a key/value peer with its own swarm on `rendezvous`.
pub fn kv_peer(
    rendezvous: &Rendezvous,
    name: &str,
    topic: &str,
    configure: impl FnOnce(InstanceConfig) -> InstanceConfig,
) -> Peer<SharedKv<MemorySwarm>> {
    let dir = temp_dir();
    let config = configure(fast_config(topic, &dir).with_log_id(name));
    let node = SharedKv::new(config, SwarmHandle::owned(MemorySwarm::new(rendezvous, name)));
    Peer {
        name: name.to_string(),
        dir,
        node,
    }
}

/// Build a log peer with its own swarm on `rendezvous`.
pub fn log_peer(
    rendezvous: &Rendezvous,
    name: &str,
    topic: &str,
    configure: impl FnOnce(InstanceConfig) -> InstanceConfig,
) -> Peer<SharedLog<MemorySwarm>> {
    let dir = temp_dir();
    let config = configure(fast_config(topic, &dir).with_log_id(name));
    let node = SharedLog::new(config, SwarmHandle::owned(MemorySwarm::new(rendezvous, name)));
    Peer {
        name: name.to_string(),
        dir,
        node,
    }
}

/// Build a log peer on an existing swarm handle.
pub fn log_peer_on<S: Swarm>(name: &str, topic: &str, swarm: SwarmHandle<S>) -> Peer<SharedLog<S>> {
    let dir = temp_dir();
    let node = SharedLog::new(fast_config(topic, &dir).with_log_id(name), swarm);
    Peer {
        name: name.to_string(),
        dir,
        node,
    }
}

/// Poll `check` until it returns true or [`CONVERGE_TIMEOUT`] passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + CONVERGE_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

//! Shared key/value map.

use std::ops::Deref;

use serde_json::Value;
use tandem_swarm::{Swarm, SwarmHandle};

use crate::config::InstanceConfig;
use crate::error::Result;
use crate::instance::Replicated;
use crate::ops::Operation;
use crate::reducer::KvReducer;

/// A map every authorized peer can write to. Last write in log order wins.
pub struct SharedKv<S: Swarm> {
    inner: Replicated<KvReducer, S>,
}

impl<S: Swarm> SharedKv<S> {
    pub fn new(config: InstanceConfig, swarm: SwarmHandle<S>) -> Self {
        Self {
            inner: Replicated::new(config, swarm, KvReducer),
        }
    }

    /// Set `key`. Waits for write access first, without a timeout.
    pub async fn put(&self, key: impl Into<String>, value: Value) -> Result<()> {
        self.inner
            .submit(Operation::Put {
                key: key.into(),
                value,
            })
            .await
    }

    /// Remove `key`. Waits for write access first, without a timeout.
    pub async fn del(&self, key: impl Into<String>) -> Result<()> {
        self.inner.submit(Operation::Del { key: key.into() }).await
    }

    /// Current value of `key`. `None` when absent or not ready.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self
            .inner
            .read(|view| view.get(key).cloned())
            .await?
            .flatten())
    }

    /// Every entry in key order. Empty when not ready.
    pub async fn entries(&self) -> Result<Vec<(String, Value)>> {
        Ok(self
            .inner
            .read(|view| view.entries())
            .await?
            .unwrap_or_default())
    }

    /// Convergence fingerprint: `not-ready` or `<len>-<version>`.
    pub async fn get_hash(&self) -> Result<String> {
        let hash = self
            .inner
            .read(|view| format!("{}-{}", view.len(), view.version()))
            .await?;
        Ok(hash.unwrap_or_else(|| "not-ready".to_string()))
    }
}

impl<S: Swarm> Deref for SharedKv<S> {
    type Target = Replicated<KvReducer, S>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tandem_swarm::{MemorySwarm, Rendezvous};
    use tempfile::tempdir;

    #[tokio::test]
    async fn put_get_del_on_bootstrap() {
        let dir = tempdir().unwrap();
        let rendezvous = Rendezvous::new();
        let kv = SharedKv::new(
            InstanceConfig::new("unit-kv", dir.path())
                .with_pulse_interval(Duration::from_millis(200))
                .with_flush_timeout(Duration::from_millis(500)),
            SwarmHandle::owned(MemorySwarm::new(&rendezvous, "a")),
        );
        assert_eq!(kv.get("status").await.unwrap(), None);
        kv.ready().await.unwrap();

        assert_eq!(kv.get_hash().await.unwrap(), "0-0");
        kv.put("status", json!("online")).await.unwrap();
        kv.put("peers", json!(1)).await.unwrap();
        assert_eq!(kv.get("status").await.unwrap(), Some(json!("online")));
        assert_eq!(kv.get("missing").await.unwrap(), None);

        kv.del("peers").await.unwrap();
        assert_eq!(
            kv.entries().await.unwrap(),
            vec![("status".to_string(), json!("online"))]
        );
        assert_eq!(kv.get_hash().await.unwrap(), "1-3");

        kv.close().await.unwrap();
    }

    #[tokio::test]
    async fn restart_keeps_identity_and_data() {
        let dir = tempdir().unwrap();
        let rendezvous = Rendezvous::new();
        let open = |name: &str| {
            SharedKv::new(
                InstanceConfig::new("unit-kv", dir.path())
                    .with_flush_timeout(Duration::from_millis(500)),
                SwarmHandle::owned(MemorySwarm::new(&rendezvous, name)),
            )
        };

        let first = open("first");
        first.ready().await.unwrap();
        first.put("k", json!("v")).await.unwrap();
        let (writer, base) = (first.writer_key().await, first.base_key().await);
        first.close().await.unwrap();

        let second = open("second");
        second.ready().await.unwrap();
        assert_eq!(second.writer_key().await, writer);
        assert_eq!(second.base_key().await, base);
        assert_eq!(second.get("k").await.unwrap(), Some(json!("v")));
        second.close().await.unwrap();
    }
}

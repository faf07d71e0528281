//! Shared append-only log.

use std::ops::Deref;

use serde_json::Value;
use tandem_swarm::{Swarm, SwarmHandle};

use crate::config::InstanceConfig;
use crate::error::Result;
use crate::instance::Replicated;
use crate::ops::Operation;
use crate::reducer::{LogEntry, LogReducer};

/// Entries returned by [`SharedLog::tail_default`].
pub const DEFAULT_TAIL: usize = 10;

/// A log every authorized peer can append to.
pub struct SharedLog<S: Swarm> {
    inner: Replicated<LogReducer, S>,
}

impl<S: Swarm> SharedLog<S> {
    pub fn new(config: InstanceConfig, swarm: SwarmHandle<S>) -> Self {
        Self {
            inner: Replicated::new(config, swarm, LogReducer),
        }
    }

    /// Append `data` stamped with the current time.
    ///
    /// Waits for write access first, without a timeout.
    pub async fn append(&self, data: Value) -> Result<()> {
        self.inner.submit(Operation::append(data)).await
    }

    /// The last `n` entries, oldest first. Empty when not ready.
    pub async fn tail(&self, n: usize) -> Result<Vec<LogEntry>> {
        Ok(self.inner.read(|view| view.tail(n)).await?.unwrap_or_default())
    }

    pub async fn tail_default(&self) -> Result<Vec<LogEntry>> {
        self.tail(DEFAULT_TAIL).await
    }

    /// Number of entries. Zero when not ready.
    pub async fn len(&self) -> Result<usize> {
        Ok(self.inner.read(|view| view.len()).await?.unwrap_or(0))
    }

    /// Convergence fingerprint: `not-ready`, `empty` or `<len>-<last timestamp>`.
    pub async fn get_hash(&self) -> Result<String> {
        let hash = self
            .inner
            .read(|view| match view.last() {
                Some(last) => format!("{}-{}", view.len(), last.timestamp),
                None => "empty".to_string(),
            })
            .await?;
        Ok(hash.unwrap_or_else(|| "not-ready".to_string()))
    }
}

impl<S: Swarm> Deref for SharedLog<S> {
    type Target = Replicated<LogReducer, S>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

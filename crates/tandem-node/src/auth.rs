//! Writer authorization.
//!
//! A writable peer grants every writer key it hears on the key channel,
//! once, by appending `AddWriter` to the shared log. The grant reaches the
//! requesting peer through replication; [`wait_writable`] polls until the
//! local writer shows up in the writer set.

use std::collections::HashSet;
use std::time::Duration;

use tandem_base::{Apply, Base};
use tandem_protocols::{WriterKey, KEY_HEX_LEN};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::Result;
use crate::ops::Operation;

/// Outcome of checking a remote writer key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Grant(WriterKey),
    /// We cannot append grants yet.
    NotWritable,
    /// Not 64 hex characters.
    Invalid,
    /// Our own key echoed back.
    OwnKey,
    /// Already granted by this process.
    AlreadySeen,
}

/// Decide whether `writer_hex` should be granted.
pub fn decide(
    writer_hex: &str,
    local: &WriterKey,
    writable: bool,
    seen: &HashSet<WriterKey>,
) -> Decision {
    if !writable {
        return Decision::NotWritable;
    }
    if writer_hex.len() != KEY_HEX_LEN {
        return Decision::Invalid;
    }
    let Ok(key) = WriterKey::from_hex(writer_hex) else {
        return Decision::Invalid;
    };
    if key == *local {
        return Decision::OwnKey;
    }
    if seen.contains(&key) {
        return Decision::AlreadySeen;
    }
    Decision::Grant(key)
}

/// Authorization state of the local writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Greeting sent, nothing heard back yet.
    Greeted,
    /// A remote writer key is being checked.
    Authorizing,
    /// Not yet in the writer set.
    Waiting,
    Writable,
}

/// Grant path shared by every key-channel connection of one instance.
pub struct Authorizer {
    local: WriterKey,
    seen: Mutex<HashSet<WriterKey>>,
}

impl Authorizer {
    pub fn new(local: WriterKey) -> Self {
        Self {
            local,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Grant `writer_hex` if [`decide`] allows it. Returns whether a grant
    /// was appended.
    pub async fn authorize<A>(&self, base: &Base<A>, writer_hex: &str) -> Result<bool>
    where
        A: Apply<Value = Operation>,
    {
        let key = {
            let mut seen = self.seen.lock().await;
            match decide(writer_hex, &self.local, base.writable(), &seen) {
                Decision::Grant(key) => {
                    seen.insert(key);
                    key
                }
                decision => {
                    debug!("Not granting {}: {:?}", short_hex(writer_hex), decision);
                    return Ok(false);
                }
            }
        };

        if let Err(e) = base.append(Operation::AddWriter { key }).await {
            self.seen.lock().await.remove(&key);
            return Err(e.into());
        }
        info!("Granted writer {}", key.short());
        base.update().await?;
        Ok(true)
    }

    /// Number of keys granted by this process.
    pub async fn granted(&self) -> usize {
        self.seen.lock().await.len()
    }
}

fn short_hex(s: &str) -> &str {
    s.get(..6).unwrap_or(s)
}

/// Poll `update()` until the local writer is in the writer set.
///
/// There is no timeout; wrap the call in `tokio::time::timeout` to bound it.
pub async fn wait_writable<A: Apply>(base: &Base<A>, interval: Duration) -> Result<()> {
    loop {
        base.update().await?;
        if base.writable() {
            return Ok(());
        }
        debug!("Waiting for write access");
        tokio::time::sleep(interval).await;
    }
}

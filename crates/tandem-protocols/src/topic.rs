//! Topic derivation.
//!
//! A human-readable topic maps to two discovery ids: one for the data channel
//! (causal-log replication) and one for the key channel (writer handshakes).

use std::fmt;

/// Suffix appended to the topic before hashing the key-channel id.
pub const KEY_TOPIC_SUFFIX: &str = ":bootstrap";

/// 32-byte rendezvous identifier for one discovery channel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiscoveryId(pub [u8; 32]);

impl DiscoveryId {
    /// Hash arbitrary bytes into a discovery id.
    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 64 character hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for DiscoveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}...", &self.to_hex()[..8])
    }
}

impl fmt::Debug for DiscoveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DiscoveryId({})", self)
    }
}

/// The pair of discovery ids derived from one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryIds {
    /// Data channel: causal-log replication.
    pub data: DiscoveryId,
    /// Key channel: handshake records.
    pub key: DiscoveryId,
}

/// Derive both discovery ids for a topic.
pub fn derive_ids(topic: &str) -> DiscoveryIds {
    let mut hasher = blake3::Hasher::new();
    hasher.update(topic.as_bytes());
    hasher.update(KEY_TOPIC_SUFFIX.as_bytes());

    DiscoveryIds {
        data: DiscoveryId::hash(topic.as_bytes()),
        key: DiscoveryId(*hasher.finalize().as_bytes()),
    }
}

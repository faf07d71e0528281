//! Persistent storage using RocksDB.
//!
//! Layout:
//!
//! ```text
//! identity:signing_key            32-byte ed25519 seed (the local writer identity)
//! meta:bootstrap                  bootstrap key hex
//! core:<writer hex>:<seq, 20 dig> node JSON
//! ```

use std::path::Path;

use ed25519_dalek::SigningKey;
use rocksdb::{Options, DB};
use serde::{de::DeserializeOwned, Serialize};
use tandem_protocols::WriterKey;

use crate::error::{Error, Result};
use crate::node::Node;

const SIGNING_KEY: &[u8] = b"identity:signing_key";
const BOOTSTRAP: &[u8] = b"meta:bootstrap";
const CORE_PREFIX: &[u8] = b"core:";

fn core_key(writer: &WriterKey, seq: u64) -> String {
    format!("core:{}:{:020}", writer.to_hex(), seq)
}

/// Storage backend for one replicated instance.
pub struct Storage {
    db: DB,
}

impl Storage {
    /// Open or create storage at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        std::fs::create_dir_all(path.as_ref())?;
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }

    // --- Identity ---

    /// Get or create the signing key behind the local writer key.
    pub fn get_or_create_signing_key(&self) -> Result<SigningKey> {
        if let Some(data) = self.db.get(SIGNING_KEY)? {
            let bytes: [u8; 32] = data
                .as_slice()
                .try_into()
                .map_err(|_| Error::Storage("Invalid stored key".into()))?;
            Ok(SigningKey::from_bytes(&bytes))
        } else {
            let mut rng = rand::thread_rng();
            let signing_key = SigningKey::generate(&mut rng);
            self.db.put(SIGNING_KEY, signing_key.as_bytes())?;
            Ok(signing_key)
        }
    }

    /// The local writer key, creating the identity on first use.
    pub fn local_key(&self) -> Result<WriterKey> {
        let signing_key = self.get_or_create_signing_key()?;
        Ok(WriterKey::from_bytes(signing_key.verifying_key().to_bytes()))
    }

    // --- Bootstrap ---

    /// The bootstrap key this storage was last opened with.
    pub fn bootstrap(&self) -> Result<Option<WriterKey>> {
        match self.db.get(BOOTSTRAP)? {
            Some(data) => {
                let hex = String::from_utf8_lossy(&data);
                Ok(Some(WriterKey::from_hex(&hex)?))
            }
            None => Ok(None),
        }
    }

    /// Remember the bootstrap key.
    pub fn set_bootstrap(&self, key: &WriterKey) -> Result<()> {
        self.db.put(BOOTSTRAP, key.to_hex().as_bytes())?;
        Ok(())
    }

    // --- Cores ---

    /// Store a node.
    pub fn put_node<V: Serialize>(&self, node: &Node<V>) -> Result<()> {
        let value = serde_json::to_vec(node)?;
        self.db
            .put(core_key(&node.writer, node.seq).as_bytes(), value)?;
        Ok(())
    }

    /// Load every stored node, grouped by writer and in sequence order.
    pub fn load_nodes<V: DeserializeOwned>(&self) -> Result<Vec<Node<V>>> {
        let mut nodes = Vec::new();

        let iter = self.db.prefix_iterator(CORE_PREFIX);
        for item in iter {
            let (key, value) = item?;
            if key.starts_with(CORE_PREFIX) {
                nodes.push(serde_json::from_slice(&value)?);
            } else {
                break;
            }
        }

        Ok(nodes)
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn identity_is_stable() {
        let dir = tempdir().unwrap();
        let first = Storage::open(dir.path()).unwrap().local_key().unwrap();
        let second = Storage::open(dir.path()).unwrap().local_key().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn bootstrap_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        assert_eq!(storage.bootstrap().unwrap(), None);

        let key = WriterKey::from_bytes([7; 32]);
        storage.set_bootstrap(&key).unwrap();
        assert_eq!(storage.bootstrap().unwrap(), Some(key));
    }

    #[test]
    fn nodes_load_in_core_order() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let writer = WriterKey::from_bytes([3; 32]);

        for seq in [2u64, 0, 10, 1] {
            storage
                .put_node(&Node {
                    writer,
                    seq,
                    clock: seq + 1,
                    value: Some(format!("op-{seq}")),
                })
                .unwrap();
        }

        let nodes: Vec<Node<String>> = storage.load_nodes().unwrap();
        let seqs: Vec<u64> = nodes.iter().map(|n| n.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 10]);
    }
}

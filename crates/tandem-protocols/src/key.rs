//! Fixed-width identities exchanged between peers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Length of a key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of a key rendered as lowercase hex.
pub const KEY_HEX_LEN: usize = KEY_LEN * 2;

/// A peer's local append identity within a causal log.
///
/// The bootstrap key of a log is the `WriterKey` of the peer that created it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WriterKey(pub [u8; KEY_LEN]);

impl WriterKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a 64 character hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != KEY_HEX_LEN {
            return Err(Error::InvalidKeyLength {
                expected: KEY_HEX_LEN,
                actual: s.len(),
            });
        }
        let mut bytes = [0u8; KEY_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| Error::InvalidKey(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First six hex characters, used to tag log lines.
    pub fn short(&self) -> String {
        let mut s = self.to_hex();
        s.truncate(6);
        s
    }
}

impl fmt::Display for WriterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for WriterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WriterKey({}...)", &self.to_hex()[..12])
    }
}

impl FromStr for WriterKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for WriterKey {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::from_hex(&s)
    }
}

impl From<WriterKey> for String {
    fn from(key: WriterKey) -> Self {
        key.to_hex()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let key = WriterKey::from_bytes([0xab; KEY_LEN]);
        let parsed = WriterKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key, parsed);
        assert_eq!(key.short(), "ababab");
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(
            WriterKey::from_hex("abcd"),
            Err(Error::InvalidKeyLength {
                expected: 64,
                actual: 4
            })
        );
    }

    #[test]
    fn rejects_non_hex() {
        let bad = "zz".repeat(KEY_LEN);
        assert!(matches!(WriterKey::from_hex(&bad), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn serde_as_hex_string() {
        let key = WriterKey::from_bytes([1; KEY_LEN]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(KEY_LEN)));
        let back: WriterKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}

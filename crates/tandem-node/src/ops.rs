//! Operations stored in the shared log.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tandem_protocols::WriterKey;

/// One operation in a node.
///
/// ```text
/// {"type":"addWriter","key":"<hex>"}
/// {"type":"put","key":"status","value":"online"}
/// {"type":"del","key":"status"}
/// {"type":"append","data":{...},"timestamp":1700000000000}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Operation {
    AddWriter { key: WriterKey },
    Put { key: String, value: Value },
    Del { key: String },
    Append { data: Value, timestamp: u64 },
}

impl Operation {
    /// An append stamped with the current wall clock.
    pub fn append(data: Value) -> Self {
        Operation::Append {
            data,
            timestamp: now_millis(),
        }
    }
}

/// Unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

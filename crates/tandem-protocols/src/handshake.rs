//! Key-channel handshake line protocol.
//!
//! Every key-channel connection carries newline-terminated `NAME:VALUE`
//! records. A peer announces itself with three lines:
//!
//! ```text
//! TOPIC:<topic>
//! BASE_KEY:<bootstrap key hex>
//! WRITER_KEY:<local writer key hex>
//! ```
//!
//! There is no framing beyond newlines and nothing is authenticated. The
//! decoder is streaming: bytes may arrive split at any position and a partial
//! trailing line is held until its newline shows up.

use crate::key::WriterKey;

/// Field name carrying the human topic.
pub const TOPIC: &str = "TOPIC";
/// Field name carrying the log's bootstrap key.
pub const BASE_KEY: &str = "BASE_KEY";
/// Field name carrying the sender's writer key.
pub const WRITER_KEY: &str = "WRITER_KEY";

/// One peer's announcement on the key channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRecord {
    pub topic: String,
    pub base_key: String,
    pub writer_key: String,
}

impl HandshakeRecord {
    /// Build a record from typed keys.
    pub fn new(topic: impl Into<String>, base_key: &WriterKey, writer_key: &WriterKey) -> Self {
        Self {
            topic: topic.into(),
            base_key: base_key.to_hex(),
            writer_key: writer_key.to_hex(),
        }
    }

    /// Encode as the three-line wire form.
    pub fn encode(&self) -> String {
        encode(&self.topic, &self.base_key, &self.writer_key)
    }

    /// The writer key, if it is a well-formed 64 char hex key.
    pub fn parsed_writer_key(&self) -> Option<WriterKey> {
        WriterKey::from_hex(&self.writer_key).ok()
    }
}

/// Encode a handshake record.
pub fn encode(topic: &str, base_key_hex: &str, writer_key_hex: &str) -> String {
    format!("{TOPIC}:{topic}\n{BASE_KEY}:{base_key_hex}\n{WRITER_KEY}:{writer_key_hex}\n")
}

/// A decoded `NAME:VALUE` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Topic(String),
    BaseKey(String),
    WriterKey(String),
    /// Any other name. Kept so newer peers can add fields.
    Unknown { name: String, value: String },
}

/// Parse one complete line (without its newline).
///
/// Splits on the first colon and trims the value. Returns `None` for lines
/// without a colon.
pub fn parse_line(line: &str) -> Option<Field> {
    let (name, value) = line.split_once(':')?;
    let value = value.trim().to_string();
    Some(match name {
        TOPIC => Field::Topic(value),
        BASE_KEY => Field::BaseKey(value),
        WRITER_KEY => Field::WriterKey(value),
        other => Field::Unknown {
            name: other.to_string(),
            value,
        },
    })
}

/// Longest line [`LineDecoder`] will hold while waiting for its newline.
pub const MAX_LINE: usize = 4096;

/// Streaming line splitter that tolerates partial reads.
///
/// A line that grows past [`MAX_LINE`] without a newline is discarded up to
/// and including its eventual newline.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
    discarding: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every field completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Field> {
        self.buf.extend_from_slice(chunk);

        let mut fields = Vec::new();
        if let Some(last_newline) = self.buf.iter().rposition(|b| *b == b'\n') {
            let rest = self.buf.split_off(last_newline + 1);
            let complete = std::mem::replace(&mut self.buf, rest);

            let mut lines = complete.split(|b| *b == b'\n');
            if std::mem::take(&mut self.discarding) {
                lines.next();
            }
            fields.extend(lines.filter_map(|line| parse_line(&String::from_utf8_lossy(line))));
        }

        if self.buf.len() > MAX_LINE {
            self.buf.clear();
            self.discarding = true;
        }
        fields
    }

    /// Bytes held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Folds decoded fields into complete records.
///
/// A record is emitted for every `WRITER_KEY` line and carries the latest
/// `TOPIC` and `BASE_KEY` seen on the same connection (empty if none yet).
#[derive(Debug, Default)]
pub struct RecordAssembler {
    topic: Option<String>,
    base_key: Option<String>,
}

impl RecordAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push one field; returns a record when it completes one.
    pub fn push(&mut self, field: Field) -> Option<HandshakeRecord> {
        match field {
            Field::Topic(topic) => {
                self.topic = Some(topic);
                None
            }
            Field::BaseKey(key) => {
                self.base_key = Some(key);
                None
            }
            Field::WriterKey(writer_key) => Some(HandshakeRecord {
                topic: self.topic.clone().unwrap_or_default(),
                base_key: self.base_key.clone().unwrap_or_default(),
                writer_key,
            }),
            Field::Unknown { .. } => None,
        }
    }
}

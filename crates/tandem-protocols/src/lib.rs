//! Tandem Protocols - Topic Derivation and the Key-Channel Handshake
//!
//! Peers sharing a log find each other on two rendezvous channels derived from
//! one human topic:
//!
//! - **Data channel** (`BLAKE3(topic)`): replicates causal-log nodes
//! - **Key channel** (`BLAKE3(topic + ":bootstrap")`): carries handshake
//!   records so authorized writers learn the writer keys of peers that want in
//!
//! # Example
//!
//! ```rust
//! use tandem_protocols::{derive_ids, HandshakeRecord, LineDecoder, RecordAssembler, WriterKey};
//!
//! let ids = derive_ids("room-kv");
//! assert_ne!(ids.data, ids.key);
//!
//! let base = WriterKey::from_bytes([1; 32]);
//! let me = WriterKey::from_bytes([2; 32]);
//! let wire = HandshakeRecord::new("room-kv", &base, &me).encode();
//!
//! let mut decoder = LineDecoder::new();
//! let mut assembler = RecordAssembler::new();
//! let records: Vec<_> = decoder
//!     .feed(wire.as_bytes())
//!     .into_iter()
//!     .filter_map(|f| assembler.push(f))
//!     .collect();
//! assert_eq!(records[0].parsed_writer_key(), Some(me));
//! ```

pub mod error;
pub mod handshake;
pub mod key;
pub mod topic;

pub use error::{Error, Result};
pub use handshake::{
    encode, parse_line, Field, HandshakeRecord, LineDecoder, RecordAssembler, MAX_LINE,
};
pub use key::{WriterKey, KEY_HEX_LEN, KEY_LEN};
pub use topic::{derive_ids, DiscoveryId, DiscoveryIds, KEY_TOPIC_SUFFIX};

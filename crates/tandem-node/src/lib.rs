//! Tandem Node - Shared logs and maps among untrusted peers
//!
//! Peers that share a topic converge on one causal log. Any peer may ask to
//! write; a peer becomes a writer once an existing writer grants it.
//!
//! ## Architecture
//!
//! - **Key channel**: every connection is greeted with our handshake record
//!   (`TOPIC`, `BASE_KEY`, `WRITER_KEY`); writable peers grant each new
//!   writer key they hear, once
//! - **Data channel**: replicates causal-log nodes
//! - **Pulse**: a periodic `update()` plus a re-announcement on every live
//!   key connection, so late grants still happen
//! - **Projections**: [`LogReducer`] and [`KvReducer`] fold operations into
//!   the views behind [`SharedLog`] and [`SharedKv`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use tandem_node::{InstanceConfig, SharedKv};
//! use tandem_swarm::{MemorySwarm, Rendezvous, SwarmHandle};
//!
//! # async fn example() -> tandem_node::Result<()> {
//! let rendezvous = Rendezvous::new();
//! let kv = SharedKv::new(
//!     InstanceConfig::new("room-kv", "./data/a"),
//!     SwarmHandle::owned(MemorySwarm::new(&rendezvous, "a")),
//! );
//! kv.ready().await?;
//! kv.put("status", json!("online")).await?;
//! assert_eq!(kv.get("status").await?, Some(json!("online")));
//! kv.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod discovery;
pub mod error;
mod handshake;
pub mod instance;
pub mod kv;
pub mod log;
pub mod ops;
pub mod pulse;
pub mod reducer;

pub use auth::{decide, wait_writable, Authorizer, Decision, WriterState};
pub use config::InstanceConfig;
pub use discovery::discover_bootstrap_key;
pub use error::{Error, Result};
pub use instance::Replicated;
pub use kv::SharedKv;
pub use log::{SharedLog, DEFAULT_TAIL};
pub use ops::Operation;
pub use reducer::{KvReducer, KvView, LogEntry, LogReducer, LogView, Projection};

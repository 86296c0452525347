//! Node backend: the index shard daemon and its wire contract
//!
//! A node owns the indexes for a subset of repositories. The search core
//! talks to nodes over a simple length-prefixed JSON protocol on TCP:
//!
//! - `shq serve` daemon: holds repository indexes in memory, answers search
//!   and update requests with a read-after-write guarantee per node
//! - [`NodeClient`]: connects to a node with a hard wall-clock budget
//!
//! Cross-node consistency is explicitly not guaranteed: a write acknowledged
//! by one node is not visible through its peers until their own updates land.

pub mod client;
pub mod protocol;
pub mod server;
pub mod store;

pub use client::NodeClient;
pub use server::NodeServer;

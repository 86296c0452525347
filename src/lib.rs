//! # SHQ - Multi-shard code search engine
//!
//! SHQ executes exact and regex code search across repositories spread over
//! multiple index shards ("nodes"), with node-aware routing, bounded match
//! chunking, and per-node result accounting.
//!
//! ## Architecture
//!
//! The crate is organized into these main modules:
//!
//! - [`routing`] - Node registry, repository membership, scope resolution
//! - [`query`] - Query execution and cross-shard result assembly
//! - [`update`] - Synchronous and queued index update pipeline
//! - [`aggregate`] - Match chunking and per-file caps
//! - [`model`] - Wire-stable result value types
//! - [`node`] - Node daemon, client, and protocol
//! - [`backend`] - Indexed vs. fallback search path selection
//! - [`output`] - Terminal result formatting
//!
//! ## Quick Start
//!
//! ```ignore
//! use shq::config::ClusterConfig;
//! use shq::query::{QueryExecutor, SearchQuery};
//! use shq::routing::{RepositoryId, Scope};
//! use std::path::Path;
//!
//! let config = ClusterConfig::load(Path::new("cluster.json")).unwrap();
//! let registry = config.registry().unwrap();
//!
//! let executor = QueryExecutor::new(&registry, &config);
//! let query = SearchQuery::new("fn main", Scope::Project(RepositoryId(1)));
//! let results = executor.search(&query).unwrap();
//!
//! for blob in &results.blobs {
//!     println!("{}: {} matches", blob.path, blob.match_count);
//! }
//! ```
//!
//! ## Consistency
//!
//! A successful index push to a node is immediately visible in queries
//! against that node (read-after-write per node). No guarantee is made
//! across nodes: results spanning shards may be transiently inconsistent
//! right after a write to one of them.

pub mod aggregate;
pub mod backend;
pub mod config;
pub mod error;
pub mod model;
pub mod node;
pub mod output;
pub mod query;
pub mod routing;
pub mod update;

//! Cluster configuration
//!
//! A JSON document describing the nodes, repository memberships, and query
//! policy for one cluster. Loaded once at startup and turned into an
//! [`IndexRegistry`]; the running core never re-reads it.

use crate::aggregate::AggregationLimits;
use crate::error::{SearchError, SearchResult};
use crate::routing::{IndexRegistry, Node, NodeId, Repository};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Assignment of one repository to its owning node
#[derive(Debug, Clone, Deserialize)]
pub struct Membership {
    #[serde(flatten)]
    pub repository: Repository,
    pub node: NodeId,
}

/// Cluster-wide settings for the search core
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Base URL file and blame links are built against
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Wall-clock budget per node for queries, in milliseconds
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Wall-clock budget per node for index pushes, in milliseconds
    #[serde(default = "default_update_timeout_ms")]
    pub update_timeout_ms: u64,
    /// Cross-namespace search is a policy gate, off unless enabled
    #[serde(default)]
    pub allow_namespace_search: bool,
    /// Window for coalescing queued index updates, in milliseconds
    #[serde(default = "default_batch_window_ms")]
    pub update_batch_window_ms: u64,
    /// Chunking bounds; defaults are part of the external contract
    #[serde(default)]
    pub aggregation: AggregationLimits,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub memberships: Vec<Membership>,
}

fn default_base_url() -> String {
    "http://localhost".to_string()
}

fn default_query_timeout_ms() -> u64 {
    30_000
}

fn default_update_timeout_ms() -> u64 {
    30_000
}

fn default_batch_window_ms() -> u64 {
    50
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            query_timeout_ms: default_query_timeout_ms(),
            update_timeout_ms: default_update_timeout_ms(),
            allow_namespace_search: false,
            update_batch_window_ms: default_batch_window_ms(),
            aggregation: AggregationLimits::default(),
            nodes: Vec::new(),
            memberships: Vec::new(),
        }
    }
}

impl ClusterConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> SearchResult<Self> {
        let data = fs::read_to_string(path)
            .map_err(|e| SearchError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&data)
            .map_err(|e| SearchError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Build the routing registry from the configured nodes and memberships.
    pub fn registry(&self) -> SearchResult<IndexRegistry> {
        let mut registry = IndexRegistry::new();
        for node in &self.nodes {
            registry.add_node(node.clone());
        }
        for membership in &self.memberships {
            registry.assign(membership.repository.clone(), membership.node.clone())?;
        }
        Ok(registry)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn update_timeout(&self) -> Duration {
        Duration::from_millis(self.update_timeout_ms)
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.update_batch_window_ms)
    }

    /// URL of a file in the hosting web UI
    pub fn file_url(&self, project_path: &str, ref_name: &str, path: &str) -> String {
        format!(
            "{}/{}/-/blob/{}/{}",
            self.base_url.trim_end_matches('/'),
            project_path,
            ref_name,
            path
        )
    }

    /// URL of a file's blame view
    pub fn blame_url(&self, project_path: &str, ref_name: &str, path: &str) -> String {
        format!(
            "{}/{}/-/blame/{}/{}",
            self.base_url.trim_end_matches('/'),
            project_path,
            ref_name,
            path
        )
    }
}

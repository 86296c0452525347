//! Typed errors for the search core
//!
//! Routing and timeout failures are recoverable: callers fall back to a
//! non-indexed search path or retry with a narrower scope. Node failures
//! during index updates are surfaced per-node rather than swallowed, because
//! silent index staleness is worse than a visible failure. Nothing in this
//! crate panics across the component boundary.

use crate::routing::{NodeId, RepositoryId};
use std::time::Duration;

/// Result type for search core operations
pub type SearchResult<T> = Result<T, SearchError>;

/// Errors produced by routing, querying, and index updates
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Repository has no owning node; caller should use the fallback path
    #[error("repository {0} is not indexed")]
    NotIndexed(RepositoryId),

    /// Node referenced by a membership or pin does not exist in the registry
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    /// Query or update exceeded its wall-clock budget
    #[error("node {node} did not answer within {timeout:?}")]
    Timeout { node: NodeId, timeout: Duration },

    /// Connection to a node failed
    #[error("node {node} unavailable: {source}")]
    NodeUnavailable {
        node: NodeId,
        #[source]
        source: std::io::Error,
    },

    /// Node answered with a malformed or unexpected message
    #[error("protocol error from node {node}: {message}")]
    Protocol { node: NodeId, message: String },

    /// Node answered with an explicit error
    #[error("node {node} reported: {message}")]
    NodeError { node: NodeId, message: String },

    /// Cross-namespace search requested but disabled by configuration
    #[error("namespace-wide search is disabled by configuration")]
    NamespaceSearchDisabled,

    /// A regex term slipped past upstream validation
    #[error("invalid search pattern: {0}")]
    InvalidPattern(String),

    /// Cluster configuration could not be read or parsed
    #[error("invalid cluster configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SearchError {
    /// Whether a query-side failure should degrade to a partial result
    /// instead of failing the whole search.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            SearchError::Timeout { .. }
                | SearchError::NodeUnavailable { .. }
                | SearchError::NodeError { .. }
        )
    }
}

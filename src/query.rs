//! Query executor
//!
//! Executes a search term against the nodes covering a scope and assembles
//! the capped, chunked result set. Every node call carries a hard wall-clock
//! budget; nodes that time out or cannot be reached degrade the result to a
//! partial one instead of failing the query. The executor makes no cross-file
//! ordering promise (results are sorted for determinism only) and enforces no
//! per-blob read permission: callers must filter visibility before rendering,
//! or private content leaks through search.

use crate::aggregate::aggregate;
use crate::config::ClusterConfig;
use crate::error::{SearchError, SearchResult};
use crate::model::FoundBlob;
use crate::node::protocol::SearchResponse;
use crate::node::NodeClient;
use crate::routing::{IndexRegistry, NodeId, RouteTarget, Scope};
use rayon::prelude::*;
use std::time::Duration;

/// An ephemeral search request, created per call
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Literal or regex term. Regex syntax is validated upstream; this
    /// component trusts its input is a valid pattern.
    pub term: String,
    pub regex: bool,
    pub scope: Scope,
    /// Restrict the query to a single node
    pub node: Option<NodeId>,
    /// Per-node wall-clock budget; the configured default when unset
    pub timeout: Option<Duration>,
}

impl SearchQuery {
    pub fn new(term: impl Into<String>, scope: Scope) -> Self {
        Self {
            term: term.into(),
            regex: false,
            scope,
            node: None,
            timeout: None,
        }
    }

    pub fn regex(mut self, regex: bool) -> Self {
        self.regex = regex;
        self
    }

    pub fn pinned_to(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A node that could not contribute to a result set
#[derive(Debug, Clone)]
pub struct NodeFailure {
    pub node: NodeId,
    pub timed_out: bool,
    pub message: String,
}

/// Aggregated results of one search
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    /// Capped, chunked per-file results
    pub blobs: Vec<FoundBlob>,
    /// Number of files with at least one match
    pub file_count: usize,
    /// Matches returned across all files, after capping
    pub match_count: u32,
    /// Matches found across all files, before capping
    pub match_count_total: u32,
    /// At least one node hit its wall-clock budget; results are partial
    pub timed_out: bool,
    /// Nodes that failed or timed out
    pub failures: Vec<NodeFailure>,
}

impl SearchResults {
    /// Whether any node failed to contribute fully
    pub fn degraded(&self) -> bool {
        self.timed_out || !self.failures.is_empty()
    }

    /// Apply the caller's per-blob visibility decision, dropping blobs the
    /// predicate rejects and recomputing the counts. The executor returns
    /// every match it finds; rendering unfiltered results leaks content the
    /// caller is not allowed to read.
    pub fn retain_visible<F>(&mut self, mut is_visible: F)
    where
        F: FnMut(&FoundBlob) -> bool,
    {
        self.blobs.retain(|blob| is_visible(blob));
        self.file_count = self.blobs.len();
        self.match_count = self.blobs.iter().map(|b| b.match_count).sum();
        self.match_count_total = self.blobs.iter().map(|b| b.match_count_total).sum();
    }
}

/// Executes search queries against the cluster
pub struct QueryExecutor<'a> {
    registry: &'a IndexRegistry,
    config: &'a ClusterConfig,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(registry: &'a IndexRegistry, config: &'a ClusterConfig) -> Self {
        Self { registry, config }
    }

    /// Execute a query and return aggregated results.
    ///
    /// `Err` is reserved for routing and policy failures; node-level
    /// timeouts and outages degrade to a partial [`SearchResults`] with the
    /// failing nodes listed.
    pub fn search(&self, query: &SearchQuery) -> SearchResult<SearchResults> {
        if matches!(query.scope, Scope::Namespace(_)) && !self.config.allow_namespace_search {
            return Err(SearchError::NamespaceSearchDisabled);
        }

        let targets = self.plan(query)?;
        let timeout = query.timeout.unwrap_or_else(|| self.config.query_timeout());

        let outcomes: Vec<Result<SearchResponse, SearchError>> = targets
            .par_iter()
            .map(|target| self.query_node(target, query, timeout))
            .collect();

        let mut results = SearchResults::default();

        for (target, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Ok(response) => {
                    results.timed_out |= response.timed_out;
                    for file in response.files {
                        let agg = aggregate(&file.matches, &self.config.aggregation);
                        results.match_count += agg.match_count;
                        results.match_count_total += agg.match_count_total;
                        results.blobs.push(FoundBlob {
                            file_url: self.config.file_url(
                                &file.project_path,
                                &file.ref_name,
                                &file.path,
                            ),
                            blame_url: self.config.blame_url(
                                &file.project_path,
                                &file.ref_name,
                                &file.path,
                            ),
                            path: file.path,
                            chunks: agg.chunks,
                            match_count_total: agg.match_count_total,
                            match_count: agg.match_count,
                            project_path: file.project_path,
                        });
                    }
                }
                Err(e) => {
                    let timed_out = matches!(e, SearchError::Timeout { .. });
                    results.timed_out |= timed_out;
                    results.failures.push(NodeFailure {
                        node: target.node.id.clone(),
                        timed_out,
                        message: e.to_string(),
                    });
                }
            }
        }

        // Stable output across identical fan-outs; presentation-level ranking
        // belongs to the caller.
        results
            .blobs
            .sort_by(|a, b| (&a.project_path, &a.path).cmp(&(&b.project_path, &b.path)));
        results.file_count = results.blobs.len();

        Ok(results)
    }

    /// Resolve the fan-out targets, honoring an explicit node pin.
    fn plan(&self, query: &SearchQuery) -> SearchResult<Vec<RouteTarget>> {
        let mut targets = self.registry.resolve_scope(&query.scope)?;

        if let Some(pin) = &query.node {
            if self.registry.node(pin).is_none() {
                return Err(SearchError::UnknownNode(pin.clone()));
            }
            targets.retain(|t| t.node.id == *pin);
        }

        Ok(targets)
    }

    fn query_node(
        &self,
        target: &RouteTarget,
        query: &SearchQuery,
        timeout: Duration,
    ) -> Result<SearchResponse, SearchError> {
        if !target.node.is_ready() {
            return Err(SearchError::NodeError {
                node: target.node.id.clone(),
                message: "node is not ready".to_string(),
            });
        }

        let namespace_prefix = match &query.scope {
            Scope::Namespace(prefix) => Some(prefix.clone()),
            _ => None,
        };
        let repository_ids = if namespace_prefix.is_some() {
            Vec::new()
        } else {
            target.repository_ids.clone()
        };

        let mut client = NodeClient::connect(&target.node, timeout)?;
        client.search(&query.term, query.regex, repository_ids, namespace_prefix)
    }
}

//! Index update pipeline
//!
//! Keeps node indexes consistent with repository content after writes. The
//! synchronous path ([`UpdatePipeline::update_index`]) pushes a ref delta to
//! the owning node and reports one response per node contacted; a failed push
//! is surfaced in that response for the caller's retry decision, never
//! retried here. The asynchronous path ([`UpdateWorker`]) queues the
//! same operation with best-effort FIFO ordering per repository.

mod batcher;
mod worker;

pub use batcher::DeltaBatcher;
pub use worker::UpdateWorker;

use crate::config::ClusterConfig;
use crate::error::SearchResult;
use crate::node::NodeClient;
use crate::routing::{IndexRegistry, Node, NodeId, Repository, RepositoryId};
use serde::{Deserialize, Serialize};

/// One file's content within a ref delta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub path: String,
    pub content: String,
}

/// A repository delta to push into the index.
///
/// Carries the changed documents directly; fetching content from the
/// repository store is the caller's concern. Applying the same delta twice
/// is safe: upserts and deletes are idempotent and ref state is
/// last-write-wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefDelta {
    /// Ref the delta advances, e.g. "main"
    pub ref_name: String,
    /// Commit the ref now points at
    pub oid: String,
    /// Created or modified documents
    #[serde(default)]
    pub documents: Vec<Document>,
    /// Removed documents
    #[serde(default)]
    pub deleted_paths: Vec<String>,
}

/// Outcome of pushing one update to one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateResponse {
    pub node: NodeId,
    pub success: bool,
    pub message: String,
}

/// A queued index update for the asynchronous path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateJob {
    pub repository: RepositoryId,
    pub delta: RefDelta,
    /// Replace the repository's whole document set (full reindex)
    pub force: bool,
}

/// Synchronous index update path
pub struct UpdatePipeline<'a> {
    registry: &'a IndexRegistry,
    config: &'a ClusterConfig,
}

impl<'a> UpdatePipeline<'a> {
    pub fn new(registry: &'a IndexRegistry, config: &'a ClusterConfig) -> Self {
        Self { registry, config }
    }

    /// Push a ref delta (or, with `force`, a full reindex) to the owning
    /// node(s).
    ///
    /// Returns one response per node contacted. A push the node rejected or
    /// a node that could not be reached yields `success: false` in its
    /// response; the overall operation is degraded-but-not-failed as long as
    /// at least one node succeeded. `Err` is reserved for routing failures
    /// (repository not indexed).
    ///
    /// After a successful response, queries against that node reflect the
    /// pushed content. The guarantee is per node only; peers stay stale
    /// until their own updates land.
    pub fn update_index(
        &self,
        repository: RepositoryId,
        delta: &RefDelta,
        force: bool,
    ) -> SearchResult<Vec<UpdateResponse>> {
        let node = self.registry.resolve_node(repository)?;
        let repo = self
            .registry
            .repository(repository)
            .ok_or(crate::error::SearchError::NotIndexed(repository))?;

        Ok(vec![self.push_to_node(node, repo, delta, force)])
    }

    /// Apply one queued job, for the worker.
    pub(crate) fn apply_job(&self, job: &UpdateJob) -> SearchResult<Vec<UpdateResponse>> {
        self.update_index(job.repository, &job.delta, job.force)
    }

    fn push_to_node(
        &self,
        node: &Node,
        repository: &Repository,
        delta: &RefDelta,
        force: bool,
    ) -> UpdateResponse {
        if !node.is_ready() {
            return UpdateResponse {
                node: node.id.clone(),
                success: false,
                message: "node is not ready".to_string(),
            };
        }

        let result = NodeClient::connect(node, self.config.update_timeout())
            .and_then(|mut client| client.update(repository, delta, force));

        match result {
            Ok((success, message)) => UpdateResponse {
                node: node.id.clone(),
                success,
                message,
            },
            Err(e) => UpdateResponse {
                node: node.id.clone(),
                success: false,
                message: e.to_string(),
            },
        }
    }
}

//! Index routing
//!
//! Decides, per repository, whether queries and updates target the fast-path
//! index and which node owns the data. All lookups go through an explicit
//! [`IndexRegistry`] threaded through callers; there is no ambient global
//! registry. The registry is read-only from this crate's perspective:
//! provisioning and deprovisioning of nodes belongs to cluster management.

use crate::error::{SearchError, SearchResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Identifier of a physical index shard
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an indexed repository
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct RepositoryId(pub u64);

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Liveness state of a node, as reported by cluster management
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    #[default]
    Ready,
    Offline,
}

/// A shard of the search index backend owning a subset of repositories
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// TCP address the node daemon listens on, e.g. "10.0.0.5:6430"
    pub address: String,
    #[serde(default)]
    pub state: NodeState,
}

impl Node {
    pub fn is_ready(&self) -> bool {
        self.state == NodeState::Ready
    }
}

/// Repository identity as seen by the search core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepositoryId,
    /// Full project path, e.g. "acme/widgets/app"
    pub project_path: String,
    /// Ref search results link to, usually the default branch
    #[serde(default = "default_ref")]
    pub default_ref: String,
}

fn default_ref() -> String {
    "main".to_string()
}

/// The set of repositories a query is restricted to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// A single repository
    Project(RepositoryId),
    /// An explicit list of repositories
    Projects(Vec<RepositoryId>),
    /// Every repository whose project path starts with this prefix
    Namespace(String),
}

/// One node to contact, with the repositories it serves for this scope
#[derive(Debug, Clone)]
pub struct RouteTarget {
    pub node: Node,
    pub repository_ids: Vec<RepositoryId>,
}

/// Node membership and repository metadata for one cluster.
///
/// Built once from configuration and passed by reference into routing,
/// query, and update calls.
#[derive(Debug, Clone, Default)]
pub struct IndexRegistry {
    nodes: HashMap<NodeId, Node>,
    repositories: HashMap<RepositoryId, Repository>,
    /// Owning node per repository
    memberships: HashMap<RepositoryId, NodeId>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node. Later registrations with the same id replace earlier
    /// ones (cluster management pushes the authoritative view).
    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    /// Record that `node_id` owns the index for `repository`.
    pub fn assign(&mut self, repository: Repository, node_id: NodeId) -> SearchResult<()> {
        if !self.nodes.contains_key(&node_id) {
            return Err(SearchError::UnknownNode(node_id));
        }
        self.memberships.insert(repository.id, node_id);
        self.repositories.insert(repository.id, repository);
        Ok(())
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn repository(&self, id: RepositoryId) -> Option<&Repository> {
        self.repositories.get(&id)
    }

    /// Whether the repository is served by the fast-path index.
    ///
    /// True as soon as a membership exists, independent of whether indexing
    /// is still in progress. Side-effect-free.
    pub fn use_fast_index(&self, repository: RepositoryId) -> bool {
        self.memberships.contains_key(&repository)
    }

    /// Resolve the node owning a single repository's index.
    ///
    /// A repository without an owning node signals "not indexed"; the caller
    /// falls back to the non-indexed search path.
    pub fn resolve_node(&self, repository: RepositoryId) -> SearchResult<&Node> {
        let node_id = self
            .memberships
            .get(&repository)
            .ok_or(SearchError::NotIndexed(repository))?;
        self.nodes
            .get(node_id)
            .ok_or_else(|| SearchError::UnknownNode(node_id.clone()))
    }

    /// Resolve the set of nodes covering a scope, grouped for fan-out.
    ///
    /// Repositories without a membership are skipped for multi-repository
    /// scopes; the scope fails with `NotIndexed` only when nothing in it is
    /// indexed. Target order is deterministic (sorted by node id) so that
    /// repeated queries fan out identically.
    pub fn resolve_scope(&self, scope: &Scope) -> SearchResult<Vec<RouteTarget>> {
        match scope {
            Scope::Project(id) => {
                let node = self.resolve_node(*id)?;
                Ok(vec![RouteTarget {
                    node: node.clone(),
                    repository_ids: vec![*id],
                }])
            }
            Scope::Projects(ids) => {
                let first_unindexed = ids.iter().find(|id| !self.use_fast_index(**id));
                let targets = self.group_by_node(ids.iter().copied());
                if targets.is_empty() {
                    let id = first_unindexed.copied().unwrap_or_default();
                    return Err(SearchError::NotIndexed(id));
                }
                Ok(targets)
            }
            Scope::Namespace(prefix) => {
                let ids: Vec<RepositoryId> = self
                    .repositories
                    .values()
                    .filter(|r| path_in_namespace(&r.project_path, prefix))
                    .map(|r| r.id)
                    .collect();
                Ok(self.group_by_node(ids.into_iter()))
            }
        }
    }

    fn group_by_node(&self, ids: impl Iterator<Item = RepositoryId>) -> Vec<RouteTarget> {
        let mut by_node: BTreeMap<NodeId, Vec<RepositoryId>> = BTreeMap::new();
        for id in ids {
            if let Some(node_id) = self.memberships.get(&id) {
                by_node.entry(node_id.clone()).or_default().push(id);
            }
        }

        by_node
            .into_iter()
            .filter_map(|(node_id, mut repos)| {
                repos.sort();
                self.nodes.get(&node_id).map(|node| RouteTarget {
                    node: node.clone(),
                    repository_ids: repos,
                })
            })
            .collect()
    }
}

/// Namespace prefix match on path-segment boundaries: "acme" covers
/// "acme/app" but not "acme-corp/app".
fn path_in_namespace(project_path: &str, prefix: &str) -> bool {
    match project_path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> IndexRegistry {
        let mut reg = IndexRegistry::new();
        reg.add_node(Node {
            id: NodeId::from("node-a"),
            address: "127.0.0.1:6430".to_string(),
            state: NodeState::Ready,
        });
        reg.add_node(Node {
            id: NodeId::from("node-b"),
            address: "127.0.0.1:6431".to_string(),
            state: NodeState::Ready,
        });
        reg.assign(
            Repository {
                id: RepositoryId(1),
                project_path: "acme/app".to_string(),
                default_ref: "main".to_string(),
            },
            NodeId::from("node-a"),
        )
        .unwrap();
        reg.assign(
            Repository {
                id: RepositoryId(2),
                project_path: "acme/lib".to_string(),
                default_ref: "main".to_string(),
            },
            NodeId::from("node-b"),
        )
        .unwrap();
        reg.assign(
            Repository {
                id: RepositoryId(3),
                project_path: "other/tool".to_string(),
                default_ref: "main".to_string(),
            },
            NodeId::from("node-b"),
        )
        .unwrap();
        reg
    }

    #[test]
    fn test_use_fast_index() {
        let reg = registry();
        assert!(reg.use_fast_index(RepositoryId(1)));
        assert!(!reg.use_fast_index(RepositoryId(99)));
    }

    #[test]
    fn test_resolve_node_for_indexed_repo() {
        let reg = registry();
        let node = reg.resolve_node(RepositoryId(1)).unwrap();
        assert_eq!(node.id, NodeId::from("node-a"));
    }

    #[test]
    fn test_unindexed_repo_is_a_routing_error_not_a_crash() {
        let reg = registry();
        match reg.resolve_node(RepositoryId(99)) {
            Err(SearchError::NotIndexed(id)) => assert_eq!(id, RepositoryId(99)),
            other => panic!("expected NotIndexed, got {:?}", other),
        }
    }

    #[test]
    fn test_assign_to_unknown_node_fails() {
        let mut reg = registry();
        let err = reg
            .assign(
                Repository {
                    id: RepositoryId(9),
                    project_path: "x/y".to_string(),
                    default_ref: "main".to_string(),
                },
                NodeId::from("ghost"),
            )
            .unwrap_err();
        assert!(matches!(err, SearchError::UnknownNode(_)));
    }

    #[test]
    fn test_scope_projects_fans_out_across_nodes() {
        let reg = registry();
        let targets = reg
            .resolve_scope(&Scope::Projects(vec![
                RepositoryId(1),
                RepositoryId(2),
                RepositoryId(3),
            ]))
            .unwrap();
        assert_eq!(targets.len(), 2);
        // Sorted by node id
        assert_eq!(targets[0].node.id, NodeId::from("node-a"));
        assert_eq!(targets[0].repository_ids, vec![RepositoryId(1)]);
        assert_eq!(targets[1].node.id, NodeId::from("node-b"));
        assert_eq!(
            targets[1].repository_ids,
            vec![RepositoryId(2), RepositoryId(3)]
        );
    }

    #[test]
    fn test_scope_projects_skips_unindexed_but_fails_when_all_are() {
        let reg = registry();
        let targets = reg
            .resolve_scope(&Scope::Projects(vec![RepositoryId(1), RepositoryId(99)]))
            .unwrap();
        assert_eq!(targets.len(), 1);

        let err = reg
            .resolve_scope(&Scope::Projects(vec![RepositoryId(98), RepositoryId(99)]))
            .unwrap_err();
        assert!(matches!(err, SearchError::NotIndexed(_)));
    }

    #[test]
    fn test_namespace_scope_respects_segment_boundaries() {
        let reg = registry();
        let targets = reg
            .resolve_scope(&Scope::Namespace("acme".to_string()))
            .unwrap();
        let repos: Vec<RepositoryId> = targets
            .iter()
            .flat_map(|t| t.repository_ids.iter().copied())
            .collect();
        assert_eq!(repos, vec![RepositoryId(1), RepositoryId(2)]);

        assert!(path_in_namespace("acme/app", "acme"));
        assert!(path_in_namespace("acme/sub/app", "acme/sub"));
        assert!(!path_in_namespace("acme-corp/app", "acme"));
    }

    #[test]
    fn test_empty_namespace_scope_yields_no_targets() {
        let reg = registry();
        let targets = reg
            .resolve_scope(&Scope::Namespace("nobody".to_string()))
            .unwrap();
        assert!(targets.is_empty());
    }
}

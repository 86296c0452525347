//! Backend selection
//!
//! Callers pick a backend once per repository through [`select_backend`] and
//! inject it, instead of re-checking the fast-index predicate at every call
//! site. [`IndexedBackend`] is the fast path over the node cluster;
//! [`FallbackBackend`] scans caller-supplied snapshots linearly and serves
//! repositories that have no index membership yet.

use crate::config::ClusterConfig;
use crate::error::{SearchError, SearchResult};
use crate::model::FoundBlob;
use crate::node::store::scan_document;
use crate::query::{QueryExecutor, SearchQuery, SearchResults};
use crate::routing::{IndexRegistry, NodeId, Repository, RepositoryId, Scope};
use crate::update::{RefDelta, UpdatePipeline, UpdateResponse};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// The capability set both index paths implement
pub trait SearchBackend {
    fn search(&self, query: &SearchQuery) -> SearchResult<SearchResults>;

    fn update_index(
        &self,
        repository: RepositoryId,
        delta: &RefDelta,
        force: bool,
    ) -> SearchResult<Vec<UpdateResponse>>;
}

/// Pick the backend serving a repository. Selected once by the router;
/// callers hold on to the returned reference instead of re-testing
/// membership per call.
pub fn select_backend<'a>(
    registry: &IndexRegistry,
    repository: RepositoryId,
    indexed: &'a dyn SearchBackend,
    fallback: &'a dyn SearchBackend,
) -> &'a dyn SearchBackend {
    if registry.use_fast_index(repository) {
        indexed
    } else {
        fallback
    }
}

/// Fast-path backend over the node cluster
pub struct IndexedBackend<'a> {
    registry: &'a IndexRegistry,
    config: &'a ClusterConfig,
}

impl<'a> IndexedBackend<'a> {
    pub fn new(registry: &'a IndexRegistry, config: &'a ClusterConfig) -> Self {
        Self { registry, config }
    }
}

impl SearchBackend for IndexedBackend<'_> {
    fn search(&self, query: &SearchQuery) -> SearchResult<SearchResults> {
        QueryExecutor::new(self.registry, self.config).search(query)
    }

    fn update_index(
        &self,
        repository: RepositoryId,
        delta: &RefDelta,
        force: bool,
    ) -> SearchResult<Vec<UpdateResponse>> {
        UpdatePipeline::new(self.registry, self.config).update_index(repository, delta, force)
    }
}

/// Slow-path backend for repositories outside the index.
///
/// Holds plain document snapshots and scans them linearly per query. Updates
/// mutate the snapshot in place and always succeed; the synthetic response
/// keeps the caller-facing contract uniform across both backends.
pub struct FallbackBackend<'a> {
    config: &'a ClusterConfig,
    snapshots: RwLock<HashMap<RepositoryId, Snapshot>>,
}

struct Snapshot {
    repository: Repository,
    documents: BTreeMap<String, String>,
}

impl<'a> FallbackBackend<'a> {
    pub fn new(config: &'a ClusterConfig) -> Self {
        Self {
            config,
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    /// Register the repository a later update or search refers to.
    pub fn track(&self, repository: Repository) {
        let mut snapshots = self.snapshots.write().unwrap();
        match snapshots.entry(repository.id) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                entry.get_mut().repository = repository;
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(Snapshot {
                    repository,
                    documents: BTreeMap::new(),
                });
            }
        }
    }

    fn scoped_ids(&self, scope: &Scope, snapshots: &HashMap<RepositoryId, Snapshot>) -> Vec<RepositoryId> {
        let mut ids: Vec<RepositoryId> = match scope {
            Scope::Project(id) => vec![*id],
            Scope::Projects(ids) => ids.clone(),
            Scope::Namespace(prefix) => snapshots
                .values()
                .filter(|s| {
                    s.repository
                        .project_path
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
                })
                .map(|s| s.repository.id)
                .collect(),
        };
        ids.sort();
        ids.dedup();
        ids
    }
}

impl SearchBackend for FallbackBackend<'_> {
    fn search(&self, query: &SearchQuery) -> SearchResult<SearchResults> {
        if matches!(query.scope, Scope::Namespace(_)) && !self.config.allow_namespace_search {
            return Err(SearchError::NamespaceSearchDisabled);
        }

        let snapshots = self.snapshots.read().unwrap();
        let mut results = SearchResults::default();

        for id in self.scoped_ids(&query.scope, &snapshots) {
            let Some(snapshot) = snapshots.get(&id) else {
                continue;
            };

            for (path, content) in &snapshot.documents {
                let matches = scan_document(&query.term, query.regex, content)
                    .map_err(|e| SearchError::InvalidPattern(e.to_string()))?;
                if matches.is_empty() {
                    continue;
                }

                let agg = crate::aggregate::aggregate(&matches, &self.config.aggregation);
                let repo = &snapshot.repository;
                results.match_count += agg.match_count;
                results.match_count_total += agg.match_count_total;
                results.blobs.push(FoundBlob {
                    file_url: self
                        .config
                        .file_url(&repo.project_path, &repo.default_ref, path),
                    blame_url: self
                        .config
                        .blame_url(&repo.project_path, &repo.default_ref, path),
                    path: path.clone(),
                    chunks: agg.chunks,
                    match_count_total: agg.match_count_total,
                    match_count: agg.match_count,
                    project_path: repo.project_path.clone(),
                });
            }
        }

        results.file_count = results.blobs.len();
        Ok(results)
    }

    fn update_index(
        &self,
        repository: RepositoryId,
        delta: &RefDelta,
        force: bool,
    ) -> SearchResult<Vec<UpdateResponse>> {
        let mut snapshots = self.snapshots.write().unwrap();
        let snapshot = snapshots
            .get_mut(&repository)
            .ok_or(SearchError::NotIndexed(repository))?;

        if force {
            snapshot.documents.clear();
        }
        for doc in &delta.documents {
            snapshot
                .documents
                .insert(doc.path.clone(), doc.content.clone());
        }
        for path in &delta.deleted_paths {
            snapshot.documents.remove(path);
        }

        Ok(vec![UpdateResponse {
            node: NodeId::from("fallback"),
            success: true,
            message: format!("{} documents in snapshot", snapshot.documents.len()),
        }])
    }
}

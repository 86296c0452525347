//! In-memory shard store
//!
//! Holds the indexed content for every repository a node owns: document text
//! keyed by path, plus the ref state the content was pushed at. Updates apply
//! behind the server's write lock with last-write-wins ref semantics, so
//! overlapping pushes for the same repository serialize safely on the node.

use crate::model::{RawFileMatches, RawMatch};
use crate::routing::{Repository, RepositoryId};
use crate::update::RefDelta;
use memchr::memmem;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

/// Indexed state of one repository
#[derive(Debug, Clone)]
struct RepoIndex {
    project_path: String,
    default_ref: String,
    /// Last pushed oid per ref (last write wins)
    refs: HashMap<String, String>,
    /// Document content by path, ordered for deterministic scan order
    documents: BTreeMap<String, String>,
}

/// What a search request is allowed to scan
#[derive(Debug, Clone)]
pub enum ScanScope {
    /// An explicit repository list
    Repositories(Vec<RepositoryId>),
    /// Every repository under a project path prefix
    Namespace(String),
}

/// Outcome of one scan, possibly cut short by the deadline
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub files: Vec<RawFileMatches>,
    pub timed_out: bool,
}

/// All indexed repositories on one node
#[derive(Debug, Default)]
pub struct ShardStore {
    repos: HashMap<RepositoryId, RepoIndex>,
}

impl ShardStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn repository_count(&self) -> usize {
        self.repos.len()
    }

    pub fn document_count(&self) -> usize {
        self.repos.values().map(|r| r.documents.len()).sum()
    }

    /// Apply a ref delta to a repository's index.
    ///
    /// `force` replaces the whole document set with the delta's documents;
    /// otherwise documents are upserted and `deleted_paths` removed.
    /// Reapplying the same delta is a no-op by construction, so retries from
    /// the job layer are safe. Returns the number of documents now indexed.
    pub fn apply(&mut self, repository: &Repository, delta: &RefDelta, force: bool) -> usize {
        let repo = self
            .repos
            .entry(repository.id)
            .or_insert_with(|| RepoIndex {
                project_path: repository.project_path.clone(),
                default_ref: repository.default_ref.clone(),
                refs: HashMap::new(),
                documents: BTreeMap::new(),
            });

        // Metadata follows the latest push
        repo.project_path = repository.project_path.clone();
        repo.default_ref = repository.default_ref.clone();

        if force {
            repo.documents.clear();
        }

        for doc in &delta.documents {
            repo.documents.insert(doc.path.clone(), doc.content.clone());
        }
        for path in &delta.deleted_paths {
            repo.documents.remove(path);
        }

        repo.refs.insert(delta.ref_name.clone(), delta.oid.clone());

        repo.documents.len()
    }

    /// Scan the scoped repositories for a term.
    ///
    /// Stops early when `deadline` passes, flagging the outcome as timed out;
    /// files scanned before the cutoff are still returned (partial result).
    /// Returns `Err` only for an invalid regex, which validated callers never
    /// send.
    pub fn search(
        &self,
        term: &str,
        regex: bool,
        scope: &ScanScope,
        deadline: Instant,
    ) -> Result<ScanOutcome, regex::Error> {
        let matcher = Matcher::new(term, regex)?;

        let mut repo_ids: Vec<RepositoryId> = match scope {
            ScanScope::Repositories(ids) => ids
                .iter()
                .copied()
                .filter(|id| self.repos.contains_key(id))
                .collect(),
            ScanScope::Namespace(prefix) => self
                .repos
                .iter()
                .filter(|(_, r)| in_namespace(&r.project_path, prefix))
                .map(|(id, _)| *id)
                .collect(),
        };
        repo_ids.sort();
        repo_ids.dedup();

        let mut files = Vec::new();
        let mut timed_out = false;

        'scan: for id in repo_ids {
            let repo = &self.repos[&id];
            for (path, content) in &repo.documents {
                if Instant::now() >= deadline {
                    timed_out = true;
                    break 'scan;
                }

                let matches = matcher.scan(content);
                if !matches.is_empty() {
                    files.push(RawFileMatches {
                        path: path.clone(),
                        project_path: repo.project_path.clone(),
                        ref_name: repo.default_ref.clone(),
                        matches,
                    });
                }
            }
        }

        Ok(ScanOutcome { files, timed_out })
    }
}

/// Scan a single document for a term, outside any store. Used by the
/// fallback (non-indexed) search path.
pub fn scan_document(term: &str, regex: bool, content: &str) -> Result<Vec<RawMatch>, regex::Error> {
    Ok(Matcher::new(term, regex)?.scan(content))
}

/// Namespace prefix match on path-segment boundaries
fn in_namespace(project_path: &str, prefix: &str) -> bool {
    match project_path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Compiled matcher for one query term
enum Matcher<'a> {
    Literal(memmem::Finder<'a>),
    Regex(Regex),
}

impl<'a> Matcher<'a> {
    fn new(term: &'a str, regex: bool) -> Result<Self, regex::Error> {
        if regex {
            Ok(Matcher::Regex(Regex::new(term)?))
        } else {
            Ok(Matcher::Literal(memmem::Finder::new(term.as_bytes())))
        }
    }

    /// Scan a document line by line, producing one raw match per matching
    /// line with every occurrence highlighted in `rich_text`.
    fn scan(&self, content: &str) -> Vec<RawMatch> {
        let mut out = Vec::new();

        for (idx, line) in content.lines().enumerate() {
            let spans = self.line_spans(line);
            if spans.is_empty() {
                continue;
            }

            out.push(RawMatch {
                line_number: idx as u32 + 1,
                text: line.to_string(),
                rich_text: highlight(line, &spans),
            });
        }

        out
    }

    /// Byte ranges of every occurrence within one line
    fn line_spans(&self, line: &str) -> Vec<(usize, usize)> {
        match self {
            Matcher::Literal(finder) => {
                let needle_len = finder.needle().len();
                if needle_len == 0 {
                    return Vec::new();
                }
                let mut spans = Vec::new();
                let mut start = 0;
                while let Some(pos) = finder.find(&line.as_bytes()[start..]) {
                    let abs = start + pos;
                    spans.push((abs, abs + needle_len));
                    start = abs + needle_len;
                }
                spans
            }
            Matcher::Regex(re) => re
                .find_iter(line)
                .filter(|m| !m.is_empty())
                .map(|m| (m.start(), m.end()))
                .collect(),
        }
    }
}

/// Wrap matched spans in `<mark>` tags. Spans are non-overlapping and
/// ascending by construction.
fn highlight(line: &str, spans: &[(usize, usize)]) -> String {
    let mut rich = String::with_capacity(line.len() + spans.len() * 13);
    let mut cursor = 0;

    for &(start, end) in spans {
        rich.push_str(&line[cursor..start]);
        rich.push_str("<mark>");
        rich.push_str(&line[start..end]);
        rich.push_str("</mark>");
        cursor = end;
    }
    rich.push_str(&line[cursor..]);

    rich
}

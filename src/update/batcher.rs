//! Delta batcher for queued index updates
//!
//! Accumulates update jobs within a time window and coalesces per-repository
//! work before it is pushed. Rapid write bursts (a push of many commits, a
//! force reindex racing an incremental update) collapse into fewer pushes.
//! A force reindex is a superset of any earlier incremental delta, so
//! incremental-then-force collapses to the force job alone.

use crate::routing::RepositoryId;
use crate::update::UpdateJob;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Batcher that coalesces update jobs within a time window
pub struct DeltaBatcher {
    window: Duration,
    /// Pending jobs per repository, oldest first
    pending: HashMap<RepositoryId, Vec<UpdateJob>>,
    /// Repositories in first-enqueue order (FIFO per repository)
    order: Vec<RepositoryId>,
    /// Time of the last enqueued job (any repository)
    last_event: Option<Instant>,
}

impl DeltaBatcher {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
            order: Vec::new(),
            last_event: None,
        }
    }

    /// Enqueue a job, merging it into the repository's trailing pending job
    /// when both target the same ref.
    pub fn add_job(&mut self, job: UpdateJob) {
        self.last_event = Some(Instant::now());

        let repo = job.repository;
        let queue = self.pending.entry(repo).or_default();
        if queue.is_empty() {
            self.order.push(repo);
        }

        match queue.last_mut() {
            Some(last) if last.delta.ref_name == job.delta.ref_name => merge_into(last, job),
            _ => queue.push(job),
        }
    }

    /// Whether the batch window has elapsed since the last enqueued job
    pub fn is_ready(&self) -> bool {
        match self.last_event {
            Some(last) => last.elapsed() >= self.window,
            None => false,
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.order.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().map(|q| q.len()).sum()
    }

    /// Drain all pending jobs, preserving enqueue order per repository and
    /// first-enqueue order across repositories. Returns an empty vec when
    /// nothing is pending.
    pub fn flush(&mut self) -> Vec<UpdateJob> {
        let mut jobs = Vec::with_capacity(self.pending_count());

        for repo in self.order.drain(..) {
            if let Some(queue) = self.pending.remove(&repo) {
                jobs.extend(queue);
            }
        }

        self.last_event = None;
        jobs
    }
}

/// Fold `next` into `base` (same repository, same ref).
fn merge_into(base: &mut UpdateJob, next: UpdateJob) {
    if next.force {
        // The force snapshot supersedes everything queued before it.
        *base = next;
        return;
    }

    base.delta.oid = next.delta.oid;

    for doc in next.delta.documents {
        base.delta.deleted_paths.retain(|p| *p != doc.path);
        match base.delta.documents.iter_mut().find(|d| d.path == doc.path) {
            Some(existing) => existing.content = doc.content,
            None => base.delta.documents.push(doc),
        }
    }

    for path in next.delta.deleted_paths {
        base.delta.documents.retain(|d| d.path != path);
        if !base.delta.deleted_paths.contains(&path) {
            base.delta.deleted_paths.push(path);
        }
    }
}

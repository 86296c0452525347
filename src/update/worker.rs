//! Background worker for asynchronous index updates
//!
//! Drains queued jobs through the [`DeltaBatcher`] and applies them with the
//! synchronous pipeline. Ordering is best-effort FIFO per repository; there
//! is no ordering across repositories or across nodes, and callers must not
//! assume immediate visibility after scheduling. Failed pushes are logged
//! and reported to the observer; retry policy belongs to the job-scheduling
//! layer above.

use crate::config::ClusterConfig;
use crate::routing::IndexRegistry;
use crate::update::{DeltaBatcher, UpdateJob, UpdatePipeline, UpdateResponse};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Poll interval while waiting for the batch window to close
const POLL_INTERVAL: Duration = Duration::from_millis(10);

enum WorkerMsg {
    Job(UpdateJob),
    Flush,
    Shutdown,
}

/// Handle to the background update worker
pub struct UpdateWorker {
    tx: Sender<WorkerMsg>,
    handle: Option<JoinHandle<()>>,
}

impl UpdateWorker {
    /// Spawn the worker thread.
    pub fn spawn(registry: Arc<IndexRegistry>, config: Arc<ClusterConfig>) -> Self {
        Self::spawn_with_observer(registry, config, None)
    }

    /// Spawn the worker thread, reporting every applied batch's per-node
    /// responses to `observer`.
    pub fn spawn_with_observer(
        registry: Arc<IndexRegistry>,
        config: Arc<ClusterConfig>,
        observer: Option<Sender<Vec<UpdateResponse>>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<WorkerMsg>();
        let window = config.batch_window();

        let handle = std::thread::spawn(move || {
            let pipeline = UpdatePipeline::new(&registry, &config);
            let mut batcher = DeltaBatcher::new(window);

            loop {
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(WorkerMsg::Job(job)) => batcher.add_job(job),
                    Ok(WorkerMsg::Flush) => {
                        apply_batch(&pipeline, batcher.flush(), observer.as_ref());
                    }
                    Ok(WorkerMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                        apply_batch(&pipeline, batcher.flush(), observer.as_ref());
                        break;
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if batcher.is_ready() {
                            apply_batch(&pipeline, batcher.flush(), observer.as_ref());
                        }
                    }
                }
            }
        });

        Self {
            tx,
            handle: Some(handle),
        }
    }

    /// Enqueue an update job. Best-effort: scheduling after shutdown is a
    /// silent no-op.
    pub fn schedule(&self, job: UpdateJob) {
        let _ = self.tx.send(WorkerMsg::Job(job));
    }

    /// Ask the worker to push everything pending without waiting for the
    /// batch window.
    pub fn flush(&self) {
        let _ = self.tx.send(WorkerMsg::Flush);
    }

    /// Stop the worker after draining the queue.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        let _ = self.tx.send(WorkerMsg::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for UpdateWorker {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

fn apply_batch(
    pipeline: &UpdatePipeline<'_>,
    jobs: Vec<UpdateJob>,
    observer: Option<&Sender<Vec<UpdateResponse>>>,
) {
    for job in jobs {
        match pipeline.apply_job(&job) {
            Ok(responses) => {
                for resp in &responses {
                    if !resp.success {
                        eprintln!(
                            "shq-indexer: push for repository {} to node {} failed: {}",
                            job.repository, resp.node, resp.message
                        );
                    }
                }
                if let Some(observer) = observer {
                    let _ = observer.send(responses);
                }
            }
            Err(e) => {
                eprintln!(
                    "shq-indexer: cannot route update for repository {}: {}",
                    job.repository, e
                );
                if let Some(observer) = observer {
                    let _ = observer.send(Vec::new());
                }
            }
        }
    }
}

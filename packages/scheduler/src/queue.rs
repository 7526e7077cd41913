//! Bounded FIFO job queue with cooperative cancellation.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use forge_core::JobId;
use thiserror::Error;
use tokio::sync::mpsc;

/// An accepted submission waiting for the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub job_id: JobId,
    /// Ordering hint. The default policy is plain FIFO and ignores it.
    pub priority: i32,
    /// Opaque generation parameters, handed to the backend verbatim.
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl QueuedJob {
    pub fn new(job_id: JobId, params: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            job_id,
            priority: 0,
            params,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Queue errors.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job queue is full, rejected {0}")]
    Full(JobId),
    #[error("job queue is closed")]
    Closed,
}

#[derive(Default)]
struct Markers {
    /// Cancellation requested but not yet observed.
    cancelled: HashSet<JobId>,
    /// Ids sitting in the channel or held by the worker.
    known: HashSet<JobId>,
    /// Ids skipped at dequeue because they were cancelled first.
    discarded: Vec<JobId>,
}

/// The queue between submitters and the single worker.
///
/// `enqueue` waits once `capacity` jobs are pending; `try_enqueue` fails
/// instead. Cancelled jobs are skipped at dequeue time, and a job that is
/// already running sees its marker through [`is_cancelled`](Self::is_cancelled).
pub struct JobQueue {
    tx: mpsc::Sender<QueuedJob>,
    rx: tokio::sync::Mutex<mpsc::Receiver<QueuedJob>>,
    markers: Mutex<Markers>,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            markers: Mutex::new(Markers::default()),
        }
    }

    fn markers(&self) -> MutexGuard<'_, Markers> {
        self.markers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a job, waiting for room when the queue is full.
    pub async fn enqueue(&self, job: QueuedJob) -> Result<(), QueueError> {
        let id = job.job_id.clone();
        self.markers().known.insert(id.clone());

        if self.tx.send(job).await.is_err() {
            self.markers().known.remove(&id);
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    /// Append a job without waiting.
    pub fn try_enqueue(&self, job: QueuedJob) -> Result<(), QueueError> {
        let id = job.job_id.clone();
        self.markers().known.insert(id.clone());

        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.markers().known.remove(&id);
                Err(QueueError::Full(id))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.markers().known.remove(&id);
                Err(QueueError::Closed)
            }
        }
    }

    /// Wait for the oldest job that has not been cancelled.
    ///
    /// Cancelled jobs met on the way are dropped and reported through
    /// [`take_discarded`](Self::take_discarded). Cancel safe.
    pub async fn dequeue(&self) -> Result<QueuedJob, QueueError> {
        let mut rx = self.rx.lock().await;
        loop {
            let job = rx.recv().await.ok_or(QueueError::Closed)?;
            if self.admit(&job.job_id) {
                return Ok(job);
            }
        }
    }

    /// Like [`dequeue`](Self::dequeue), giving up after `timeout`.
    pub async fn dequeue_timeout(&self, timeout: Duration) -> Option<QueuedJob> {
        match tokio::time::timeout(timeout, self.dequeue()).await {
            Ok(Ok(job)) => Some(job),
            Ok(Err(_)) | Err(_) => None,
        }
    }

    fn admit(&self, id: &JobId) -> bool {
        let mut markers = self.markers();
        let Markers {
            cancelled,
            known,
            discarded,
        } = &mut *markers;

        // Markers for ids that never reached the queue would otherwise live forever.
        cancelled.retain(|c| known.contains(c));

        if cancelled.remove(id) {
            known.remove(id);
            discarded.push(id.clone());
            tracing::debug!("Discarded cancelled job {}", id);
            false
        } else {
            true
        }
    }

    /// Mark a job as cancelled. Idempotent.
    pub fn request_cancel(&self, id: &JobId) {
        self.markers().cancelled.insert(id.clone());
    }

    /// Whether cancellation was requested. Does not clear the marker.
    pub fn is_cancelled(&self, id: &JobId) -> bool {
        self.markers().cancelled.contains(id)
    }

    /// The worker is done with `id`; forget it and any marker it still has.
    pub fn finish(&self, id: &JobId) {
        let mut markers = self.markers();
        markers.known.remove(id);
        markers.cancelled.remove(id);
    }

    /// Drain the ids skipped at dequeue since the last call.
    pub fn take_discarded(&self) -> Vec<JobId> {
        std::mem::take(&mut self.markers().discarded)
    }

    /// Number of jobs waiting, cancelled ones included until they are skipped.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    fn job(id: &str) -> QueuedJob {
        QueuedJob::new(JobId::from(id), serde_json::Map::new())
    }

    #[tokio::test]
    async fn cancelled_while_queued_is_skipped() -> Result<(), QueueError> {
        let queue = JobQueue::new(4);
        queue.enqueue(job("a")).await?;
        queue.enqueue(job("b")).await?;
        queue.request_cancel(&JobId::from("a"));

        let next = queue.dequeue().await?;
        assert_eq!(next.job_id, JobId::from("b"));
        assert!(!queue.is_cancelled(&JobId::from("a")));
        assert_eq!(queue.take_discarded(), vec![JobId::from("a")]);
        assert!(queue.take_discarded().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn running_marker_survives_until_finish() -> Result<(), QueueError> {
        let queue = JobQueue::new(4);
        queue.enqueue(job("a")).await?;
        let running = queue.dequeue().await?;

        queue.request_cancel(&running.job_id);
        queue.enqueue(job("b")).await?;
        queue.dequeue().await?;

        // Still in flight, so the dequeue above must not prune it.
        assert!(queue.is_cancelled(&running.job_id));
        queue.finish(&running.job_id);
        assert!(!queue.is_cancelled(&running.job_id));
        Ok(())
    }
}

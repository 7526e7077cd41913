//! Submission entrypoint tying queue, bus, store and worker together.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use forge_core::{ForgeConfig, GenerateRequest, JobId, JobRecord, JobStatus};
use forge_db::JobStore;
use ractor::RpcReplyPort;
use ractor::rpc::CallResult;

use crate::bus::{EventBus, SubscriberId, Subscription};
use crate::messages::{BackendReport, SchedulerError, WorkerMessage};
use crate::queue::{JobQueue, QueueError, QueuedJob};
use crate::registry::BackendRegistry;
use crate::worker_actor::{WorkerArgs, WorkerHandle, spawn_worker};

/// Upper bound on a worker round trip; covers a job that is still running.
const WORKER_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// A running scheduler: one queue, one event bus, one worker.
pub struct Scheduler {
    config: ForgeConfig,
    store: Arc<dyn JobStore>,
    queue: Arc<JobQueue>,
    bus: Arc<EventBus>,
    registry: Arc<BackendRegistry>,
    worker: WorkerHandle,
}

impl Scheduler {
    /// Start the worker and return a handle for submitting jobs.
    pub async fn start(
        config: ForgeConfig,
        store: Arc<dyn JobStore>,
        registry: BackendRegistry,
    ) -> Result<Self, SchedulerError> {
        tracing::info!(
            "Starting scheduler (queue capacity {}, backend {})",
            config.queue.capacity,
            config.backend.active
        );

        let queue = Arc::new(JobQueue::new(config.queue.capacity));
        let bus = Arc::new(EventBus::new(config.queue.subscriber_capacity));
        let registry = Arc::new(registry);

        let worker = spawn_worker(WorkerArgs {
            queue: queue.clone(),
            bus: bus.clone(),
            store: store.clone(),
            registry: registry.clone(),
            backend_config: config.backend.clone(),
            poll_interval: config.queue.poll_interval(),
        })
        .await?;

        Ok(Self {
            config,
            store,
            queue,
            bus,
            registry,
            worker,
        })
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    /// Validate, persist as `queued`, then enqueue without waiting.
    ///
    /// When the queue is full the record is marked `failed` and
    /// [`SchedulerError::QueueFull`] is returned.
    pub async fn submit(&self, request: GenerateRequest) -> Result<JobId, SchedulerError> {
        request.validate(&self.config.generation)?;

        let id = self.store.create_job(&request).await?;
        let job = QueuedJob::new(id.clone(), request.to_params());

        match self.queue.try_enqueue(job) {
            Ok(()) => {
                tracing::info!("Job {} queued ({} waiting)", id, self.queue.len());
                Ok(id)
            }
            Err(QueueError::Full(_)) => {
                tracing::warn!("Rejecting job {}: queue is full", id);
                self.reject(&id, "queue is full").await;
                Err(SchedulerError::QueueFull)
            }
            Err(QueueError::Closed) => {
                self.reject(&id, "queue is closed").await;
                Err(SchedulerError::Actor("job queue is closed".to_string()))
            }
        }
    }

    async fn reject(&self, id: &JobId, reason: &str) {
        if let Err(e) = self
            .store
            .set_status(id, JobStatus::Failed, Utc::now())
            .await
        {
            tracing::warn!("Failed to mark rejected job {} as failed: {}", id, e);
        }
        if let Err(e) = self.store.append_error(id, reason).await {
            tracing::warn!("Failed to record error for job {}: {}", id, e);
        }
    }

    /// Request cancellation. Finished jobs are left as they are.
    pub async fn cancel(&self, id: &JobId) -> Result<(), SchedulerError> {
        let record = self.store.get_job(id).await?;
        if record.status.is_terminal() {
            tracing::debug!("Job {} already {}, nothing to cancel", id, record.status);
            return Ok(());
        }

        self.queue.request_cancel(id);
        tracing::info!("Cancellation requested for job {}", id);
        Ok(())
    }

    /// Get a job record, images included.
    pub async fn job(&self, id: &JobId) -> Result<JobRecord, SchedulerError> {
        Ok(self.store.get_job(id).await?)
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.bus.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }

    /// Jobs waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Names of the backends usable in this process.
    pub fn available_backends(&self) -> Vec<String> {
        self.registry.list_available()
    }

    /// Describe the worker's backend, initializing it if it has not run yet.
    pub async fn backend_report(&self) -> Result<BackendReport, SchedulerError> {
        self.call_worker(|reply| WorkerMessage::BackendReport { reply })
            .await
    }

    pub async fn load_model(&self, model_id: &str) -> Result<(), SchedulerError> {
        let model_id = model_id.to_string();
        self.call_worker(|reply| WorkerMessage::LoadModel { model_id, reply })
            .await
    }

    pub async fn unload_model(&self) -> Result<(), SchedulerError> {
        self.call_worker(|reply| WorkerMessage::UnloadModel { reply })
            .await
    }

    async fn call_worker<T, F>(&self, build: F) -> Result<T, SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce(RpcReplyPort<Result<T, SchedulerError>>) -> WorkerMessage,
    {
        let result = ractor::rpc::call(self.worker.actor(), build, Some(WORKER_CALL_TIMEOUT))
            .await
            .map_err(|e| SchedulerError::Actor(e.to_string()))?;

        match result {
            CallResult::Success(reply) => reply,
            CallResult::Timeout => Err(SchedulerError::Actor(
                "timed out waiting for the worker".to_string(),
            )),
            CallResult::SenderError => Err(SchedulerError::Actor(
                "worker dropped the request".to_string(),
            )),
        }
    }

    /// Stop the worker and shut its backend down.
    pub async fn stop(self) -> Result<(), SchedulerError> {
        tracing::info!("Stopping scheduler ({} job(s) still queued)", self.queue.len());
        self.worker.stop().await
    }
}

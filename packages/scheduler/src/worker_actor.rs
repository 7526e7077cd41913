//! Worker actor: the single consumer that runs jobs one at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use forge_core::{BackendConfig, GenerateRequest, GeneratedImage, JobEvent, JobId, JobStatus};
use forge_db::{DbError, JobStore};
use futures_util::StreamExt;
use ractor::concurrency::JoinHandle;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::watch;

use crate::backend::{BackendError, DEMO_BACKEND, GenerationUpdate, SharedBackend};
use crate::bus::EventBus;
use crate::messages::{BackendReport, SchedulerError, WorkerMessage};
use crate::queue::{JobQueue, QueuedJob};
use crate::registry::BackendRegistry;

/// Collaborators handed to a new worker.
pub struct WorkerArgs {
    pub queue: Arc<JobQueue>,
    pub bus: Arc<EventBus>,
    pub store: Arc<dyn JobStore>,
    pub registry: Arc<BackendRegistry>,
    pub backend_config: BackendConfig,
    /// Longest a single dequeue waits before the stop signal is re-checked.
    pub poll_interval: Duration,
}

pub(crate) struct WorkerStart {
    args: WorkerArgs,
    stop_rx: watch::Receiver<bool>,
}

enum BackendSlot {
    Unresolved,
    Active {
        name: String,
        fallback_from: Option<String>,
        backend: SharedBackend,
    },
    /// Neither the configured backend nor the fallback could start.
    Unavailable(String),
    Released,
}

/// How a job left the worker.
#[derive(Debug, PartialEq, Eq)]
enum JobOutcome {
    Done,
    Stopped,
}

enum Execution {
    Finished {
        images: Vec<GeneratedImage>,
        cancelled: bool,
    },
    Stopped,
}

/// State for the worker actor.
pub(crate) struct WorkerActorState {
    queue: Arc<JobQueue>,
    bus: Arc<EventBus>,
    store: Arc<dyn JobStore>,
    registry: Arc<BackendRegistry>,
    backend_config: BackendConfig,
    poll_interval: Duration,
    stop_rx: watch::Receiver<bool>,
    slot: BackendSlot,
    jobs_processed: u64,
}

/// Worker actor that executes jobs.
pub(crate) struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerStart;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        start: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let WorkerStart { args, stop_rx } = start;
        tracing::info!(
            "Starting worker (backend {}, poll interval {:?})",
            args.backend_config.active,
            args.poll_interval
        );

        Ok(WorkerActorState {
            queue: args.queue,
            bus: args.bus,
            store: args.store,
            registry: args.registry,
            backend_config: args.backend_config,
            poll_interval: args.poll_interval,
            stop_rx,
            slot: BackendSlot::Unresolved,
            jobs_processed: 0,
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        myself.send_message(WorkerMessage::Poll)?;
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                let mut stop_rx = state.stop_rx.clone();
                let next = tokio::select! {
                    biased;
                    _ = stop_signalled(&mut stop_rx) => {
                        myself.stop(None);
                        return Ok(());
                    }
                    job = state.queue.dequeue_timeout(state.poll_interval) => job,
                };

                state.record_discarded().await;

                if let Some(job) = next
                    && state.process_job(job).await == JobOutcome::Stopped
                {
                    myself.stop(None);
                    return Ok(());
                }

                myself.send_message(WorkerMessage::Poll)?;
            }

            WorkerMessage::BackendReport { reply } => {
                let _ = reply.send(state.backend_report().await);
            }

            WorkerMessage::LoadModel { model_id, reply } => {
                let _ = reply.send(state.load_model(&model_id).await);
            }

            WorkerMessage::UnloadModel { reply } => {
                let _ = reply.send(state.unload_model().await);
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        // A stop can interrupt a dequeue that already skipped cancelled jobs.
        state.record_discarded().await;

        if let BackendSlot::Active { name, backend, .. } =
            std::mem::replace(&mut state.slot, BackendSlot::Released)
        {
            let mut guard = backend.lock().await;
            match guard.shutdown().await {
                Ok(()) => tracing::info!("Backend {} shut down", name),
                Err(e) => tracing::warn!("Backend {} failed to shut down: {}", name, e),
            }
        }

        tracing::info!("Worker stopped after {} job(s)", state.jobs_processed);
        Ok(())
    }
}

impl WorkerActorState {
    /// Resolve the backend once, falling back to the demo backend.
    ///
    /// The outcome sticks for the worker's lifetime, including an
    /// unavailable one.
    async fn resolve_backend(&mut self) -> Result<(String, SharedBackend), SchedulerError> {
        match &self.slot {
            BackendSlot::Active { name, backend, .. } => {
                return Ok((name.clone(), backend.clone()));
            }
            BackendSlot::Unavailable(reason) => {
                return Err(SchedulerError::BackendUnavailable(reason.clone()));
            }
            BackendSlot::Released => {
                return Err(SchedulerError::BackendUnavailable(
                    "worker is shutting down".to_string(),
                ));
            }
            BackendSlot::Unresolved => {}
        }

        let configured = self.backend_config.active.clone();
        let first_failure = match self.start_backend(&configured).await {
            Ok(backend) => {
                self.slot = BackendSlot::Active {
                    name: configured.clone(),
                    fallback_from: None,
                    backend: backend.clone(),
                };
                return Ok((configured, backend));
            }
            Err(reason) => reason,
        };

        let reason = if configured == DEMO_BACKEND {
            first_failure
        } else {
            tracing::warn!(
                "Backend {} unavailable ({}), falling back to {}",
                configured,
                first_failure,
                DEMO_BACKEND
            );
            match self.start_backend(DEMO_BACKEND).await {
                Ok(backend) => {
                    self.slot = BackendSlot::Active {
                        name: DEMO_BACKEND.to_string(),
                        fallback_from: Some(configured),
                        backend: backend.clone(),
                    };
                    return Ok((DEMO_BACKEND.to_string(), backend));
                }
                Err(fallback_failure) => format!("{first_failure}; {fallback_failure}"),
            }
        };

        tracing::error!("No usable backend: {}", reason);
        self.slot = BackendSlot::Unavailable(reason.clone());
        Err(SchedulerError::BackendUnavailable(reason))
    }

    async fn start_backend(&self, name: &str) -> Result<SharedBackend, String> {
        let backend = self
            .registry
            .get(name)
            .ok_or_else(|| format!("{name} is not registered"))?;

        {
            let mut guard = backend.lock().await;
            guard
                .initialize(&self.backend_config)
                .await
                .map_err(|e| format!("{name} failed to initialize: {e}"))?;
        }

        tracing::info!("Backend {} initialized", name);
        Ok(backend)
    }

    /// Record jobs the queue skipped because they were cancelled while waiting.
    async fn record_discarded(&self) {
        for id in self.queue.take_discarded() {
            match self
                .store
                .set_status(&id, JobStatus::Cancelled, Utc::now())
                .await
            {
                Ok(()) => tracing::info!("Job {} cancelled before it started", id),
                Err(e) => tracing::warn!("Failed to record cancellation of job {}: {}", id, e),
            }
        }
    }

    async fn process_job(&mut self, job: QueuedJob) -> JobOutcome {
        let id = job.job_id.clone();
        let clock = Instant::now();

        match self
            .store
            .set_status(&id, JobStatus::Running, Utc::now())
            .await
        {
            Ok(()) => {}
            Err(DbError::NotFound(_)) => {
                tracing::error!("Job {} not found in store, abandoning", id);
                self.queue.finish(&id);
                return JobOutcome::Done;
            }
            Err(e) => {
                self.fail_job(&id, &e.to_string()).await;
                self.queue.finish(&id);
                return JobOutcome::Done;
            }
        }

        self.bus.publish(JobEvent::started(id.clone()));
        tracing::info!("Job {} started", id);

        let outcome = match self.execute(&job).await {
            Ok(Execution::Finished { images, cancelled }) => {
                let cancelled = cancelled || self.queue.is_cancelled(&id);
                match self.finalize(&id, &images, cancelled).await {
                    Ok(status) => {
                        let elapsed_seconds = round_to_hundredths(clock.elapsed().as_secs_f64());
                        tracing::info!(
                            "Job {} {} with {} image(s) in {}s",
                            id,
                            status,
                            images.len(),
                            elapsed_seconds
                        );
                        self.bus.publish(JobEvent::JobCompleted {
                            job_id: id.clone(),
                            status,
                            images,
                            elapsed_seconds,
                            timestamp: Utc::now(),
                        });
                    }
                    Err(e) => self.fail_job(&id, &e.to_string()).await,
                }
                JobOutcome::Done
            }
            Ok(Execution::Stopped) => {
                self.fail_job(&id, "worker stopped before the job finished")
                    .await;
                JobOutcome::Stopped
            }
            Err(e) => {
                self.fail_job(&id, &e.to_string()).await;
                JobOutcome::Done
            }
        };

        self.queue.finish(&id);
        self.jobs_processed += 1;
        outcome
    }

    /// Drive the backend's stream, republishing progress.
    async fn execute(&mut self, job: &QueuedJob) -> Result<Execution, SchedulerError> {
        let id = &job.job_id;
        let request = GenerateRequest::from_params(&job.params)?;
        let (name, backend) = self.resolve_backend().await?;

        let mut stream = backend.lock().await.generate(request, id.clone())?;
        tracing::debug!("Job {} running on backend {}", id, name);

        let mut stop_rx = self.stop_rx.clone();
        let mut images = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = stop_signalled(&mut stop_rx) => return Ok(Execution::Stopped),
                next = stream.next() => next,
            };
            let Some(update) = next else {
                break;
            };

            if self.queue.is_cancelled(id) {
                tracing::info!("Job {} cancelled while running", id);
                return Ok(Execution::Finished {
                    images: images.unwrap_or_default(),
                    cancelled: true,
                });
            }

            match update? {
                GenerationUpdate::Progress {
                    step,
                    total_steps,
                    percentage,
                    preview_image,
                } => {
                    tracing::debug!("Job {} step {}/{}", id, step, total_steps);
                    self.bus.publish(JobEvent::JobProgress {
                        job_id: id.clone(),
                        step,
                        total_steps,
                        percentage,
                        preview_image,
                        timestamp: Utc::now(),
                    });
                }
                GenerationUpdate::Result { images: produced } => images = Some(produced),
            }
        }

        match images {
            Some(images) => Ok(Execution::Finished {
                images,
                cancelled: false,
            }),
            None => Err(BackendError::Generation(format!(
                "backend {name} ended without a result"
            ))
            .into()),
        }
    }

    async fn finalize(
        &self,
        id: &JobId,
        images: &[GeneratedImage],
        cancelled: bool,
    ) -> Result<JobStatus, DbError> {
        if !images.is_empty() {
            self.store.append_images(id, images).await?;
        }

        let status = if cancelled {
            JobStatus::Cancelled
        } else {
            JobStatus::Completed
        };
        self.store.set_status(id, status, Utc::now()).await?;
        Ok(status)
    }

    async fn fail_job(&self, id: &JobId, message: &str) {
        tracing::error!("Job {} failed: {}", id, message);

        if let Err(e) = self
            .store
            .set_status(id, JobStatus::Failed, Utc::now())
            .await
        {
            tracing::warn!("Failed to mark job {} as failed: {}", id, e);
        }
        if let Err(e) = self.store.append_error(id, message).await {
            tracing::warn!("Failed to record error for job {}: {}", id, e);
        }

        self.bus.publish(JobEvent::failed(id.clone(), message));
    }

    async fn backend_report(&mut self) -> Result<BackendReport, SchedulerError> {
        let (name, backend) = self.resolve_backend().await?;
        let fallback_from = match &self.slot {
            BackendSlot::Active { fallback_from, .. } => fallback_from.clone(),
            _ => None,
        };

        let guard = backend.lock().await;
        Ok(BackendReport {
            name,
            fallback_from,
            health: guard.health_check(),
            system: guard.system_info(),
            modes: guard.supported_modes(),
            models: guard.list_available_models(),
            jobs_processed: self.jobs_processed,
        })
    }

    async fn load_model(&mut self, model_id: &str) -> Result<(), SchedulerError> {
        let (_, backend) = self.resolve_backend().await?;
        let mut guard = backend.lock().await;
        guard.load_model(model_id).await?;
        Ok(())
    }

    async fn unload_model(&mut self) -> Result<(), SchedulerError> {
        let (_, backend) = self.resolve_backend().await?;
        let mut guard = backend.lock().await;
        guard.unload_model().await?;
        Ok(())
    }
}

/// Resolves once a stop is requested or the handle is gone.
async fn stop_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Owner's handle on a running worker.
pub struct WorkerHandle {
    actor: ActorRef<WorkerMessage>,
    join: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
}

impl WorkerHandle {
    pub fn actor(&self) -> &ActorRef<WorkerMessage> {
        &self.actor
    }

    /// Abort the in-flight dequeue or job, then wait for the backend to shut down.
    pub async fn stop(self) -> Result<(), SchedulerError> {
        self.stop_tx.send_replace(true);
        self.actor.stop(None);
        self.join
            .await
            .map_err(|e| SchedulerError::Actor(format!("worker task failed: {e}")))
    }
}

/// Spawn the worker actor.
pub async fn spawn_worker(args: WorkerArgs) -> Result<WorkerHandle, SchedulerError> {
    let (stop_tx, stop_rx) = watch::channel(false);

    let (actor, join) = Actor::spawn(None, WorkerActor, WorkerStart { args, stop_rx })
        .await
        .map_err(|e| SchedulerError::Spawn(e.to_string()))?;

    Ok(WorkerHandle {
        actor,
        join,
        stop_tx,
    })
}

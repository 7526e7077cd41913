#![allow(dead_code)]

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use forge_core::{ForgeConfig, GenerateRequest, JobEvent, JobId};
use forge_db::{DbConfig, DbError, JobRepository, JobStore};
use forge_scheduler::{BackendRegistry, Scheduler, Subscription};
use forge_storage::{Storage, StorageConfig, StorageError};

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Fast settings: short demo steps and a short poll interval.
pub fn test_config(active: &str) -> ForgeConfig {
    let mut config = ForgeConfig::default();
    config.backend = config
        .backend
        .with_active(active)
        .with_demo_step_delay(Duration::from_millis(5));
    config.queue.poll_interval_ms = 20;
    config
}

pub fn memory_storage() -> Result<Storage, StorageError> {
    Storage::new(StorageConfig::memory())
}

pub async fn memory_store() -> Result<Arc<dyn JobStore>, DbError> {
    let db = forge_db::init(DbConfig::memory().with_namespace("scheduler_test")).await?;
    Ok(Arc::new(JobRepository::new(db)))
}

/// Scheduler over an in-memory store, artifact sink and the discovered backends.
pub async fn start_scheduler(config: ForgeConfig) -> Result<Scheduler, Box<dyn Error>> {
    let registry = BackendRegistry::discover(memory_storage()?);
    start_with_registry(config, registry).await
}

pub async fn start_with_registry(
    config: ForgeConfig,
    registry: BackendRegistry,
) -> Result<Scheduler, Box<dyn Error>> {
    let store = memory_store().await?;
    Ok(Scheduler::start(config, store, registry).await?)
}

pub fn request(steps: u32, seed: i64) -> GenerateRequest {
    GenerateRequest::default()
        .with_prompt("a red fox in fresh snow")
        .with_size(64, 64)
        .with_steps(steps)
        .with_seed(seed)
}

pub async fn next_event(sub: &mut Subscription) -> Result<JobEvent, Box<dyn Error>> {
    match tokio::time::timeout(EVENT_TIMEOUT, sub.recv()).await {
        Ok(Some(event)) => Ok(event),
        Ok(None) => Err("subscription closed".into()),
        Err(_) => Err("timed out waiting for an event".into()),
    }
}

/// Every event received until `id` reaches a terminal event, that one included.
pub async fn events_until_terminal(
    sub: &mut Subscription,
    id: &JobId,
) -> Result<Vec<JobEvent>, Box<dyn Error>> {
    let mut events = Vec::new();
    loop {
        let event = next_event(sub).await?;
        let done = event.is_terminal() && event.job_id() == id;
        events.push(event);
        if done {
            return Ok(events);
        }
    }
}

/// Only the events that belong to `id`.
pub fn for_job<'a>(events: &'a [JobEvent], id: &JobId) -> Vec<&'a JobEvent> {
    events.iter().filter(|e| e.job_id() == id).collect()
}

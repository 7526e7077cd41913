//! Message types for actor communication.

use forge_core::{GenerationMode, ValidationError};
use forge_db::DbError;
use ractor::RpcReplyPort;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{BackendError, HealthStatus, ModelInfo, SystemInfo};

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Take the next job from the queue, if any, and run it.
    Poll,

    /// Describe the active backend, resolving it first if needed.
    BackendReport {
        reply: RpcReplyPort<Result<BackendReport, SchedulerError>>,
    },

    /// Load a model on the active backend.
    LoadModel {
        model_id: String,
        reply: RpcReplyPort<Result<(), SchedulerError>>,
    },

    /// Unload the active backend's model.
    UnloadModel {
        reply: RpcReplyPort<Result<(), SchedulerError>>,
    },
}

/// Introspection snapshot of the worker's backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendReport {
    pub name: String,
    /// Set when the configured backend was replaced by the fallback.
    pub fallback_from: Option<String>,
    pub health: HealthStatus,
    pub system: SystemInfo,
    pub modes: Vec<GenerationMode>,
    pub models: Vec<ModelInfo>,
    pub jobs_processed: u64,
}

/// Errors surfaced by the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job queue is full")]
    QueueFull,
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("no usable backend: {0}")]
    BackendUnavailable(String),
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),
    #[error("job store error: {0}")]
    Store(DbError),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("actor error: {0}")]
    Actor(String),
    #[error("failed to spawn worker: {0}")]
    Spawn(String),
}

impl From<DbError> for SchedulerError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(id) => SchedulerError::NotFound(id.to_string()),
            other => SchedulerError::Store(other),
        }
    }
}

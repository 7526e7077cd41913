//! Execution backends.
//!
//! The worker only sees [`Backend`] trait objects handed out by the
//! [`BackendRegistry`](crate::BackendRegistry); it never inspects concrete
//! types.

mod demo;
mod stream;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use forge_core::{BackendConfig, GenerateRequest, GenerationMode, JobId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use demo::{DEMO_BACKEND, DemoBackend};
pub use stream::{GenerationSink, GenerationStream, GenerationUpdate, generation_channel, percentage};

/// Future type for async backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

/// A backend instance shared between the registry and the worker.
pub type SharedBackend = Arc<tokio::sync::Mutex<Box<dyn Backend>>>;

/// Backend errors.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend {0} is not initialized")]
    NotInitialized(String),
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("generation stream closed")]
    StreamClosed,
    #[error("storage error: {0}")]
    Storage(#[from] forge_storage::StorageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Snapshot returned by [`Backend::health_check`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub initialized: bool,
    pub loaded_model: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub loaded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub backend: String,
    pub device: String,
    pub half_precision: bool,
    /// Free-form details such as VRAM or driver versions.
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Capability set every execution backend provides.
///
/// The worker calls `initialize` at most once before any generation and
/// `shutdown` at most once when it stops.
pub trait Backend: Send + 'static {
    /// Registry name of this backend.
    fn name(&self) -> &str;

    /// Acquire devices, load default weights, warm caches.
    fn initialize<'a>(&'a mut self, config: &'a BackendConfig) -> BackendFuture<'a, ()>;

    /// Release everything `initialize` acquired.
    fn shutdown(&mut self) -> BackendFuture<'_, ()>;

    /// Cheap status snapshot without side effects.
    fn health_check(&self) -> HealthStatus;

    /// Start generating for one job.
    ///
    /// The stream yields zero or more progress units followed by exactly one
    /// result unit, or ends with an error. Heavy work runs off the caller's
    /// task so the consumer can stop reading at any point.
    fn generate(
        &mut self,
        request: GenerateRequest,
        job_id: JobId,
    ) -> Result<GenerationStream, BackendError>;

    /// Make `model_id` the active model. No-op if it already is.
    fn load_model<'a>(&'a mut self, model_id: &'a str) -> BackendFuture<'a, ()>;

    /// Drop the active model.
    fn unload_model(&mut self) -> BackendFuture<'_, ()>;

    fn list_available_models(&self) -> Vec<ModelInfo>;

    fn supported_modes(&self) -> Vec<GenerationMode>;

    fn system_info(&self) -> SystemInfo;
}

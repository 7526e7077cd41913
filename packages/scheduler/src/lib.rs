//! Job scheduling for image generation.
//!
//! # Architecture
//!
//! - [`JobQueue`] - Bounded FIFO with cooperative cancellation
//! - [`EventBus`] - Per-subscriber bounded fan-out of [`JobEvent`]s
//! - [`Backend`] - Capability interface of an execution backend
//! - [`BackendRegistry`] - Usable backends, one instance per name
//! - `WorkerActor` - Single Ractor actor that runs jobs serially
//! - [`Scheduler`] - Submission entrypoint owning all of the above
//!
//! # Usage
//!
//! ```ignore
//! use forge_scheduler::{BackendRegistry, Scheduler};
//!
//! let registry = BackendRegistry::discover(storage);
//! let scheduler = Scheduler::start(config, store, registry).await?;
//!
//! let mut events = scheduler.subscribe();
//! let id = scheduler.submit(request).await?;
//! while let Some(event) = events.recv().await { ... }
//! ```
//!
//! [`JobEvent`]: forge_core::JobEvent

pub mod backend;
mod bus;
mod messages;
mod queue;
mod registry;
mod scheduler;
mod worker_actor;

pub use backend::{
    Backend, BackendError, BackendFuture, DemoBackend, GenerationSink, GenerationStream,
    GenerationUpdate, HealthStatus, ModelInfo, SharedBackend, SystemInfo, generation_channel,
};
pub use bus::{EventBus, SubscriberId, Subscription};
pub use messages::{BackendReport, SchedulerError, WorkerMessage};
pub use queue::{JobQueue, QueueError, QueuedJob};
pub use registry::{BackendFactory, BackendCheck, BackendRegistry};
pub use scheduler::Scheduler;
pub use worker_actor::{WorkerArgs, WorkerHandle, spawn_worker};

/// Re-export ractor types for convenience.
pub use ractor::{ActorRef, RpcReplyPort};

//! Core domain types for the generation scheduler.
//!
//! This crate contains shared types used across all packages:
//! - Job identifiers, the status state machine and job records
//! - Generation requests and their validation
//! - Events broadcast to observers
//! - Runtime configuration

mod config;
mod events;
mod job;
mod request;

pub use config::{BackendConfig, ConfigError, ForgeConfig, GenerationConfig, QueueConfig};
pub use events::JobEvent;
pub use job::{GeneratedImage, JobId, JobRecord, JobStatus};
pub use request::{GenerateRequest, GenerationMode, MAX_SEED, ValidationError};

//! Runtime configuration for backends, generation defaults and the queue.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value} ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("failed reading {var}: {source}")]
    Env {
        var: &'static str,
        source: std::env::VarError,
    },
}

/// Execution backend selection and device tuning.
///
/// Read once by the worker when it initializes its backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Name of the backend to run, as registered in the backend registry.
    pub active: String,
    pub device: String,
    pub half_precision: bool,
    pub cpu_offload: bool,
    pub attention_slicing: bool,
    pub vae_tiling: bool,
    /// Pause between demo backend progress steps (milliseconds).
    pub demo_step_delay_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            active: "demo".to_string(),
            device: "cuda".to_string(),
            half_precision: true,
            cpu_offload: false,
            attention_slicing: false,
            vae_tiling: true,
            demo_step_delay_ms: 50,
        }
    }
}

impl BackendConfig {
    /// Select the backend by name.
    pub fn with_active(mut self, name: impl Into<String>) -> Self {
        self.active = name.into();
        self
    }

    pub fn with_demo_step_delay(mut self, delay: Duration) -> Self {
        self.demo_step_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn demo_step_delay(&self) -> Duration {
        Duration::from_millis(self.demo_step_delay_ms)
    }
}

/// Defaults applied to new requests, plus hard limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub default_steps: u32,
    pub default_cfg_scale: f64,
    pub default_width: u32,
    pub default_height: u32,
    pub default_sampler: String,
    pub max_width: u32,
    pub max_height: u32,
    pub max_batch_size: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_steps: 30,
            default_cfg_scale: 7.0,
            default_width: 512,
            default_height: 512,
            default_sampler: "euler_a".to_string(),
            max_width: 2048,
            max_height: 2048,
            max_batch_size: 4,
        }
    }
}

/// Sizing of the job queue and event fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of jobs waiting to run.
    pub capacity: usize,
    /// Maximum number of undelivered events per subscriber.
    pub subscriber_capacity: usize,
    /// How long the worker waits on an empty queue before re-checking for stop.
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            subscriber_capacity: 100,
            poll_interval_ms: 1000,
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Complete scheduler configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub backend: BackendConfig,
    pub generation: GenerationConfig,
    pub queue: QueueConfig,
}

impl ForgeConfig {
    /// Build a config from defaults overlaid with environment variables.
    ///
    /// Backend:
    /// - `FORGE_BACKEND` (default: `demo`)
    /// - `FORGE_DEVICE` (default: `cuda`)
    /// - `FORGE_HALF_PRECISION`, `FORGE_CPU_OFFLOAD`, `FORGE_ATTENTION_SLICING`,
    ///   `FORGE_VAE_TILING` (`true`/`false`)
    /// - `FORGE_DEMO_STEP_DELAY_MS`
    ///
    /// Queue:
    /// - `FORGE_QUEUE_CAPACITY`, `FORGE_SUBSCRIBER_CAPACITY`, `FORGE_POLL_INTERVAL_MS`
    ///
    /// Generation:
    /// - `FORGE_DEFAULT_STEPS`, `FORGE_MAX_BATCH_SIZE`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(active) = read_string("FORGE_BACKEND")? {
            cfg.backend.active = active;
        }
        if let Some(device) = read_string("FORGE_DEVICE")? {
            cfg.backend.device = device;
        }
        if let Some(v) = read_bool("FORGE_HALF_PRECISION")? {
            cfg.backend.half_precision = v;
        }
        if let Some(v) = read_bool("FORGE_CPU_OFFLOAD")? {
            cfg.backend.cpu_offload = v;
        }
        if let Some(v) = read_bool("FORGE_ATTENTION_SLICING")? {
            cfg.backend.attention_slicing = v;
        }
        if let Some(v) = read_bool("FORGE_VAE_TILING")? {
            cfg.backend.vae_tiling = v;
        }
        if let Some(v) = read_number("FORGE_DEMO_STEP_DELAY_MS")? {
            cfg.backend.demo_step_delay_ms = v;
        }

        if let Some(v) = read_number("FORGE_QUEUE_CAPACITY")? {
            cfg.queue.capacity = v as usize;
        }
        if let Some(v) = read_number("FORGE_SUBSCRIBER_CAPACITY")? {
            cfg.queue.subscriber_capacity = v as usize;
        }
        if let Some(v) = read_number("FORGE_POLL_INTERVAL_MS")? {
            cfg.queue.poll_interval_ms = v;
        }

        if let Some(v) = read_number("FORGE_DEFAULT_STEPS")? {
            cfg.generation.default_steps = v as u32;
        }
        if let Some(v) = read_number("FORGE_MAX_BATCH_SIZE")? {
            cfg.generation.max_batch_size = v as u32;
        }

        Ok(cfg)
    }
}

fn read_string(var: &'static str) -> Result<Option<String>, ConfigError> {
    match std::env::var(var) {
        Ok(v) => Ok(non_empty(v)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(source) => Err(ConfigError::Env { var, source }),
    }
}

fn read_bool(var: &'static str) -> Result<Option<bool>, ConfigError> {
    let Some(v) = read_string(var)? else {
        return Ok(None);
    };

    let parsed = match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => true,
        "0" | "false" | "no" | "n" => false,
        _ => {
            return Err(ConfigError::InvalidValue {
                var,
                value: v,
                reason: "expected true/false".to_string(),
            });
        }
    };
    Ok(Some(parsed))
}

fn read_number(var: &'static str) -> Result<Option<u64>, ConfigError> {
    let Some(v) = read_string(var)? else {
        return Ok(None);
    };

    v.parse::<u64>()
        .map(Some)
        .map_err(|e| ConfigError::InvalidValue {
            var,
            value: v,
            reason: e.to_string(),
        })
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

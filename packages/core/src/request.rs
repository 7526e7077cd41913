//! Generation request schema and validation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::GenerationConfig;

/// Kind of generation a request asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    #[default]
    Txt2Img,
    Img2Img,
    Inpaint,
    Outpaint,
    Upscale,
}

impl std::fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationMode::Txt2Img => write!(f, "txt2img"),
            GenerationMode::Img2Img => write!(f, "img2img"),
            GenerationMode::Inpaint => write!(f, "inpaint"),
            GenerationMode::Outpaint => write!(f, "outpaint"),
            GenerationMode::Upscale => write!(f, "upscale"),
        }
    }
}

/// Parameters of one generation job.
///
/// A negative `seed` asks the backend to choose one; the chosen seed is
/// echoed back on every produced image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateRequest {
    pub mode: GenerationMode,
    pub prompt: String,
    pub negative_prompt: String,
    pub model_id: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg_scale: f64,
    pub seed: i64,
    pub sampler: String,
    pub batch_size: u32,
}

impl Default for GenerateRequest {
    fn default() -> Self {
        Self {
            mode: GenerationMode::Txt2Img,
            prompt: String::new(),
            negative_prompt: String::new(),
            model_id: String::new(),
            width: 512,
            height: 512,
            steps: 30,
            cfg_scale: 7.0,
            seed: -1,
            sampler: "euler_a".to_string(),
            batch_size: 1,
        }
    }
}

/// A request field outside its accepted range.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
    #[error("{field} must be a multiple of 8, got {value}")]
    NotMultipleOfEight { field: &'static str, value: u32 },
    #[error("invalid parameters: {0}")]
    Malformed(String),
}

/// Largest explicit seed a request may carry.
pub const MAX_SEED: i64 = u32::MAX as i64;

impl GenerateRequest {
    /// A request prefilled with the configured defaults.
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            width: config.default_width,
            height: config.default_height,
            steps: config.default_steps,
            cfg_scale: config.default_cfg_scale,
            sampler: config.default_sampler.clone(),
            ..Default::default()
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Check every field against the schema bounds and the configured limits.
    pub fn validate(&self, limits: &GenerationConfig) -> Result<(), ValidationError> {
        check_dimension("width", self.width, limits.max_width)?;
        check_dimension("height", self.height, limits.max_height)?;
        check_range("steps", f64::from(self.steps), 1.0, 150.0)?;
        check_range("cfg_scale", self.cfg_scale, 1.0, 30.0)?;
        check_range(
            "batch_size",
            f64::from(self.batch_size),
            1.0,
            f64::from(limits.max_batch_size),
        )?;
        // Any negative seed means "random"; explicit seeds share the random range.
        if self.seed > MAX_SEED {
            return Err(ValidationError::OutOfRange {
                field: "seed",
                min: -1.0,
                max: MAX_SEED as f64,
                value: self.seed as f64,
            });
        }
        Ok(())
    }

    /// Serialize into the opaque parameter mapping carried by queued jobs.
    pub fn to_params(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }

    /// Rebuild a request from an opaque parameter mapping.
    ///
    /// Missing keys take their defaults; mistyped values are rejected.
    pub fn from_params(
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, ValidationError> {
        serde_json::from_value(serde_json::Value::Object(params.clone()))
            .map_err(|e| ValidationError::Malformed(e.to_string()))
    }
}

fn check_dimension(field: &'static str, value: u32, max: u32) -> Result<(), ValidationError> {
    check_range(field, f64::from(value), 64.0, f64::from(max.min(2048)))?;
    if value % 8 != 0 {
        return Err(ValidationError::NotMultipleOfEight { field, value });
    }
    Ok(())
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if value.is_nan() || value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            min,
            max,
            value,
        });
    }
    Ok(())
}

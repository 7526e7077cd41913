//! Procedural backend with no GPU or model dependencies.
//!
//! Output is fully determined by the seed, which makes it useful for
//! exercising the whole pipeline in development and tests.

use std::io::Cursor;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use forge_core::{BackendConfig, GenerateRequest, GeneratedImage, GenerationMode, JobId};
use forge_storage::Storage;
use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{
    Backend, BackendError, BackendFuture, GenerationSink, GenerationStream, HealthStatus,
    ModelInfo, SystemInfo, generation_channel,
};

pub const DEMO_BACKEND: &str = "demo";
const DEMO_MODEL: &str = "demo-model";
const THUMBNAIL_MAX_SIDE: u32 = 256;

pub struct DemoBackend {
    storage: Storage,
    step_delay: Duration,
    initialized: bool,
    loaded_model: Option<String>,
}

impl DemoBackend {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            step_delay: BackendConfig::default().demo_step_delay(),
            initialized: false,
            loaded_model: None,
        }
    }
}

impl Backend for DemoBackend {
    fn name(&self) -> &str {
        DEMO_BACKEND
    }

    fn initialize<'a>(&'a mut self, config: &'a BackendConfig) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.step_delay = config.demo_step_delay();
            self.loaded_model = Some(DEMO_MODEL.to_string());
            self.initialized = true;
            tracing::info!(
                "Demo backend initialized (step delay {:?}, {} storage)",
                self.step_delay,
                self.storage.kind_str()
            );
            Ok(())
        })
    }

    fn shutdown(&mut self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.initialized = false;
            self.loaded_model = None;
            tracing::info!("Demo backend shut down");
            Ok(())
        })
    }

    fn health_check(&self) -> HealthStatus {
        HealthStatus {
            healthy: true,
            initialized: self.initialized,
            loaded_model: self.loaded_model.clone(),
            message: None,
        }
    }

    fn generate(
        &mut self,
        request: GenerateRequest,
        job_id: JobId,
    ) -> Result<GenerationStream, BackendError> {
        if !self.initialized {
            return Err(BackendError::NotInitialized(DEMO_BACKEND.to_string()));
        }
        if !self.supported_modes().contains(&request.mode) {
            return Err(BackendError::Generation(format!(
                "demo backend does not support {}",
                request.mode
            )));
        }
        if self.loaded_model.is_none() {
            tracing::debug!("Reloading {} after unload", DEMO_MODEL);
            self.loaded_model = Some(DEMO_MODEL.to_string());
        }

        let seed = if request.seed >= 0 {
            request.seed
        } else {
            rand::rng().random_range(0..=i64::from(u32::MAX))
        };
        let last_offset = i64::from(request.batch_size.saturating_sub(1));
        if seed.checked_add(last_offset).is_none() {
            return Err(BackendError::Generation(format!(
                "seed {seed} leaves no room for {} per-image seeds",
                request.batch_size
            )));
        }

        let (sink, stream) = generation_channel();
        let storage = self.storage.clone();
        let step_delay = self.step_delay;

        tokio::spawn(async move {
            let images = match produce(&sink, &storage, &request, seed, step_delay).await {
                Ok(images) => images,
                Err(BackendError::StreamClosed) => {
                    tracing::debug!("Demo generation for {} abandoned by consumer", job_id);
                    return;
                }
                Err(e) => {
                    tracing::debug!("Demo generation for {} failed: {}", job_id, e);
                    let _ = sink.fail(e).await;
                    return;
                }
            };

            if sink.finish(images).await.is_err() {
                tracing::debug!("Demo result for {} arrived after consumer left", job_id);
            }
        });

        Ok(stream)
    }

    fn load_model<'a>(&'a mut self, model_id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            if model_id != DEMO_MODEL {
                return Err(BackendError::ModelNotFound(model_id.to_string()));
            }
            if self.loaded_model.as_deref() != Some(model_id) {
                self.loaded_model = Some(model_id.to_string());
                tracing::info!("Loaded model {}", model_id);
            }
            Ok(())
        })
    }

    fn unload_model(&mut self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            if let Some(model) = self.loaded_model.take() {
                tracing::info!("Unloaded model {}", model);
            }
            Ok(())
        })
    }

    fn list_available_models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo {
            id: DEMO_MODEL.to_string(),
            name: "Procedural demo generator".to_string(),
            loaded: self.loaded_model.as_deref() == Some(DEMO_MODEL),
        }]
    }

    fn supported_modes(&self) -> Vec<GenerationMode> {
        vec![GenerationMode::Txt2Img, GenerationMode::Img2Img]
    }

    fn system_info(&self) -> SystemInfo {
        let mut details = serde_json::Map::new();
        details.insert(
            "step_delay_ms".to_string(),
            serde_json::json!(self.step_delay.as_millis() as u64),
        );
        details.insert(
            "storage".to_string(),
            serde_json::json!(self.storage.kind_str()),
        );

        SystemInfo {
            backend: DEMO_BACKEND.to_string(),
            device: "cpu".to_string(),
            half_precision: false,
            details,
        }
    }
}

async fn produce(
    sink: &GenerationSink,
    storage: &Storage,
    request: &GenerateRequest,
    seed: i64,
    step_delay: Duration,
) -> Result<Vec<GeneratedImage>, BackendError> {
    for step in 1..=request.steps {
        tokio::time::sleep(step_delay).await;
        sink.progress(step, request.steps, None).await?;
    }

    let date = Utc::now().format("%Y-%m-%d").to_string();
    let mut images = Vec::with_capacity(request.batch_size as usize);

    for index in 0..request.batch_size {
        if sink.is_closed() {
            return Err(BackendError::StreamClosed);
        }

        // Range checked in `generate`.
        let image_seed = seed + i64::from(index);
        let (width, height) = (request.width.max(1), request.height.max(1));

        let (full, thumb) = tokio::task::spawn_blocking(move || {
            let image = render(image_seed, width, height);
            let thumbnail = thumbnail(&image, THUMBNAIL_MAX_SIDE);
            Ok::<_, BackendError>((
                encode(&image, ImageFormat::Png)?,
                encode(&thumbnail, ImageFormat::Jpeg)?,
            ))
        })
        .await
        .map_err(|e| BackendError::Generation(format!("render task failed: {e}")))??;

        let id = ulid::Ulid::new().to_string().to_lowercase();
        let file_path = storage
            .put_bytes(&format!("{date}/forge_{id}.png"), Bytes::from(full))
            .await?;
        let thumbnail_path = storage
            .put_bytes(
                &format!("{date}/thumbnails/forge_{id}_thumb.jpg"),
                Bytes::from(thumb),
            )
            .await?;

        images.push(GeneratedImage {
            id,
            file_path,
            thumbnail_path,
            width,
            height,
            seed: image_seed,
        });
    }

    Ok(images)
}

/// Vertical two-colour gradient with a handful of translucent discs.
fn render(seed: i64, width: u32, height: u32) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed as u64);
    let top = random_colour(&mut rng);
    let bottom = random_colour(&mut rng);

    let mut image = RgbImage::from_fn(width, height, |_, y| {
        let t = if height > 1 {
            f64::from(y) / f64::from(height - 1)
        } else {
            0.0
        };
        Rgb(std::array::from_fn(|c| lerp(top[c], bottom[c], t)))
    });

    let shortest = width.min(height);
    let shapes = rng.random_range(3..=8);
    for _ in 0..shapes {
        let cx = rng.random_range(0..width);
        let cy = rng.random_range(0..height);
        let radius = rng.random_range((shortest / 16).max(1)..=(shortest / 4).max(1));
        let colour = random_colour(&mut rng);
        blend_disc(&mut image, (cx, cy), radius, colour, 0.6);
    }

    image
}

fn blend_disc(image: &mut RgbImage, centre: (u32, u32), radius: u32, colour: [u8; 3], alpha: f64) {
    let (cx, cy) = centre;
    let r2 = i64::from(radius) * i64::from(radius);
    let x_end = (cx + radius).min(image.width() - 1);
    let y_end = (cy + radius).min(image.height() - 1);

    for y in cy.saturating_sub(radius)..=y_end {
        for x in cx.saturating_sub(radius)..=x_end {
            let dx = i64::from(x) - i64::from(cx);
            let dy = i64::from(y) - i64::from(cy);
            if dx * dx + dy * dy > r2 {
                continue;
            }
            let Rgb(pixel) = image.get_pixel_mut(x, y);
            for (current, target) in pixel.iter_mut().zip(colour) {
                *current = lerp(*current, target, alpha);
            }
        }
    }
}

/// Lanczos downscale so neither side exceeds `max_side`; smaller images are kept as is.
fn thumbnail(image: &RgbImage, max_side: u32) -> RgbImage {
    let longest = image.width().max(image.height());
    if longest <= max_side {
        return image.clone();
    }

    let width = (image.width() * max_side / longest).max(1);
    let height = (image.height() * max_side / longest).max(1);
    imageops::resize(image, width, height, FilterType::Lanczos3)
}

fn encode(image: &RgbImage, format: ImageFormat) -> Result<Vec<u8>, BackendError> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format)?;
    Ok(out.into_inner())
}

fn random_colour(rng: &mut StdRng) -> [u8; 3] {
    [rng.random(), rng.random(), rng.random()]
}

fn lerp(a: u8, b: u8, t: f64) -> u8 {
    (f64::from(a) + (f64::from(b) - f64::from(a)) * t).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_pixels() {
        let a = render(42, 64, 48);
        let b = render(42, 64, 48);
        let c = render(43, 64, 48);
        assert_eq!(a.as_raw(), b.as_raw());
        assert_ne!(a.as_raw(), c.as_raw());
        assert_eq!(a.dimensions(), (64, 48));
    }

    #[test]
    fn thumbnail_keeps_aspect_within_bound() -> Result<(), BackendError> {
        let image = render(7, 1024, 512);
        let thumb = thumbnail(&image, THUMBNAIL_MAX_SIDE);
        assert_eq!(thumb.dimensions(), (256, 128));

        let small = render(7, 128, 64);
        assert_eq!(thumbnail(&small, THUMBNAIL_MAX_SIDE).dimensions(), (128, 64));

        let jpeg = encode(&thumb, ImageFormat::Jpeg)?;
        assert!(jpeg.starts_with(&[0xFF, 0xD8, 0xFF]));
        Ok(())
    }
}

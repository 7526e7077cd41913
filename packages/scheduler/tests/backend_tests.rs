#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;

use forge_core::{BackendConfig, GenerationMode, JobId};
use forge_scheduler::{
    Backend, BackendError, BackendRegistry, DemoBackend, GenerationUpdate, generation_channel,
};
use forge_storage::{Storage, StorageConfig};
use futures_util::StreamExt;

async fn initialized_demo(storage: Storage) -> Result<DemoBackend, BackendError> {
    let mut backend = DemoBackend::new(storage);
    let config = BackendConfig::default().with_demo_step_delay(std::time::Duration::from_millis(1));
    backend.initialize(&config).await?;
    Ok(backend)
}

#[tokio::test]
async fn test_demo_requires_initialize() -> Result<(), Box<dyn Error>> {
    let mut backend = DemoBackend::new(common::memory_storage()?);
    assert!(!backend.health_check().initialized);

    let result = backend.generate(common::request(2, 1), JobId::new());
    assert!(matches!(result, Err(BackendError::NotInitialized(_))));
    Ok(())
}

#[tokio::test]
async fn test_demo_stream_progress_then_result() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let storage = Storage::new(StorageConfig::filesystem(dir.path()))?;
    let mut backend = initialized_demo(storage).await?;

    let mut request = common::request(4, 42);
    request.batch_size = 2;
    let mut stream = backend.generate(request, JobId::new())?;

    let mut percentages = Vec::new();
    let mut images = None;
    while let Some(update) = stream.next().await {
        match update? {
            GenerationUpdate::Progress { percentage, .. } => {
                assert!(images.is_none(), "progress after result");
                percentages.push(percentage);
            }
            GenerationUpdate::Result { images: produced } => images = Some(produced),
        }
    }

    assert_eq!(percentages, vec![25.0, 50.0, 75.0, 100.0]);

    let images = images.ok_or("no result unit")?;
    let seeds: Vec<i64> = images.iter().map(|i| i.seed).collect();
    assert_eq!(seeds, vec![42, 43]);
    for produced in &images {
        assert_eq!((produced.width, produced.height), (64, 64));
        assert!(produced.file_path.ends_with(".png"));
        assert_eq!(image::image_dimensions(&produced.file_path)?, (64, 64));

        assert!(produced.thumbnail_path.contains("thumbnails"));
        assert!(produced.thumbnail_path.ends_with("_thumb.jpg"));
        let thumb = std::fs::read(&produced.thumbnail_path)?;
        assert_eq!(image::guess_format(&thumb)?, image::ImageFormat::Jpeg);
    }
    Ok(())
}

#[tokio::test]
async fn test_demo_picks_seed_when_negative() -> Result<(), Box<dyn Error>> {
    let mut backend = initialized_demo(common::memory_storage()?).await?;
    let mut stream = backend.generate(common::request(1, -1), JobId::new())?;

    let mut seed = None;
    while let Some(update) = stream.next().await {
        if let GenerationUpdate::Result { images } = update? {
            seed = images.first().map(|i| i.seed);
        }
    }

    let seed = seed.ok_or("no image produced")?;
    assert!((0..=i64::from(u32::MAX)).contains(&seed));
    Ok(())
}

#[tokio::test]
async fn test_demo_rejects_seed_without_room_for_batch() -> Result<(), Box<dyn Error>> {
    let mut backend = initialized_demo(common::memory_storage()?).await?;
    let mut request = common::request(1, i64::MAX);
    request.batch_size = 2;

    let result = backend.generate(request, JobId::new());
    assert!(matches!(result, Err(BackendError::Generation(_))));

    // A single image at the same seed still fits.
    let mut stream = backend.generate(common::request(1, i64::MAX), JobId::new())?;
    let mut seeds = Vec::new();
    while let Some(update) = stream.next().await {
        if let GenerationUpdate::Result { images } = update? {
            seeds.extend(images.iter().map(|i| i.seed));
        }
    }
    assert_eq!(seeds, vec![i64::MAX]);
    Ok(())
}

#[tokio::test]
async fn test_demo_rejects_unsupported_mode() -> Result<(), Box<dyn Error>> {
    let mut backend = initialized_demo(common::memory_storage()?).await?;
    let mut request = common::request(1, 1);
    request.mode = GenerationMode::Upscale;

    let result = backend.generate(request, JobId::new());
    assert!(matches!(result, Err(BackendError::Generation(_))));
    Ok(())
}

#[tokio::test]
async fn test_demo_model_lifecycle() -> Result<(), Box<dyn Error>> {
    let mut backend = initialized_demo(common::memory_storage()?).await?;
    assert_eq!(backend.health_check().loaded_model.as_deref(), Some("demo-model"));

    backend.unload_model().await?;
    assert!(backend.health_check().loaded_model.is_none());
    assert!(!backend.list_available_models()[0].loaded);

    let missing = backend.load_model("sdxl-base").await;
    assert!(matches!(missing, Err(BackendError::ModelNotFound(_))));

    backend.load_model("demo-model").await?;
    backend.load_model("demo-model").await?;
    assert!(backend.list_available_models()[0].loaded);

    // Generation after an unload reloads lazily.
    backend.unload_model().await?;
    let _stream = backend.generate(common::request(1, 3), JobId::new())?;
    assert!(backend.health_check().loaded_model.is_some());

    backend.shutdown().await?;
    assert!(!backend.health_check().initialized);
    Ok(())
}

#[tokio::test]
async fn test_sink_reports_closed_stream() -> Result<(), Box<dyn Error>> {
    let (sink, stream) = generation_channel();
    drop(stream);

    assert!(sink.is_closed());
    let sent = sink.progress(1, 10, None).await;
    assert!(matches!(sent, Err(BackendError::StreamClosed)));
    Ok(())
}

#[tokio::test]
async fn test_registry_memoizes_per_name() -> Result<(), Box<dyn Error>> {
    let registry = BackendRegistry::discover(common::memory_storage()?);
    assert_eq!(registry.list_available(), vec!["demo".to_string()]);

    let first = registry.get("demo").ok_or("demo missing")?;
    let second = registry.get("demo").ok_or("demo missing")?;
    assert!(Arc::ptr_eq(&first, &second));

    assert!(registry.get("diffusers").is_none());
    assert!(!registry.contains("diffusers"));
    Ok(())
}

#[tokio::test]
async fn test_failed_check_does_not_block_others() -> Result<(), Box<dyn Error>> {
    let storage = common::memory_storage()?;
    let mut registry = BackendRegistry::new();

    let registered = registry.register_checked(
        "onnx",
        Box::new(|| Err::<(), _>("onnxruntime library not found".to_string())),
        {
            let storage = storage.clone();
            move || -> Box<dyn Backend> { Box::new(DemoBackend::new(storage.clone())) }
        },
    );
    assert!(!registered);

    registry.register("demo", move || -> Box<dyn Backend> {
        Box::new(DemoBackend::new(storage.clone()))
    });

    assert_eq!(registry.list_available(), vec!["demo".to_string()]);
    assert!(registry.get("onnx").is_none());
    assert!(registry.get("demo").is_some());
    Ok(())
}

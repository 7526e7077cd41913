#![allow(clippy::disallowed_methods)]

mod common;

use chrono::Utc;
use forge_core::{GeneratedImage, JobId, JobStatus};
use std::error::Error;

use forge_db::{DbError, JobStore};

fn image(id: &str, seed: i64) -> GeneratedImage {
    GeneratedImage {
        id: id.to_string(),
        file_path: format!("outputs/forge_{id}.ppm"),
        thumbnail_path: format!("outputs/thumbnails/forge_{id}_thumb.ppm"),
        width: 64,
        height: 64,
        seed,
    }
}

#[tokio::test]
async fn test_create_and_get() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;

    let request = common::request("a lighthouse at dusk");
    let created = repo.create(&request).await?;
    assert_eq!(created.status, JobStatus::Queued);
    assert_eq!(created.prompt, "a lighthouse at dusk");
    assert!(created.started_at.is_none());

    let loaded = repo.get(&created.id).await?;
    assert_eq!(loaded.id, created.id);
    assert_eq!(loaded.params.get("steps"), Some(&serde_json::json!(5)));
    assert_eq!(loaded.params.get("seed"), Some(&serde_json::json!(42)));
    assert!(loaded.images.is_empty());

    let missing = repo.get(&JobId::from("no-such-job")).await;
    assert!(matches!(missing, Err(DbError::NotFound(_))));

    Ok(())
}

#[tokio::test]
async fn test_status_lifecycle() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;
    let job = repo.create(&common::request("lifecycle")).await?;

    let started = Utc::now();
    let running = repo.update_status(&job.id, JobStatus::Running, started).await?;
    assert_eq!(running.status, JobStatus::Running);
    assert!(running.started_at.is_some());
    assert!(running.completed_at.is_none());

    let done = repo
        .update_status(&job.id, JobStatus::Completed, Utc::now())
        .await?;
    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.completed_at.is_some());
    assert!(done.duration_ms().is_some());

    // Terminal states never move again.
    let back = repo.update_status(&job.id, JobStatus::Running, Utc::now()).await;
    assert!(matches!(
        back,
        Err(DbError::InvalidTransition {
            from: JobStatus::Completed,
            to: JobStatus::Running,
            ..
        })
    ));

    let unknown = repo
        .update_status(&JobId::from("ghost"), JobStatus::Running, Utc::now())
        .await;
    assert!(matches!(unknown, Err(DbError::NotFound(_))));

    Ok(())
}

#[tokio::test]
async fn test_error_and_images_through_store() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;
    let store: &dyn JobStore = &repo;

    let id = store.create_job(&common::request("store contract")).await?;
    store.set_status(&id, JobStatus::Running, Utc::now()).await?;

    store
        .append_images(&id, &[image("img-a", 42), image("img-b", 43)])
        .await?;
    store.append_images(&id, &[image("img-c", 44)]).await?;

    let record = store.get_job(&id).await?;
    let seeds: Vec<i64> = record.images.iter().map(|i| i.seed).collect();
    assert_eq!(seeds, vec![42, 43, 44]);

    store.set_status(&id, JobStatus::Failed, Utc::now()).await?;
    store.append_error(&id, "out of memory").await?;

    let failed = store.get_job(&id).await?;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("out of memory"));

    let missing = store.append_error(&JobId::from("ghost"), "boom").await;
    assert!(matches!(missing, Err(DbError::NotFound(_))));

    Ok(())
}

#[tokio::test]
async fn test_list_by_status() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;

    let first = repo.create(&common::request("first")).await?;
    let second = repo.create(&common::request("second")).await?;
    repo.update_status(&second.id, JobStatus::Cancelled, Utc::now())
        .await?;

    let queued = repo.list_by_status(JobStatus::Queued).await?;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id, first.id);

    let cancelled = repo.list_by_status(JobStatus::Cancelled).await?;
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].id, second.id);

    Ok(())
}

#[tokio::test]
async fn test_store_errors_name_the_job() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;
    let job = repo.create(&common::request("errors")).await?;

    let err = repo
        .update_status(&job.id, JobStatus::Completed, Utc::now())
        .await
        .err()
        .ok_or("queued job jumped straight to completed")?;
    assert_eq!(
        err.to_string(),
        format!("Job {} cannot move from queued to completed", job.id)
    );

    let err = repo
        .set_error(&JobId::from("ghost"), "boom")
        .await
        .err()
        .ok_or("error recorded on a missing job")?;
    assert!(matches!(err, DbError::NotFound(_)));
    assert_eq!(err.to_string(), "Job not found: ghost");
    Ok(())
}

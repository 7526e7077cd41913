//! Job repository backed by SurrealDB.

use chrono::{DateTime, Utc};
use forge_core::{GenerateRequest, GeneratedImage, GenerationMode, JobId, JobRecord, JobStatus};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;

use crate::{Database, DbError, JobStore, StoreFuture};

const JOB_TABLE: &str = "job";
const IMAGE_TABLE: &str = "generated_image";

/// Repository for job persistence operations.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
}

/// Internal record type for the `job` table.
#[derive(Debug, Serialize, Deserialize)]
struct StoredJob {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Thing>,
    job_id: String,
    status: JobStatus,
    mode: GenerationMode,
    prompt: String,
    negative_prompt: String,
    model_id: String,
    params: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
}

/// Internal record type for the `generated_image` table.
#[derive(Debug, Serialize, Deserialize)]
struct StoredImage {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Thing>,
    image_id: String,
    job_id: String,
    ordinal: u32,
    file_path: String,
    thumbnail_path: String,
    width: u32,
    height: u32,
    seed: i64,
}

impl StoredJob {
    fn into_record(self, images: Vec<GeneratedImage>) -> JobRecord {
        JobRecord {
            id: JobId::from(self.job_id),
            status: self.status,
            mode: self.mode,
            prompt: self.prompt,
            negative_prompt: self.negative_prompt,
            model_id: self.model_id,
            params: self.params,
            error_message: self.error_message,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            images,
        }
    }
}

impl From<StoredImage> for GeneratedImage {
    fn from(stored: StoredImage) -> Self {
        GeneratedImage {
            id: stored.image_id,
            file_path: stored.file_path,
            thumbnail_path: stored.thumbnail_path,
            width: stored.width,
            height: stored.height,
            seed: stored.seed,
        }
    }
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new `queued` job from a request.
    pub async fn create(&self, request: &GenerateRequest) -> Result<JobRecord, DbError> {
        let id = JobId::new();
        let stored = StoredJob {
            id: None,
            job_id: id.to_string(),
            status: JobStatus::Queued,
            mode: request.mode,
            prompt: request.prompt.clone(),
            negative_prompt: request.negative_prompt.clone(),
            model_id: request.model_id.clone(),
            params: request.to_params(),
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        let record: Option<StoredJob> = self
            .db
            .create((JOB_TABLE, id.to_string()))
            .content(stored)
            .await?;

        record
            .map(|r| r.into_record(Vec::new()))
            .ok_or_else(|| DbError::Query("Failed to create job".into()))
    }

    /// Get a job by ID, images included.
    pub async fn get(&self, id: &JobId) -> Result<JobRecord, DbError> {
        let stored = self.get_stored(id).await?;
        let images = self.images_for(id).await?;
        Ok(stored.into_record(images))
    }

    /// List jobs in a given status, oldest first.
    pub async fn list_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM job WHERE status = $status ORDER BY created_at ASC")
            .bind(("status", status.as_str().to_string()))
            .await?;

        let records: Vec<StoredJob> = result.take(0)?;
        Ok(records
            .into_iter()
            .map(|r| r.into_record(Vec::new()))
            .collect())
    }

    /// Move a job to a new status.
    ///
    /// `at` becomes `started_at` for `running` and `completed_at` for any
    /// terminal status.
    pub async fn update_status(
        &self,
        id: &JobId,
        status: JobStatus,
        at: DateTime<Utc>,
    ) -> Result<JobRecord, DbError> {
        let current = self.get_stored(id).await?;
        if !current.status.can_transition_to(status) {
            return Err(DbError::InvalidTransition {
                id: id.clone(),
                from: current.status,
                to: status,
            });
        }

        let patch = if status == JobStatus::Running {
            serde_json::json!({ "status": status, "started_at": at })
        } else if status.is_terminal() {
            serde_json::json!({ "status": status, "completed_at": at })
        } else {
            serde_json::json!({ "status": status })
        };

        let record: Option<StoredJob> = self
            .db
            .update((JOB_TABLE, id.to_string()))
            .merge(patch)
            .await?;

        let stored = record.ok_or_else(|| DbError::NotFound(id.clone()))?;
        let images = self.images_for(id).await?;
        Ok(stored.into_record(images))
    }

    /// Record an error message on a job.
    pub async fn set_error(&self, id: &JobId, message: &str) -> Result<(), DbError> {
        let record: Option<StoredJob> = self
            .db
            .update((JOB_TABLE, id.to_string()))
            .merge(serde_json::json!({ "error_message": message }))
            .await?;

        record.map(|_| ()).ok_or_else(|| DbError::NotFound(id.clone()))
    }

    /// Append images to a job, keeping their order after existing ones.
    pub async fn add_images(&self, id: &JobId, images: &[GeneratedImage]) -> Result<(), DbError> {
        // Fails with NotFound before anything is written.
        self.get_stored(id).await?;

        let offset = self.images_for(id).await?.len() as u32;
        for (index, image) in images.iter().enumerate() {
            let stored = StoredImage {
                id: None,
                image_id: image.id.clone(),
                job_id: id.to_string(),
                ordinal: offset + index as u32,
                file_path: image.file_path.clone(),
                thumbnail_path: image.thumbnail_path.clone(),
                width: image.width,
                height: image.height,
                seed: image.seed,
            };

            let created: Option<StoredImage> = self
                .db
                .create((IMAGE_TABLE, image.id.clone()))
                .content(stored)
                .await?;

            if created.is_none() {
                return Err(DbError::Query(format!(
                    "Failed to store image {} for job {}",
                    image.id, id
                )));
            }
        }

        tracing::debug!("Stored {} image(s) for job {}", images.len(), id);
        Ok(())
    }

    async fn get_stored(&self, id: &JobId) -> Result<StoredJob, DbError> {
        let record: Option<StoredJob> = self.db.select((JOB_TABLE, id.to_string())).await?;
        record.ok_or_else(|| DbError::NotFound(id.clone()))
    }

    async fn images_for(&self, id: &JobId) -> Result<Vec<GeneratedImage>, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM generated_image WHERE job_id = $job_id ORDER BY ordinal ASC")
            .bind(("job_id", id.to_string()))
            .await?;

        let records: Vec<StoredImage> = result.take(0)?;
        Ok(records.into_iter().map(GeneratedImage::from).collect())
    }
}

impl JobStore for JobRepository {
    fn create_job<'a>(&'a self, request: &'a GenerateRequest) -> StoreFuture<'a, JobId> {
        Box::pin(async move { self.create(request).await.map(|record| record.id) })
    }

    fn get_job<'a>(&'a self, id: &'a JobId) -> StoreFuture<'a, JobRecord> {
        Box::pin(self.get(id))
    }

    fn set_status<'a>(
        &'a self,
        id: &'a JobId,
        status: JobStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.update_status(id, status, at).await.map(|_| ()) })
    }

    fn append_error<'a>(&'a self, id: &'a JobId, message: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(self.set_error(id, message))
    }

    fn append_images<'a>(
        &'a self,
        id: &'a JobId,
        images: &'a [GeneratedImage],
    ) -> StoreFuture<'a, ()> {
        Box::pin(self.add_images(id, images))
    }
}

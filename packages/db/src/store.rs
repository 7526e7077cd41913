//! Job store contract consumed by the scheduler.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use forge_core::{GenerateRequest, GeneratedImage, JobId, JobRecord, JobStatus};

use crate::DbError;

/// Future type returned by [`JobStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DbError>> + Send + 'a>>;

/// Persistence of job records.
///
/// Unknown ids surface as [`DbError::NotFound`]; status changes that would
/// move a job backwards surface as [`DbError::InvalidTransition`].
pub trait JobStore: Send + Sync + 'static {
    /// Persist a new `queued` record and return its id.
    fn create_job<'a>(&'a self, request: &'a GenerateRequest) -> StoreFuture<'a, JobId>;

    /// Load a record together with its images.
    fn get_job<'a>(&'a self, id: &'a JobId) -> StoreFuture<'a, JobRecord>;

    /// Move a job to `status`, stamping `at` as start or completion time.
    fn set_status<'a>(
        &'a self,
        id: &'a JobId,
        status: JobStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'a, ()>;

    /// Record the error text of a failed job.
    fn append_error<'a>(&'a self, id: &'a JobId, message: &'a str) -> StoreFuture<'a, ()>;

    /// Attach generated images to a job, after any already attached.
    fn append_images<'a>(
        &'a self,
        id: &'a JobId,
        images: &'a [GeneratedImage],
    ) -> StoreFuture<'a, ()>;
}

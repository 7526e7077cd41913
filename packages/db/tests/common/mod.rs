use forge_core::GenerateRequest;
use forge_db::{DbConfig, DbError, JobRepository};

/// Each call opens a private in-memory database.
pub async fn setup_repo() -> Result<JobRepository, DbError> {
    let db = forge_db::init(DbConfig::endpoint("mem://").with_namespace("test")).await?;
    Ok(JobRepository::new(db))
}

pub fn request(prompt: &str) -> GenerateRequest {
    GenerateRequest::default()
        .with_prompt(prompt)
        .with_steps(5)
        .with_seed(42)
}

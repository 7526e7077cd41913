//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// Tables are schemaless; only the lookup indexes are declared.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(JOB_SCHEMA).await?.check()?;
    db.query(IMAGE_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

DEFINE INDEX IF NOT EXISTS job_id ON job FIELDS job_id UNIQUE;
DEFINE INDEX IF NOT EXISTS job_status ON job FIELDS status;
"#;

/// Generated image table schema.
const IMAGE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS generated_image SCHEMALESS;

DEFINE INDEX IF NOT EXISTS image_job ON generated_image FIELDS job_id;
"#;

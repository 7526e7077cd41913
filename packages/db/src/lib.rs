//! Job store for the generation scheduler, backed by SurrealDB.
//!
//! The scheduler only talks to the [`JobStore`] contract; [`JobRepository`]
//! is the SurrealDB implementation.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod schema;
mod store;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, connect};
pub use repositories::JobRepository;
pub use schema::init_schema;
pub use store::{JobStore, StoreFuture};

/// Connect with the given configuration and make sure the schema exists.
///
/// This should be called once at application startup.
pub async fn init(config: DbConfig) -> Result<Database, DbError> {
    let db = connect(config).await?;
    init_schema(&db).await?;
    Ok(db)
}

//! PostgreSQL repository implementations.

pub mod failed_occurrence;
pub mod occurrence;
pub mod scheduled_job;

pub use failed_occurrence::PostgresFailedOccurrenceRepository;
pub use occurrence::PostgresOccurrenceRepository;
pub use scheduled_job::PostgresScheduledJobRepository;

use sqlx::{Pool, Postgres};

/// PostgreSQL database handle, shared by clone across the three
/// repository implementations in this module.
#[derive(Clone)]
pub struct PostgresDb {
    pool: Pool<Postgres>,
}

impl PostgresDb {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

/// Create a PostgreSQL connection pool.
pub async fn create_pool(
    host: &str,
    port: u16,
    database: &str,
    username: &str,
    password: &str,
    pool_size: u32,
) -> crate::Result<Pool<Postgres>> {
    use sqlx::postgres::PgPoolOptions;

    let database_url = format!("postgres://{}:{}@{}:{}/{}", username, password, host, port, database);

    tracing::info!("connecting to postgres at {}:{}/{}", host, port, database);

    let pool = PgPoolOptions::new()
        .max_connections(pool_size)
        .connect(&database_url)
        .await
        .map_err(crate::Error::Database)?;

    tracing::info!("postgres connected");
    Ok(pool)
}

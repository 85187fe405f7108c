//! Database migration system.
//!
//! Runs migrations on startup and tracks which have been applied in
//! `_migrations`, the way this crate's teacher managed schema changes —
//! whole-file `raw_sql` execution rather than semicolon-splitting, since
//! splitting breaks `DO $$ ... $$` blocks.

use sqlx::{PgPool, Row};
use tracing::{error, info, warn};

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    pub applied_at: chrono::DateTime<chrono::Utc>,
}

pub struct Migrator {
    pool: PgPool,
}

impl Migrator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn init_migration_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version BIGINT PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }

    async fn get_applied_migrations(&self) -> Result<Vec<Migration>> {
        let rows = sqlx::query(r#"SELECT version, name, applied_at FROM _migrations ORDER BY version"#)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let migrations = rows
            .into_iter()
            .map(|row| Migration {
                version: row.get("version"),
                name: row.get("name"),
                applied_at: row.get("applied_at"),
            })
            .collect();

        Ok(migrations)
    }

    async fn record_migration(&self, version: i64, name: &str) -> Result<()> {
        sqlx::query(r#"INSERT INTO _migrations (version, name) VALUES ($1, $2) ON CONFLICT DO NOTHING"#)
            .bind(version)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(())
    }

    pub async fn migrate(&self) -> Result<()> {
        info!("initializing migration system");
        self.init_migration_table().await?;

        let applied = self.get_applied_migrations().await?;
        info!(count = applied.len(), "applied migrations found");

        let migrations = vec![(1, "initial_schema", include_str!("../../migrations/001_initial_schema.sql"))];

        for (version, name, sql) in migrations {
            if applied.iter().any(|m| m.version == version) {
                info!(version, name, "migration already applied, skipping");
                continue;
            }

            info!(version, name, "applying migration");

            sqlx::raw_sql(sql).execute(&self.pool).await.map_err(|err| {
                error!(version, error = %err, "migration failed");
                Error::Database(err)
            })?;

            self.record_migration(version, name).await?;
            info!(version, name, "migration applied");
        }

        info!("all migrations completed");
        Ok(())
    }

    /// Drop all tables and enum types and re-run migrations from scratch.
    /// Only ever invoked from an explicit operator command, never on
    /// ordinary process start-up.
    pub async fn reset(&self) -> Result<()> {
        warn!("resetting database - this deletes all data");

        sqlx::query(
            r#"
            DO $$ DECLARE
                r RECORD;
            BEGIN
                FOR r IN (SELECT tablename FROM pg_tables WHERE schemaname = 'public') LOOP
                    EXECUTE 'DROP TABLE IF EXISTS ' || quote_ident(r.tablename) || ' CASCADE';
                END LOOP;
            END $$;
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        sqlx::query(
            r#"
            DO $$ DECLARE
                r RECORD;
            BEGIN
                FOR r IN (SELECT typname FROM pg_type WHERE typtype = 'e' AND typnamespace = 'public'::regnamespace) LOOP
                    EXECUTE 'DROP TYPE IF EXISTS ' || quote_ident(r.typname) || ' CASCADE';
                END LOOP;
            END $$;
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        info!("database reset, re-running migrations");
        self.migrate().await?;

        Ok(())
    }

    pub async fn status(&self) -> Result<DbStatus> {
        self.init_migration_table().await?;

        let applied = self.get_applied_migrations().await?;

        let scheduled_job_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM scheduled_jobs").fetch_one(&self.pool).await.unwrap_or(0);

        let occurrence_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM job_occurrences").fetch_one(&self.pool).await.unwrap_or(0);

        let unresolved_failed_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM failed_occurrences WHERE resolved = false")
            .fetch_one(&self.pool)
            .await
            .unwrap_or(0);

        Ok(DbStatus {
            applied_migrations: applied.len() as i64,
            scheduled_job_count,
            occurrence_count,
            unresolved_failed_count,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub applied_migrations: i64,
    pub scheduled_job_count: i64,
    pub occurrence_count: i64,
    pub unresolved_failed_count: i64,
}

/// Run migrations automatically on process start.
pub async fn auto_migrate(pool: &PgPool) -> Result<()> {
    let migrator = Migrator::new(pool.clone());
    migrator.migrate().await?;
    Ok(())
}

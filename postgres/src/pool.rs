//! Connection pool construction, migrations and the readiness probe.

use std::time::Duration;

use async_trait::async_trait;
use boxoffice_core::{ReadinessProbe, StoreError};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::{store_error, PostgresError};

/// Pool settings.
#[derive(Clone, Debug)]
pub struct PostgresConfig {
    /// Connection string
    pub url: String,
    /// Upper bound on open connections
    pub max_connections: u32,
    /// Connections kept open when idle
    pub min_connections: u32,
    /// How long to wait for a free connection
    pub connect_timeout: Duration,
    /// Idle connections are closed after this long
    pub idle_timeout: Option<Duration>,
}

impl PostgresConfig {
    /// Settings for `url` with default pool sizing.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }

    /// Opens the pool.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresError::Connect`] if the database cannot be reached.
    pub async fn connect(&self) -> Result<PgPool, PostgresError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.connect_timeout)
            .idle_timeout(self.idle_timeout)
            .connect(&self.url)
            .await
            .map_err(PostgresError::Connect)?;

        tracing::info!(
            max_connections = self.max_connections,
            min_connections = self.min_connections,
            "PostgreSQL pool ready"
        );
        Ok(pool)
    }
}

/// Applies the bundled migrations.
///
/// # Errors
///
/// Returns [`PostgresError::Migrate`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), PostgresError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}

/// Readiness probe that round-trips a trivial query.
#[derive(Clone, Debug)]
pub struct PgReadinessProbe {
    pool: PgPool,
}

impl PgReadinessProbe {
    /// Creates a probe over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadinessProbe for PgReadinessProbe {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}

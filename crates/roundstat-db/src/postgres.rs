//! `PostgreSQL` connection pool for the persistence worker.
//!
//! The pool is sized and timed straight from the `database` section of the
//! engine configuration. Statements are built at runtime (not checked at
//! compile time), so the workspace builds without a live database.

use roundstat_core::config::DatabaseConfig;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use crate::error::DbError;

/// Shared handle to the Roundstat database.
///
/// Cheap to clone; the persistence worker keeps one and builds an
/// [`UpsertStore`](crate::UpsertStore) per batch.
#[derive(Clone, Debug)]
pub struct PostgresPool {
    pool: PgPool,
}

/// Parse the connection URL, rejecting anything `sqlx` cannot use.
fn connect_options(url: &str) -> Result<PgConnectOptions, DbError> {
    url.parse()
        .map_err(|e: sqlx::Error| DbError::Config(format!("invalid database URL: {e}")))
}

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(config.connect_timeout())
        .idle_timeout(config.idle_timeout())
}

impl PostgresPool {
    /// Connect with the configured pool limits and, when
    /// `run_migrations` is set, bring the schema up to date.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] for an unparsable URL,
    /// [`DbError::Postgres`] when no connection can be made and
    /// [`DbError::Migration`] when a migration fails.
    pub async fn open(config: &DatabaseConfig) -> Result<Self, DbError> {
        let options = connect_options(&config.url)?;
        let pool = pool_options(config).connect_with(options).await?;
        tracing::info!(
            max_connections = config.max_connections,
            connect_timeout_ms = config.connect_timeout_ms,
            "connected to PostgreSQL"
        );

        let pool = Self { pool };
        if config.run_migrations {
            pool.migrate().await?;
        }
        Ok(pool)
    }

    /// Apply the embedded migrations (`crates/roundstat-db/migrations`).
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Migration`] if any migration fails.
    pub async fn migrate(&self) -> Result<(), DbError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("roundstat schema up to date");
        Ok(())
    }

    /// The underlying [`PgPool`].
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Wait for checked-out connections to return, then close them all.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL pool closed");
    }
}

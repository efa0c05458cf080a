//! PostgreSQL test container for the database-backed catalog and job store
//!
//! These helpers require a running Docker daemon. Tests using them are marked
//! `#[ignore = "requires Docker"]`; run them with:
//!
//! ```bash
//! cargo test -p massindex-core --test postgres_tests -- --ignored --nocapture
//! ```

#![allow(dead_code)]

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::postgres::Postgres;
use tracing::info;

/// Initialize tracing once for test output
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,massindex_core=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// A throwaway PostgreSQL server with a connected pool
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");
        let container = Postgres::default()
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container.get_host().await.context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;
        let url = format!("postgresql://postgres:postgres@{host}:{port}/postgres");

        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&url)
            .await
            .context("Failed to connect to PostgreSQL container")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create `"Company"` and `"Employee"` tables with sequential ids
    pub async fn seed(&self, companies: i64, employees: i64) -> Result<()> {
        sqlx::query(r#"CREATE TABLE "Company" (id BIGINT PRIMARY KEY, name TEXT NOT NULL)"#)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            r#"CREATE TABLE "Employee" (id BIGINT PRIMARY KEY, name TEXT NOT NULL, active BOOLEAN NOT NULL)"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(r#"INSERT INTO "Company" SELECT g, 'company-' || g FROM generate_series(1, $1::bigint) g"#)
            .bind(companies)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            r#"INSERT INTO "Employee" SELECT g, 'employee-' || g, g % 2 = 0 FROM generate_series(1, $1::bigint) g"#,
        )
        .bind(employees)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

//! Database connection pool management and account lookups.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::Config;
use crate::export::Resource;

/// Create a PostgreSQL connection pool.
pub async fn create_pool(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;

    Ok(pool)
}

/// Check if the database connection is healthy.
pub async fn check_health(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}

/// `rh_account` flag marking the account's aggregate rows as current.
fn aggregate_flag(resource: Resource) -> Option<&'static str> {
    match resource {
        Resource::Advisories => Some("valid_advisory_cache"),
        Resource::Packages => Some("valid_package_cache"),
        Resource::Systems => None,
    }
}

/// Whether the account's aggregate for `resource` may be read.
///
/// Unknown accounts and NULL flags count as stale.
pub async fn aggregate_valid(
    pool: &PgPool,
    resource: Resource,
    account_id: i32,
) -> Result<bool, sqlx::Error> {
    let Some(flag) = aggregate_flag(resource) else {
        return Ok(false);
    };

    let valid: Option<Option<bool>> =
        sqlx::query_scalar(&format!("SELECT {flag} FROM rh_account WHERE id = $1"))
            .bind(account_id)
            .fetch_optional(pool)
            .await?;

    Ok(valid.flatten().unwrap_or(false))
}

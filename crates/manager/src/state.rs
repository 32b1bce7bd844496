//! Application state shared across all handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::export::{ExportService, ExportSettings};
use crate::metrics::Metrics;
use crate::sync::{EvalSink, RedisEvalSink, ReevaluationJob, ReevaluationSettings};

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// PostgreSQL connection pool.
    db: PgPool,

    /// Application configuration.
    config: Config,

    /// Export pipeline.
    exports: ExportService,

    /// Re-evaluation job, sharing the metrics registry.
    reevaluation: ReevaluationJob,

    /// Prometheus metrics.
    metrics: Arc<Metrics>,
}

impl AppState {
    /// Create new application state with a database connection and Redis sink.
    pub async fn new(config: &Config) -> Result<Self> {
        let db = db::create_pool(config)
            .await
            .context("failed to create database pool")?;

        info!(
            max_connections = config.database_max_connections,
            "database pool ready"
        );

        let sink = RedisEvalSink::open(&config.redis_url, config.eval_queue.clone())?;

        Ok(Self::with_pool(config.clone(), db, Arc::new(sink)))
    }

    /// Build state around an existing pool and sink.
    ///
    /// Nothing here touches the database, so a lazily connecting pool works.
    pub fn with_pool(config: Config, db: PgPool, sink: Arc<dyn EvalSink>) -> Self {
        let metrics = Arc::new(Metrics::new());
        let exports = ExportService::new(
            db.clone(),
            ExportSettings::from_config(&config),
            metrics.clone(),
        );
        let reevaluation = ReevaluationJob::new(
            db.clone(),
            sink,
            ReevaluationSettings::from_config(&config),
            metrics.clone(),
        );

        Self {
            inner: Arc::new(AppStateInner {
                db,
                config,
                exports,
                reevaluation,
                metrics,
            }),
        }
    }

    /// Get the database pool.
    pub fn db(&self) -> &PgPool {
        &self.inner.db
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the export service.
    pub fn exports(&self) -> &ExportService {
        &self.inner.exports
    }

    /// Get the re-evaluation job.
    pub fn reevaluation(&self) -> &ReevaluationJob {
        &self.inner.reevaluation
    }

    /// Get the metrics registry.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    /// Check if PostgreSQL is healthy.
    pub async fn postgres_healthy(&self) -> bool {
        db::check_health(&self.inner.db).await
    }
}

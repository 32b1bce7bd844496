//! Re-evaluation job.
//!
//! After advisory metadata changes, every affected system must be evaluated
//! again. This job collects `(inventory id, account id)` pairs and hands them
//! to an [`EvalSink`] in fixed-size batches, ordered by account so consumers
//! see each account's systems together.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;

use super::queue::{EvalSink, InventoryAid};
use crate::config::Config;
use crate::metrics::Metrics;

/// Job switches taken from configuration.
#[derive(Debug, Clone)]
pub struct ReevaluationSettings {
    /// Publish anything at all.
    pub enabled: bool,
    /// Limit to systems attached to the given repositories.
    pub repo_based: bool,
    pub batch_size: usize,
}

impl ReevaluationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.enable_recalc_messages_send,
            repo_based: config.enable_repo_based_reeval,
            batch_size: config.reeval_batch_size.max(1),
        }
    }
}

/// Collects systems and publishes re-evaluation messages.
pub struct ReevaluationJob {
    pool: PgPool,
    sink: Arc<dyn EvalSink>,
    settings: ReevaluationSettings,
    metrics: Arc<Metrics>,
}

impl ReevaluationJob {
    pub fn new(
        pool: PgPool,
        sink: Arc<dyn EvalSink>,
        settings: ReevaluationSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            pool,
            sink,
            settings,
            metrics,
        }
    }

    /// Run once. Returns the number of systems sent.
    ///
    /// `repos` is only consulted when repo-based re-evaluation is enabled.
    pub async fn run(&self, repos: &[String]) -> Result<usize> {
        if !self.settings.enabled {
            info!("recalc messages sending disabled, skipping");
            return Ok(0);
        }

        let systems = if self.settings.repo_based {
            if repos.is_empty() {
                info!("repo-based re-evaluation enabled but no repositories given, skipping");
                return Ok(0);
            }
            self.repo_systems(repos).await?
        } else {
            self.all_systems().await?
        };

        self.publish(&systems).await
    }

    /// Publish `systems` in batches and record metrics.
    pub async fn publish(&self, systems: &[InventoryAid]) -> Result<usize> {
        let started = Instant::now();
        let mut sent = 0;
        for batch in systems.chunks(self.settings.batch_size) {
            self.sink
                .publish(batch)
                .await
                .with_context(|| format!("failed after {sent} of {} systems", systems.len()))?;
            sent += batch.len();
        }

        self.metrics
            .record_reeval(sent as u64, started.elapsed().as_secs_f64());
        info!(count = sent, "systems sent to re-calc");
        Ok(sent)
    }

    async fn all_systems(&self) -> Result<Vec<InventoryAid>> {
        sqlx::query_as::<_, InventoryAid>(
            "SELECT inventory_id, rh_account_id FROM system_platform ORDER BY rh_account_id",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to load systems")
    }

    async fn repo_systems(&self, repos: &[String]) -> Result<Vec<InventoryAid>> {
        sqlx::query_as::<_, InventoryAid>(
            "SELECT DISTINCT sp.inventory_id, sp.rh_account_id \
             FROM system_platform sp \
             JOIN system_repo sr ON sr.system_id = sp.id AND sr.rh_account_id = sp.rh_account_id \
             JOIN repo r ON r.id = sr.repo_id \
             WHERE r.name = ANY($1) \
             ORDER BY sp.rh_account_id",
        )
        .bind(repos)
        .fetch_all(&self.pool)
        .await
        .context("failed to load systems for repositories")
    }
}

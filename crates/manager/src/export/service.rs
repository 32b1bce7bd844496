//! Export request orchestration.
//!
//! Runs the pipeline for one request: negotiate the format, validate the
//! filters, pick a strategy, build the SQL, then stream rows straight into the
//! response body. Every validation step finishes before a connection is taken
//! from the pool.

use std::sync::Arc;
use std::time::Instant;

use async_stream::{stream, try_stream};
use axum::body::Body;
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use futures_core::Stream;
use sqlx::PgPool;
use tokio_stream::StreamExt;
use tracing::{debug, error, info};

use super::error::ExportResult;
use super::filter::{ExportParams, validate};
use super::format::ExportFormat;
use super::query_builder::ExportQueryBuilder;
use super::rows::{AdvisoryRow, ExportRow, PackageRow, SystemRow};
use super::schema::SchemaRegistry;
use super::serializer::ExportEncoder;
use super::strategy::{QueryStrategy, request_live_reason, select_strategy};
use super::types::{AccountContext, ApiVersion, Resource};
use crate::config::{Config, ExportConfig};
use crate::db;
use crate::metrics::Metrics;

/// Database and output settings for exports.
#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub output: ExportConfig,
    /// Validated `work_mem` granted to live queries.
    pub work_mem: String,
    /// Validated `statement_timeout` for every export query.
    pub statement_timeout: String,
    pub disable_cached_counts: bool,
}

impl ExportSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            output: config.export,
            work_mem: config.db_work_mem.clone(),
            statement_timeout: config.db_statement_timeout.clone(),
            disable_cached_counts: config.disable_cached_counts,
        }
    }
}

/// One inbound export request.
#[derive(Debug, Clone, Copy)]
pub struct ExportRequest<'a> {
    pub resource: Resource,
    pub version: ApiVersion,
    pub accept: Option<&'a HeaderValue>,
    pub query: Option<&'a str>,
    pub account: &'a AccountContext,
}

/// Export service.
pub struct ExportService {
    pool: PgPool,
    registry: SchemaRegistry,
    settings: ExportSettings,
    metrics: Arc<Metrics>,
}

impl ExportService {
    pub fn new(pool: PgPool, settings: ExportSettings, metrics: Arc<Metrics>) -> Self {
        Self {
            pool,
            registry: SchemaRegistry::new(),
            settings,
            metrics,
        }
    }

    /// Serve one export request.
    ///
    /// Errors returned here happen before any body byte is produced. Storage
    /// failures after the first row abort the body stream instead.
    pub async fn export(&self, request: ExportRequest<'_>) -> ExportResult<Response> {
        match request.resource {
            Resource::Advisories => self.run::<AdvisoryRow>(request).await,
            Resource::Packages => self.run::<PackageRow>(request).await,
            Resource::Systems => self.run::<SystemRow>(request).await,
        }
    }

    async fn run<R: ExportRow>(&self, request: ExportRequest<'_>) -> ExportResult<Response> {
        let started = Instant::now();
        let format = ExportFormat::negotiate(request.accept)?;

        let schema = self.registry.get(R::RESOURCE);
        let filters = validate(schema, &ExportParams::from_query(request.query))?;

        let account = request.account;
        let forced = request_live_reason(
            schema,
            &filters,
            &account.groups,
            self.settings.disable_cached_counts,
        );
        let aggregate_valid = match forced {
            Some(_) => false,
            None => db::aggregate_valid(&self.pool, R::RESOURCE, account.account_id).await?,
        };
        let (strategy, reason) = select_strategy(
            schema,
            &filters,
            &account.groups,
            self.settings.disable_cached_counts,
            aggregate_valid,
        );

        let sql = ExportQueryBuilder::new(schema, &filters, account, strategy)
            .with_tag_combination(self.settings.output.tag_combination)
            .build();

        debug!(
            resource = %R::RESOURCE,
            account = account.account_id,
            strategy = %strategy,
            reason = ?reason,
            sql = %sql,
            "export query built"
        );

        let mut rows = Box::pin(stream_rows::<R>(
            self.pool.clone(),
            sql,
            strategy,
            self.settings.clone(),
        ));
        // A failure before the first row still gets a proper error response.
        let first = rows.next().await.transpose()?;

        let labels = self.metrics.record_export(
            R::RESOURCE.as_str(),
            format.as_str(),
            strategy.as_str(),
        );
        let encoder = ExportEncoder::new(format, request.version, &self.settings.output);
        let chunks = encoder.stream(first, rows);

        let metrics = self.metrics.clone();
        let resource = R::RESOURCE;
        let account_id = account.account_id;
        let body = stream! {
            let mut chunks = Box::pin(chunks);
            while let Some(chunk) = chunks.next().await {
                if let Err(e) = &chunk {
                    error!(error = ?e, %resource, account = account_id, "export aborted mid-stream");
                }
                yield chunk;
            }
            let elapsed = started.elapsed().as_secs_f64();
            metrics.record_export_duration(&labels, elapsed);
            info!(%resource, account = account_id, elapsed_secs = elapsed, "export finished");
        };

        Ok((
            [(header::CONTENT_TYPE, format.content_type())],
            Body::from_stream(body),
        )
            .into_response())
    }
}

/// Run `sql` in its own transaction and yield decoded rows.
///
/// `SET LOCAL` scopes the timeout and working memory to this transaction, so
/// they are gone after commit, rollback, or a dropped connection.
fn stream_rows<R: ExportRow>(
    pool: PgPool,
    sql: String,
    strategy: QueryStrategy,
    settings: ExportSettings,
) -> impl Stream<Item = ExportResult<R>> + Send {
    try_stream! {
        let mut tx = pool.begin().await?;

        sqlx::query(&format!(
            "SET LOCAL statement_timeout = '{}'",
            settings.statement_timeout
        ))
        .execute(&mut *tx)
        .await?;

        if strategy.is_live() {
            sqlx::query(&format!("SET LOCAL work_mem = '{}'", settings.work_mem))
                .execute(&mut *tx)
                .await?;
        }

        {
            let mut rows = sqlx::query_as::<_, R>(&sql).fetch(&mut *tx);
            while let Some(row) = rows.next().await {
                yield row?;
            }
        }

        tx.commit().await?;
    }
}

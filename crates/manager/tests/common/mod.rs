#![allow(clippy::unwrap_used, clippy::expect_used)]
#![allow(dead_code)]
//! Common test utilities for integration tests.
//!
//! Apps are built from the real router and state. [`TestApp::offline`] uses a
//! pool that never connects, so requests rejected before the first query need
//! no PostgreSQL. [`seeded_apps`] loads `fixtures/export_fixture.sql` into the
//! database named by `DATABASE_URL` and returns one app per query strategy.
//!
//! ## Runtime Safety
//!
//! Database-backed tests run on [`SHARED_RT`] through [`run_test`], so pool
//! connections opened by one test stay valid for the next.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, header};
use axum::response::Response;
use http_body_util::BodyExt;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::OnceCell;
use tower::ServiceExt;

use errata_manager::middleware::ACCOUNT_HEADER;
use errata_manager::sync::{EvalSink, InventoryAid};
use errata_manager::{AppState, Config};

/// Fixture schema and rows.
const EXPORT_FIXTURE: &str = include_str!("../fixtures/export_fixture.sql");

/// Key accepted by `POST /reevaluate/{key}` in test apps.
pub const REEVAL_KEY: &str = "test-reeval-key";

/// Shared Tokio runtime that outlives all individual test runtimes.
pub static SHARED_RT: std::sync::LazyLock<tokio::runtime::Runtime> =
    std::sync::LazyLock::new(|| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("Failed to build shared test runtime")
    });

/// Run an async test body on [`SHARED_RT`].
pub fn run_test<F: std::future::Future<Output = ()> + Send>(f: F) {
    SHARED_RT.block_on(f);
}

/// Sink that keeps every published batch.
#[derive(Default)]
pub struct MemorySink {
    pub batches: Mutex<Vec<Vec<InventoryAid>>>,
}

impl MemorySink {
    pub fn sent(&self) -> usize {
        self.batches.lock().unwrap().iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl EvalSink for MemorySink {
    async fn publish(&self, batch: &[InventoryAid]) -> Result<()> {
        self.batches.lock().unwrap().push(batch.to_vec());
        Ok(())
    }
}

/// Test application around a router.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub sink: Arc<MemorySink>,
}

impl TestApp {
    /// App whose pool has never connected.
    pub fn offline() -> Self {
        Self::offline_with(Config::default())
    }

    /// Offline app with a custom configuration.
    pub fn offline_with(config: Config) -> Self {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://errata@127.0.0.1:1/errata")
            .expect("Failed to build lazy pool");
        Self::with_pool(config, pool)
    }

    /// App over an existing pool.
    pub fn with_pool(config: Config, pool: PgPool) -> Self {
        let sink = Arc::new(MemorySink::default());
        let state = AppState::with_pool(config, pool, sink.clone());

        Self {
            router: errata_manager::app(state.clone()),
            state,
            sink,
        }
    }

    /// Send a request to the test application.
    pub async fn request(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request")
    }

    /// GET `uri` as account 1 and return status and body.
    pub async fn export(&self, uri: &str, accept: &str) -> (u16, String) {
        let response = self.request(export_request(uri, Some(accept))).await;
        let status = response.status().as_u16();
        (status, body_string(response).await)
    }

    /// Body of `GET /metrics`.
    pub async fn metrics(&self) -> String {
        let request = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        body_string(self.request(request).await).await
    }
}

/// Apps over the seeded fixture: one may read aggregates, one always joins live.
pub struct SeededApps {
    pub cached: TestApp,
    pub live: TestApp,
}

static SEEDED: OnceCell<Option<SeededApps>> = OnceCell::const_new();

/// Seed the fixture once and build both apps.
///
/// Returns `None` when `DATABASE_URL` is unset; callers skip.
pub async fn seeded_apps() -> Option<&'static SeededApps> {
    SEEDED
        .get_or_init(|| async {
            dotenvy::dotenv().ok();
            let Ok(url) = std::env::var("DATABASE_URL") else {
                eprintln!("DATABASE_URL not set, skipping database-backed test");
                return None;
            };

            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&url)
                .await
                .expect("Failed to connect to test database");
            sqlx::raw_sql(EXPORT_FIXTURE)
                .execute(&pool)
                .await
                .expect("Failed to load export fixture");

            let config = Config {
                database_url: url,
                reeval_key: Some(REEVAL_KEY.to_string()),
                reeval_batch_size: 3,
                ..Config::default()
            };
            let live_config = Config {
                disable_cached_counts: true,
                ..config.clone()
            };

            Some(SeededApps {
                cached: TestApp::with_pool(config, pool.clone()),
                live: TestApp::with_pool(live_config, pool),
            })
        })
        .await
        .as_ref()
}

/// GET `uri` as account 1 with an optional `Accept` header.
pub fn export_request(uri: &str, accept: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri).header(ACCOUNT_HEADER, "1");
    if let Some(accept) = accept {
        builder = builder.header(header::ACCEPT, accept);
    }
    builder.body(Body::empty()).unwrap()
}

/// Collect a response body as a string.
pub async fn body_string(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

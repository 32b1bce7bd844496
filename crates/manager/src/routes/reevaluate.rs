//! Re-evaluation trigger.
//!
//! `POST /reevaluate/{key}[?repo=NAME...]` runs the re-evaluation job inside
//! the server so its counters land in the registry served at `/metrics`.

use axum::{
    Json, Router,
    extract::{Path, RawQuery, State},
    routing::post,
};
use serde::Serialize;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Create the re-evaluation router.
pub fn router() -> Router<AppState> {
    Router::new().route("/reevaluate/{key}", post(run_reevaluation))
}

/// Re-evaluation run response.
#[derive(Debug, Serialize)]
pub struct ReevaluationResponse {
    pub status: &'static str,
    pub sent: usize,
}

async fn run_reevaluation(
    State(state): State<AppState>,
    Path(key): Path<String>,
    RawQuery(query): RawQuery,
) -> AppResult<Json<ReevaluationResponse>> {
    let Some(expected) = state.config().reeval_key.as_deref() else {
        return Err(AppError::NotFound("re-evaluation trigger disabled".to_string()));
    };
    if key != expected {
        info!("invalid re-evaluation key");
        return Err(AppError::Forbidden("Invalid re-evaluation key".to_string()));
    }

    let repos = repos_from_query(query.as_deref());
    info!(repos = repos.len(), "re-evaluation triggered via HTTP");

    let sent = state.reevaluation().run(&repos).await?;

    Ok(Json(ReevaluationResponse {
        status: "completed",
        sent,
    }))
}

/// Collect repeated `repo=` parameters.
fn repos_from_query(query: Option<&str>) -> Vec<String> {
    let Some(query) = query else {
        return Vec::new();
    };
    url::form_urlencoded::parse(query.as_bytes())
        .filter(|(k, _)| k == "repo")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
        .collect()
}

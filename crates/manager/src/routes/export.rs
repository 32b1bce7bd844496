//! Export API routes.
//!
//! `GET /api/patch/{version}/export/{advisories,packages,systems}` returns the
//! caller's full collection as JSON or CSV, depending on `Accept`.

use axum::{
    Extension, Router,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, header},
    middleware,
    response::Response,
    routing::get,
};

use crate::error::{AppError, AppResult};
use crate::export::{AccountContext, ApiVersion, ExportRequest, Resource};
use crate::middleware::resolve_account;
use crate::state::AppState;

/// Create the export router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/patch/{version}/export/{resource}", get(export))
        .route_layer(middleware::from_fn(resolve_account))
}

/// Unknown versions and resources are both 404.
async fn export(
    State(state): State<AppState>,
    Path((version, resource)): Path<(String, String)>,
    Extension(account): Extension<AccountContext>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> AppResult<Response> {
    let version: ApiVersion = version.parse().map_err(AppError::NotFound)?;
    let resource: Resource = resource.parse().map_err(AppError::NotFound)?;

    let request = ExportRequest {
        resource,
        version,
        accept: headers.get(header::ACCEPT),
        query: query.as_deref(),
        account: &account,
    };

    Ok(state.exports().export(request).await?)
}

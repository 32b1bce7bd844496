//! Account context middleware.
//!
//! The gateway in front of this service authenticates callers and forwards
//! their identity in trusted headers. This layer turns those headers into an
//! [`AccountContext`] request extension for export handlers.

use axum::{
    body::Body,
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::error::AppError;
use crate::export::{AccountContext, InventoryGroups};

/// Numeric account id of the caller.
pub const ACCOUNT_HEADER: &str = "x-rh-account-id";

/// JSON object of inventory group id to name the caller is limited to.
pub const INVENTORY_GROUPS_HEADER: &str = "x-rh-inventory-groups";

/// Middleware to resolve the caller's account.
///
/// Returns 401 when the account header is missing or malformed; a malformed
/// groups header is rejected too rather than widening access.
pub async fn resolve_account(mut request: Request<Body>, next: Next) -> Response {
    match account_from_headers(request.headers()) {
        Ok(account) => {
            request.extensions_mut().insert(account);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

fn account_from_headers(headers: &HeaderMap) -> Result<AccountContext, AppError> {
    let account_id = headers
        .get(ACCOUNT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i32>().ok())
        .filter(|id| *id > 0)
        .ok_or(AppError::Unauthorized)?;

    let groups = match headers.get(INVENTORY_GROUPS_HEADER) {
        None => InventoryGroups::default(),
        Some(raw) => serde_json::from_slice::<InventoryGroups>(raw.as_bytes()).map_err(|e| {
            debug!(error = %e, "invalid inventory groups header");
            AppError::Unauthorized
        })?,
    };

    Ok(AccountContext { account_id, groups })
}

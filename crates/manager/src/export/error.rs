//! Export pipeline error types.
//!
//! Validation variants are raised before any query runs.

use axum::http::StatusCode;
use thiserror::Error;

/// Errors raised while validating, executing, or rendering an export.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The requested representation is neither JSON nor CSV.
    #[error("Invalid content type '{0}', use 'application/json' or 'text/csv'")]
    UnsupportedContentType(String),

    /// `filter[<field>]` names a field the resource does not define.
    #[error("Invalid filter field: {0}")]
    InvalidFilterField(String),

    /// The filter field is known but its operator or value is not.
    #[error("Invalid filter value '{value}' for field '{field}': {reason}")]
    InvalidFilterValue {
        field: String,
        value: String,
        reason: String,
    },

    /// A tag is not of the form `namespace/key=value`.
    #[error("Invalid tag '{0}', use 'namespace/key=value'")]
    InvalidTag(String),

    /// `sort` names a field the resource cannot be ordered by.
    #[error("Invalid sort field: {0}")]
    InvalidSortField(String),

    /// The database failed; details are logged, never returned.
    #[error("db error")]
    Storage(#[from] sqlx::Error),

    /// A row could not be rendered.
    #[error("encode error")]
    Encode(#[from] serde_json::Error),
}

impl ExportError {
    pub(crate) fn invalid_value(field: &str, value: &str, reason: impl Into<String>) -> Self {
        ExportError::InvalidFilterValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ExportError::UnsupportedContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ExportError::InvalidFilterField(_)
            | ExportError::InvalidFilterValue { .. }
            | ExportError::InvalidTag(_)
            | ExportError::InvalidSortField(_) => StatusCode::BAD_REQUEST,
            ExportError::Storage(_) | ExportError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Result type alias using ExportError.
pub type ExportResult<T> = Result<T, ExportError>;

//! Content negotiation for export responses.

use axum::http::HeaderValue;

use super::error::{ExportError, ExportResult};

/// Wire format of an export document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
        }
    }

    /// Pick a format from the `Accept` header.
    ///
    /// The header must name exactly one supported type (case-insensitive).
    /// An absent or blank header means JSON.
    pub fn negotiate(accept: Option<&HeaderValue>) -> ExportResult<Self> {
        let Some(value) = accept else {
            return Ok(ExportFormat::Json);
        };
        let raw = String::from_utf8_lossy(value.as_bytes());
        Self::from_accept(raw.trim())
    }

    fn from_accept(raw: &str) -> ExportResult<Self> {
        if raw.is_empty() || raw.eq_ignore_ascii_case("application/json") {
            Ok(ExportFormat::Json)
        } else if raw.eq_ignore_ascii_case("text/csv") {
            Ok(ExportFormat::Csv)
        } else {
            Err(ExportError::UnsupportedContentType(raw.to_string()))
        }
    }
}

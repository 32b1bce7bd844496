//! Filtered export pipeline.
//!
//! Turns a GET request with `filter[...]`, `tags`, `sort` and `search`
//! parameters into a streamed JSON or CSV document:
//!
//! 1. [`ExportFormat::negotiate`] picks the representation from `Accept`
//! 2. [`validate`] checks parameters against the resource's [`FilterSchema`]
//! 3. [`select_strategy`] chooses the per-account aggregate or the live join
//! 4. [`ExportQueryBuilder`] renders the SQL
//! 5. [`ExportEncoder`] writes rows as they arrive

mod error;
mod filter;
mod format;
mod query_builder;
mod rows;
mod schema;
mod serializer;
mod service;
mod strategy;
mod tags;
mod types;

pub use error::{ExportError, ExportResult};
pub use filter::{ExportParams, Filter, FilterValue, SortSpec, ValidatedFilterSet, validate};
pub use format::ExportFormat;
pub use query_builder::ExportQueryBuilder;
pub use rows::{AdvisoryRow, Column, ExportRow, ExportValue, PackageRow, SystemRow};
pub use schema::{FieldSpec, FieldTarget, FilterSchema, Operator, SchemaRegistry, SortDirection};
pub use serializer::{ExportEncoder, LineTerminator};
pub use service::{ExportRequest, ExportService, ExportSettings};
pub use strategy::{LiveReason, QueryStrategy, request_live_reason, select_strategy};
pub use tags::{TagCombination, TagExpression, parse_tags};
pub use types::{AccountContext, ApiVersion, InventoryGroups, Resource};

//! Cached-vs-live query strategy selection.
//!
//! The per-account aggregate tables hold pre-computed system counts for
//! advisories and packages. They are only correct for the unrestricted view of
//! an account; anything that narrows the set of systems being counted
//! (system-scoped filters, tags, inventory groups) needs the live join.

use std::fmt;

use serde::Serialize;

use super::filter::ValidatedFilterSet;
use super::schema::FilterSchema;
use super::types::InventoryGroups;

/// Which data source the export query reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStrategy {
    /// Per-account aggregate table.
    Cached,
    /// Join over per-system tables.
    Live,
}

impl QueryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStrategy::Cached => "cached",
            QueryStrategy::Live => "live",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, QueryStrategy::Live)
    }
}

impl fmt::Display for QueryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request cannot be served from the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveReason {
    /// The resource has no aggregate table.
    NoAggregate,
    /// Cached counts are switched off by configuration.
    CacheDisabled,
    /// A filter targets per-system columns.
    SystemFilter(&'static str),
    /// Tag expressions narrow the counted systems.
    Tags,
    /// The caller only sees some inventory groups.
    InventoryGroups,
    /// The account's aggregate is stale.
    StaleAggregate,
}

impl fmt::Display for LiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiveReason::NoAggregate => f.write_str("no aggregate"),
            LiveReason::CacheDisabled => f.write_str("cached counts disabled"),
            LiveReason::SystemFilter(field) => write!(f, "system filter '{field}'"),
            LiveReason::Tags => f.write_str("tag filter"),
            LiveReason::InventoryGroups => f.write_str("inventory group scoping"),
            LiveReason::StaleAggregate => f.write_str("stale aggregate"),
        }
    }
}

/// Request-derived reason to bypass the aggregate, independent of account state.
///
/// Checked first so the account lookup can be skipped entirely.
pub fn request_live_reason(
    schema: &FilterSchema,
    filters: &ValidatedFilterSet,
    groups: &InventoryGroups,
    cache_disabled: bool,
) -> Option<LiveReason> {
    if !schema.has_aggregate {
        return Some(LiveReason::NoAggregate);
    }
    if cache_disabled {
        return Some(LiveReason::CacheDisabled);
    }
    if let Some(field) = filters.first_live_only_field() {
        return Some(LiveReason::SystemFilter(field));
    }
    if !filters.tags.is_empty() {
        return Some(LiveReason::Tags);
    }
    if !groups.is_unrestricted() {
        return Some(LiveReason::InventoryGroups);
    }
    None
}

/// Pick the strategy for one request.
///
/// `aggregate_valid` reports whether the account's aggregate rows are
/// current. It is only consulted when nothing in the request already forces
/// the live join.
pub fn select_strategy(
    schema: &FilterSchema,
    filters: &ValidatedFilterSet,
    groups: &InventoryGroups,
    cache_disabled: bool,
    aggregate_valid: bool,
) -> (QueryStrategy, Option<LiveReason>) {
    let reason = request_live_reason(schema, filters, groups, cache_disabled)
        .or((!aggregate_valid).then_some(LiveReason::StaleAggregate));

    match reason {
        Some(reason) => (QueryStrategy::Live, Some(reason)),
        None => (QueryStrategy::Cached, None),
    }
}

//! Filter grammar validation.
//!
//! Turns raw export query parameters into a [`ValidatedFilterSet`] against a
//! resource's [`FilterSchema`]. Grammar:
//! - `filter[<field>]=<value>` is shorthand for `filter[<field>]=eq:<value>`
//! - `filter[<field>]=<op>:<value>` with `op` one of `eq neq gt lt geq leq in notin between`
//! - `in`/`notin` take a comma-separated list, `between` exactly two bounds
//! - `tags=<namespace>/<key>=<value>` (repeatable)
//! - `sort=<field>[,-<field>...]`, a leading `-` sorts descending
//! - `search=<text>`
//!
//! Validation is pure and completes before any query is built.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::error::{ExportError, ExportResult};
use super::schema::{FieldSpec, FilterSchema, Operator, SortDirection, ValueType};
use super::tags::{TagExpression, parse_tags};

/// Raw export parameters extracted from the query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportParams {
    /// `(field, raw value)` in request order.
    pub filters: Vec<(String, String)>,
    pub tags: Vec<String>,
    pub sort: Option<String>,
    pub search: Option<String>,
}

impl ExportParams {
    /// Parse an urlencoded query string. Unrelated parameters are ignored.
    pub fn from_query(query: Option<&str>) -> Self {
        let mut params = Self::default();
        let Some(query) = query else {
            return params;
        };

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if let Some(field) = key
                .strip_prefix("filter[")
                .and_then(|rest| rest.strip_suffix(']'))
            {
                params.filters.push((field.to_string(), value.into_owned()));
                continue;
            }
            match key.as_ref() {
                "tags" => params.tags.push(value.into_owned()),
                "sort" => params.sort = Some(value.into_owned()),
                "search" => params.search = Some(value.into_owned()),
                other => tracing::debug!(param = %other, "ignoring unknown export parameter"),
            }
        }

        params
    }
}

/// Typed filter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    Text(String),
    Integer(i64),
    Boolean(bool),
    Date(DateTime<Utc>),
    /// Operand of `in` / `notin`.
    List(Vec<FilterValue>),
    /// Inclusive bounds of `between`.
    Range(Box<FilterValue>, Box<FilterValue>),
}

/// One validated `(field, operator, value)` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub spec: FieldSpec,
    pub operator: Operator,
    pub value: FilterValue,
}

/// One ordering key, resolved to a row column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub column: &'static str,
    pub direction: SortDirection,
}

/// Everything a request asked for, validated against the resource schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedFilterSet {
    pub filters: Vec<Filter>,
    pub tags: Vec<TagExpression>,
    pub search: Option<String>,
    /// Always ends with the schema tiebreak column.
    pub sort: Vec<SortSpec>,
}

impl ValidatedFilterSet {
    /// Filters that can be evaluated on exported rows.
    pub fn row_filters(&self) -> impl Iterator<Item = &Filter> {
        self.filters.iter().filter(|f| !f.spec.is_live_only())
    }

    /// Filters that must be pushed into the live join.
    pub fn system_filters(&self) -> impl Iterator<Item = &Filter> {
        self.filters.iter().filter(|f| f.spec.is_live_only())
    }

    /// First live-only field name, if any.
    pub fn first_live_only_field(&self) -> Option<&'static str> {
        self.system_filters().next().map(|f| f.spec.name)
    }
}

/// Validate raw parameters against a resource schema.
pub fn validate(schema: &FilterSchema, params: &ExportParams) -> ExportResult<ValidatedFilterSet> {
    let mut filters = Vec::with_capacity(params.filters.len());
    for (field, raw) in &params.filters {
        let spec = schema
            .field(field)
            .ok_or_else(|| ExportError::InvalidFilterField(field.clone()))?;
        filters.push(parse_filter(spec, raw)?);
    }

    let tags = parse_tags(&params.tags)?;

    let search = params
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let sort = parse_sort(schema, params.sort.as_deref())?;

    Ok(ValidatedFilterSet {
        filters,
        tags,
        search,
        sort,
    })
}

fn parse_filter(spec: &FieldSpec, raw: &str) -> ExportResult<Filter> {
    let (operator, operand) = split_operator(spec.name, raw)?;
    if !spec.allows(operator) {
        return Err(ExportError::invalid_value(
            spec.name,
            raw,
            format!("operator '{}' is not supported", operator.as_str()),
        ));
    }

    let value = match operator {
        Operator::In | Operator::NotIn => {
            let items = operand
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|item| parse_scalar(spec, item))
                .collect::<ExportResult<Vec<_>>>()?;
            if items.is_empty() {
                return Err(ExportError::invalid_value(spec.name, raw, "empty list"));
            }
            FilterValue::List(items)
        }
        Operator::Between => {
            let bounds: Vec<&str> = operand.split(',').map(str::trim).collect();
            let [low, high] = bounds.as_slice() else {
                return Err(ExportError::invalid_value(
                    spec.name,
                    raw,
                    "between expects exactly two values",
                ));
            };
            FilterValue::Range(
                Box::new(parse_scalar(spec, low)?),
                Box::new(parse_scalar(spec, high)?),
            )
        }
        _ => parse_scalar(spec, operand)?,
    };

    Ok(Filter {
        spec: *spec,
        operator,
        value,
    })
}

/// Split `op:value`. A lowercase word before the first `:` must be a known operator.
fn split_operator<'a>(field: &str, raw: &'a str) -> ExportResult<(Operator, &'a str)> {
    if let Some((token, rest)) = raw.split_once(':')
        && !token.is_empty()
        && token.chars().all(|c| c.is_ascii_lowercase())
    {
        return Operator::from_token(token)
            .map(|op| (op, rest))
            .ok_or_else(|| {
                ExportError::invalid_value(field, raw, format!("unknown operator '{token}'"))
            });
    }
    Ok((Operator::Eq, raw))
}

fn parse_scalar(spec: &FieldSpec, raw: &str) -> ExportResult<FilterValue> {
    let invalid = |reason: &str| ExportError::invalid_value(spec.name, raw, reason);

    match spec.value_type {
        ValueType::Text => Ok(FilterValue::Text(raw.to_string())),
        ValueType::Integer => raw
            .trim()
            .parse::<i64>()
            .map(FilterValue::Integer)
            .map_err(|_| invalid("expected an integer")),
        ValueType::Boolean => match raw.trim().to_lowercase().as_str() {
            "true" => Ok(FilterValue::Boolean(true)),
            "false" => Ok(FilterValue::Boolean(false)),
            _ => Err(invalid("expected 'true' or 'false'")),
        },
        ValueType::Date => parse_date(raw.trim())
            .map(FilterValue::Date)
            .ok_or_else(|| invalid("expected an RFC 3339 timestamp or YYYY-MM-DD")),
        ValueType::Enum(allowed) => {
            let lowered = raw.trim().to_lowercase();
            if allowed.contains(&lowered.as_str()) {
                Ok(FilterValue::Text(lowered))
            } else {
                Err(invalid(&format!("expected one of: {}", allowed.join(", "))))
            }
        }
    }
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn parse_sort(schema: &FilterSchema, raw: Option<&str>) -> ExportResult<Vec<SortSpec>> {
    let mut sort = Vec::new();

    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => {
            for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let (name, direction) = match item.strip_prefix('-') {
                    Some(name) => (name, SortDirection::Desc),
                    None => (item, SortDirection::Asc),
                };
                let field = schema
                    .sort_field(name)
                    .ok_or_else(|| ExportError::InvalidSortField(name.to_string()))?;
                sort.push(SortSpec {
                    column: field.column,
                    direction,
                });
            }
        }
        None => {
            for (name, direction) in schema.default_sort {
                if let Some(field) = schema.sort_field(name) {
                    sort.push(SortSpec {
                        column: field.column,
                        direction: *direction,
                    });
                }
            }
        }
    }

    if !sort.iter().any(|s| s.column == schema.tiebreak) {
        sort.push(SortSpec {
            column: schema.tiebreak,
            direction: SortDirection::Asc,
        });
    }

    Ok(sort)
}

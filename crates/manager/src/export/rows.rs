//! Export row types and their version-gated column sets.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use sqlx::postgres::PgRow;
use sqlx::types::Json;

use super::types::{ApiVersion, Resource};

/// One exported column with the API versions it appears in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub since: ApiVersion,
    /// Last version carrying the column, if it was retired.
    pub until: Option<ApiVersion>,
}

impl Column {
    const fn always(name: &'static str) -> Self {
        Self {
            name,
            since: ApiVersion::V1,
            until: None,
        }
    }

    const fn since(name: &'static str, since: ApiVersion) -> Self {
        Self {
            name,
            since,
            until: None,
        }
    }

    const fn until(name: &'static str, until: ApiVersion) -> Self {
        Self {
            name,
            since: ApiVersion::V1,
            until: Some(until),
        }
    }

    pub fn visible_in(&self, version: ApiVersion) -> bool {
        version >= self.since && self.until.is_none_or(|until| version <= until)
    }
}

/// A single rendered cell.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportValue<'a> {
    Text(&'a str),
    Integer(i64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    List(&'a [String]),
    Null,
}

impl<'a> From<&'a str> for ExportValue<'a> {
    fn from(value: &'a str) -> Self {
        ExportValue::Text(value)
    }
}

impl<'a> From<Option<&'a str>> for ExportValue<'a> {
    fn from(value: Option<&'a str>) -> Self {
        value.map_or(ExportValue::Null, ExportValue::Text)
    }
}

impl From<i64> for ExportValue<'_> {
    fn from(value: i64) -> Self {
        ExportValue::Integer(value)
    }
}

impl From<i32> for ExportValue<'_> {
    fn from(value: i32) -> Self {
        ExportValue::Integer(i64::from(value))
    }
}

impl From<Option<i32>> for ExportValue<'_> {
    fn from(value: Option<i32>) -> Self {
        value.map_or(ExportValue::Null, Into::into)
    }
}

impl From<bool> for ExportValue<'_> {
    fn from(value: bool) -> Self {
        ExportValue::Boolean(value)
    }
}

impl From<Option<DateTime<Utc>>> for ExportValue<'_> {
    fn from(value: Option<DateTime<Utc>>) -> Self {
        value.map_or(ExportValue::Null, ExportValue::Timestamp)
    }
}

impl<'a> From<&'a [String]> for ExportValue<'a> {
    fn from(value: &'a [String]) -> Self {
        ExportValue::List(value)
    }
}

/// Timestamp rendering shared by both formats: UTC, second precision.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

impl Serialize for ExportValue<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ExportValue::Text(s) => serializer.serialize_str(s),
            ExportValue::Integer(i) => serializer.serialize_i64(*i),
            ExportValue::Boolean(b) => serializer.serialize_bool(*b),
            ExportValue::Timestamp(ts) => {
                serializer.collect_str(&ts.format(TIMESTAMP_FORMAT))
            }
            ExportValue::List(items) => items.serialize(serializer),
            ExportValue::Null => serializer.serialize_none(),
        }
    }
}

/// A row type that can be streamed out of an export query.
pub trait ExportRow: for<'r> FromRow<'r, PgRow> + Send + Unpin + 'static {
    const RESOURCE: Resource;

    /// Every column any version may emit, in output order.
    const COLUMNS: &'static [Column];

    /// Cell values aligned with [`ExportRow::COLUMNS`].
    fn values(&self) -> Vec<ExportValue<'_>>;
}

/// Advisory applicable to at least one of the account's systems.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct AdvisoryRow {
    pub id: String,
    pub description: String,
    pub public_date: Option<DateTime<Utc>>,
    pub synopsis: String,
    pub advisory_type: i32,
    pub advisory_type_name: String,
    pub severity: Option<i32>,
    pub cve_count: i32,
    pub reboot_required: bool,
    pub release_versions: Json<Vec<String>>,
    pub installable_systems: i64,
    pub applicable_systems: i64,
}

impl ExportRow for AdvisoryRow {
    const RESOURCE: Resource = Resource::Advisories;

    const COLUMNS: &'static [Column] = &[
        Column::always("id"),
        Column::always("description"),
        Column::always("public_date"),
        Column::always("synopsis"),
        Column::always("advisory_type"),
        Column::always("advisory_type_name"),
        Column::always("severity"),
        Column::since("cve_count", ApiVersion::V3),
        Column::always("reboot_required"),
        Column::always("release_versions"),
        Column::always("installable_systems"),
        Column::always("applicable_systems"),
    ];

    fn values(&self) -> Vec<ExportValue<'_>> {
        vec![
            self.id.as_str().into(),
            self.description.as_str().into(),
            self.public_date.into(),
            self.synopsis.as_str().into(),
            self.advisory_type.into(),
            self.advisory_type_name.as_str().into(),
            self.severity.into(),
            self.cve_count.into(),
            self.reboot_required.into(),
            self.release_versions.0.as_slice().into(),
            self.installable_systems.into(),
            self.applicable_systems.into(),
        ]
    }
}

/// Package name installed on at least one of the account's systems.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct PackageRow {
    pub name: String,
    pub summary: Option<String>,
    pub systems_installed: i64,
    pub systems_installable: i64,
    pub systems_applicable: i64,
}

impl ExportRow for PackageRow {
    const RESOURCE: Resource = Resource::Packages;

    const COLUMNS: &'static [Column] = &[
        Column::always("name"),
        Column::always("summary"),
        Column::always("systems_installed"),
        Column::since("systems_installable", ApiVersion::V3),
        Column::since("systems_applicable", ApiVersion::V3),
        Column::until("systems_updatable", ApiVersion::V2),
    ];

    fn values(&self) -> Vec<ExportValue<'_>> {
        vec![
            self.name.as_str().into(),
            self.summary.as_deref().into(),
            self.systems_installed.into(),
            self.systems_installable.into(),
            self.systems_applicable.into(),
            // updatable meant installable before v3
            self.systems_installable.into(),
        ]
    }
}

/// One of the account's systems with its advisory and package counts.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct SystemRow {
    pub id: String,
    pub display_name: String,
    pub os: Option<String>,
    pub last_upload: Option<DateTime<Utc>>,
    pub stale: bool,
    pub installable_rhsa_count: i32,
    pub installable_rhba_count: i32,
    pub installable_rhea_count: i32,
    pub installable_other_count: i32,
    pub applicable_rhsa_count: i32,
    pub applicable_rhba_count: i32,
    pub applicable_rhea_count: i32,
    pub applicable_other_count: i32,
    pub packages_installed: i32,
    pub packages_installable: i32,
    pub packages_applicable: i32,
    /// `namespace/key=value` literals.
    pub tags: Vec<String>,
}

impl ExportRow for SystemRow {
    const RESOURCE: Resource = Resource::Systems;

    const COLUMNS: &'static [Column] = &[
        Column::always("id"),
        Column::always("display_name"),
        Column::always("os"),
        Column::always("last_upload"),
        Column::always("stale"),
        Column::always("installable_rhsa_count"),
        Column::always("installable_rhba_count"),
        Column::always("installable_rhea_count"),
        Column::always("installable_other_count"),
        Column::since("applicable_rhsa_count", ApiVersion::V3),
        Column::since("applicable_rhba_count", ApiVersion::V3),
        Column::since("applicable_rhea_count", ApiVersion::V3),
        Column::since("applicable_other_count", ApiVersion::V3),
        Column::always("packages_installed"),
        Column::always("packages_installable"),
        Column::since("packages_applicable", ApiVersion::V3),
        Column::always("tags"),
    ];

    fn values(&self) -> Vec<ExportValue<'_>> {
        vec![
            self.id.as_str().into(),
            self.display_name.as_str().into(),
            self.os.as_deref().into(),
            self.last_upload.into(),
            self.stale.into(),
            self.installable_rhsa_count.into(),
            self.installable_rhba_count.into(),
            self.installable_rhea_count.into(),
            self.installable_other_count.into(),
            self.applicable_rhsa_count.into(),
            self.applicable_rhba_count.into(),
            self.applicable_rhea_count.into(),
            self.applicable_other_count.into(),
            self.packages_installed.into(),
            self.packages_installable.into(),
            self.packages_applicable.into(),
            self.tags.as_slice().into(),
        ]
    }
}

/// Column names emitted for `version`.
pub fn visible_columns<R: ExportRow>(version: ApiVersion) -> impl Iterator<Item = &'static str> {
    R::COLUMNS
        .iter()
        .filter(move |c| c.visible_in(version))
        .map(|c| c.name)
}

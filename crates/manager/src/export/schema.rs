//! Per-resource filter schemas.
//!
//! A [`FilterSchema`] enumerates exactly which `filter[...]` fields a resource
//! accepts, how each value is typed, which operators apply, and where the
//! field lives:
//! - [`FieldTarget::Row`] columns exist in every exported row, so they can be
//!   evaluated against the per-account aggregate.
//! - [`FieldTarget::System`] columns describe individual systems and are only
//!   visible inside the live join.
//!
//! The [`SchemaRegistry`] is built once at startup and handed to the request
//! path by reference.

use serde::{Deserialize, Serialize};

use super::types::Resource;

/// Comparison operators accepted in `filter[field]=op:value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Lt,
    Geq,
    Leq,
    In,
    NotIn,
    Between,
}

impl Operator {
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "eq" => Operator::Eq,
            "neq" => Operator::Neq,
            "gt" => Operator::Gt,
            "lt" => Operator::Lt,
            "geq" => Operator::Geq,
            "leq" => Operator::Leq,
            "in" => Operator::In,
            "notin" => Operator::NotIn,
            "between" => Operator::Between,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Neq => "neq",
            Operator::Gt => "gt",
            Operator::Lt => "lt",
            Operator::Geq => "geq",
            Operator::Leq => "leq",
            Operator::In => "in",
            Operator::NotIn => "notin",
            Operator::Between => "between",
        }
    }
}

const TEXT_OPS: &[Operator] = &[Operator::Eq, Operator::Neq, Operator::In, Operator::NotIn];
const ENUM_OPS: &[Operator] = TEXT_OPS;
const BOOL_OPS: &[Operator] = &[Operator::Eq, Operator::Neq];
const INT_OPS: &[Operator] = &[
    Operator::Eq,
    Operator::Neq,
    Operator::Gt,
    Operator::Lt,
    Operator::Geq,
    Operator::Leq,
    Operator::In,
    Operator::NotIn,
    Operator::Between,
];
const DATE_OPS: &[Operator] = &[
    Operator::Eq,
    Operator::Neq,
    Operator::Gt,
    Operator::Lt,
    Operator::Geq,
    Operator::Leq,
    Operator::Between,
];

/// Declared type of a filter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Text,
    Integer,
    Boolean,
    /// RFC 3339 timestamp or `YYYY-MM-DD` (midnight UTC).
    Date,
    /// One of a fixed set of lowercase literals.
    Enum(&'static [&'static str]),
}

/// Where a filter field is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldTarget {
    /// Column of the exported row.
    Row(&'static str),
    /// Column of a joined per-system table, addressed by table alias.
    System {
        table: &'static str,
        column: &'static str,
    },
}

/// One recognized filter field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub target: FieldTarget,
    pub value_type: ValueType,
    pub operators: &'static [Operator],
}

impl FieldSpec {
    const fn row(name: &'static str, value_type: ValueType, operators: &'static [Operator]) -> Self {
        Self {
            name,
            target: FieldTarget::Row(name),
            value_type,
            operators,
        }
    }

    const fn system(
        name: &'static str,
        column: &'static str,
        value_type: ValueType,
        operators: &'static [Operator],
    ) -> Self {
        Self {
            name,
            target: FieldTarget::System {
                table: SYSTEM_ALIAS,
                column,
            },
            value_type,
            operators,
        }
    }

    pub fn allows(&self, op: Operator) -> bool {
        self.operators.contains(&op)
    }

    /// True when the field can only be evaluated against the live join.
    pub fn is_live_only(&self) -> bool {
        matches!(self.target, FieldTarget::System { .. })
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// A `sort=` name and the row column it orders by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortField {
    pub name: &'static str,
    pub column: &'static str,
}

impl SortField {
    const fn same(name: &'static str) -> Self {
        Self { name, column: name }
    }
}

/// Table alias of `system_platform` inside live joins.
pub const SYSTEM_ALIAS: &str = "sp";

/// Typed filter schema for a single resource.
#[derive(Debug, Clone, Copy)]
pub struct FilterSchema {
    pub resource: Resource,
    pub fields: &'static [FieldSpec],
    /// Text columns matched by `search=`.
    pub search_columns: &'static [&'static str],
    pub sort_fields: &'static [SortField],
    /// Ordering applied when the request has no `sort=`.
    pub default_sort: &'static [(&'static str, SortDirection)],
    /// Unique row column appended to every ordering.
    pub tiebreak: &'static str,
    /// Whether a per-account aggregate table exists for this resource.
    pub has_aggregate: bool,
}

impl FilterSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn sort_field(&self, name: &str) -> Option<&SortField> {
        self.sort_fields.iter().find(|s| s.name == name)
    }
}

const ADVISORY_TYPES: &[&str] = &["enhancement", "bugfix", "security", "unknown", "unspecified"];

const ADVISORY_FIELDS: &[FieldSpec] = &[
    FieldSpec::row("id", ValueType::Text, TEXT_OPS),
    FieldSpec::row("description", ValueType::Text, TEXT_OPS),
    FieldSpec::row("synopsis", ValueType::Text, TEXT_OPS),
    FieldSpec::row("public_date", ValueType::Date, DATE_OPS),
    FieldSpec::row("advisory_type", ValueType::Integer, INT_OPS),
    FieldSpec::row(
        "advisory_type_name",
        ValueType::Enum(ADVISORY_TYPES),
        ENUM_OPS,
    ),
    FieldSpec::row("severity", ValueType::Integer, INT_OPS),
    FieldSpec::row("cve_count", ValueType::Integer, INT_OPS),
    FieldSpec::row("reboot_required", ValueType::Boolean, BOOL_OPS),
    FieldSpec::row("installable_systems", ValueType::Integer, INT_OPS),
    FieldSpec::row("applicable_systems", ValueType::Integer, INT_OPS),
    FieldSpec::system("os", "os", ValueType::Text, TEXT_OPS),
    FieldSpec::system("sap_system", "sap_system", ValueType::Boolean, BOOL_OPS),
];

const PACKAGE_FIELDS: &[FieldSpec] = &[
    FieldSpec::row("name", ValueType::Text, TEXT_OPS),
    FieldSpec::row("summary", ValueType::Text, TEXT_OPS),
    FieldSpec::row("systems_installed", ValueType::Integer, INT_OPS),
    FieldSpec::row("systems_installable", ValueType::Integer, INT_OPS),
    FieldSpec::row("systems_applicable", ValueType::Integer, INT_OPS),
    // v1/v2 name for the installable count
    FieldSpec {
        name: "systems_updatable",
        target: FieldTarget::Row("systems_installable"),
        value_type: ValueType::Integer,
        operators: INT_OPS,
    },
    FieldSpec::system("os", "os", ValueType::Text, TEXT_OPS),
    FieldSpec::system("sap_system", "sap_system", ValueType::Boolean, BOOL_OPS),
];

const SYSTEM_FIELDS: &[FieldSpec] = &[
    FieldSpec::row("id", ValueType::Text, TEXT_OPS),
    FieldSpec::row("display_name", ValueType::Text, TEXT_OPS),
    FieldSpec::row("os", ValueType::Text, TEXT_OPS),
    FieldSpec::row("last_upload", ValueType::Date, DATE_OPS),
    FieldSpec::row("stale", ValueType::Boolean, BOOL_OPS),
    FieldSpec::row("installable_rhsa_count", ValueType::Integer, INT_OPS),
    FieldSpec::row("installable_rhba_count", ValueType::Integer, INT_OPS),
    FieldSpec::row("installable_rhea_count", ValueType::Integer, INT_OPS),
    FieldSpec::row("installable_other_count", ValueType::Integer, INT_OPS),
    FieldSpec::row("applicable_rhsa_count", ValueType::Integer, INT_OPS),
    FieldSpec::row("applicable_rhba_count", ValueType::Integer, INT_OPS),
    FieldSpec::row("applicable_rhea_count", ValueType::Integer, INT_OPS),
    FieldSpec::row("applicable_other_count", ValueType::Integer, INT_OPS),
    FieldSpec::row("packages_installed", ValueType::Integer, INT_OPS),
    FieldSpec::row("packages_installable", ValueType::Integer, INT_OPS),
    FieldSpec::row("packages_applicable", ValueType::Integer, INT_OPS),
];

static ADVISORIES: FilterSchema = FilterSchema {
    resource: Resource::Advisories,
    fields: ADVISORY_FIELDS,
    search_columns: &["id", "synopsis"],
    sort_fields: &[
        SortField::same("id"),
        SortField::same("public_date"),
        SortField::same("synopsis"),
        SortField::same("advisory_type_name"),
        SortField::same("severity"),
        SortField::same("cve_count"),
        SortField::same("reboot_required"),
        SortField::same("installable_systems"),
        SortField::same("applicable_systems"),
    ],
    default_sort: &[("public_date", SortDirection::Desc)],
    tiebreak: "id",
    has_aggregate: true,
};

static PACKAGES: FilterSchema = FilterSchema {
    resource: Resource::Packages,
    fields: PACKAGE_FIELDS,
    search_columns: &["name", "summary"],
    sort_fields: &[
        SortField::same("id"),
        SortField::same("name"),
        SortField::same("systems_installed"),
        SortField::same("systems_installable"),
        SortField::same("systems_applicable"),
        SortField {
            name: "systems_updatable",
            column: "systems_installable",
        },
    ],
    default_sort: &[("name", SortDirection::Asc)],
    tiebreak: "id",
    has_aggregate: true,
};

static SYSTEMS: FilterSchema = FilterSchema {
    resource: Resource::Systems,
    fields: SYSTEM_FIELDS,
    search_columns: &["display_name"],
    sort_fields: &[
        SortField::same("id"),
        SortField::same("display_name"),
        SortField::same("os"),
        SortField::same("last_upload"),
        SortField::same("stale"),
        SortField::same("installable_rhsa_count"),
        SortField::same("installable_rhba_count"),
        SortField::same("installable_rhea_count"),
        SortField::same("installable_other_count"),
        SortField::same("packages_installed"),
        SortField::same("packages_installable"),
    ],
    default_sort: &[("last_upload", SortDirection::Desc)],
    tiebreak: "id",
    has_aggregate: false,
};

/// Read-only lookup from resource to its filter schema.
#[derive(Debug, Clone, Copy)]
pub struct SchemaRegistry {
    advisories: &'static FilterSchema,
    packages: &'static FilterSchema,
    systems: &'static FilterSchema,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            advisories: &ADVISORIES,
            packages: &PACKAGES,
            systems: &SYSTEMS,
        }
    }

    pub fn get(&self, resource: Resource) -> &'static FilterSchema {
        match resource {
            Resource::Advisories => self.advisories,
            Resource::Packages => self.packages,
            Resource::Systems => self.systems,
        }
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn every_resource_is_registered() {
        let registry = SchemaRegistry::new();
        for resource in Resource::ALL {
            assert_eq!(registry.get(resource).resource, resource);
        }
    }

    #[test]
    fn operator_tokens_round_trip() {
        for op in INT_OPS {
            assert_eq!(Operator::from_token(op.as_str()), Some(*op));
        }
        assert_eq!(Operator::from_token("like"), None);
    }

    #[test]
    fn system_scoped_fields_are_live_only() {
        let schema = SchemaRegistry::new().get(Resource::Advisories);
        assert!(schema.field("os").unwrap().is_live_only());
        assert!(!schema.field("id").unwrap().is_live_only());
        assert!(schema.field("nonexistent").is_none());
    }

    #[test]
    fn tiebreak_is_sortable() {
        let registry = SchemaRegistry::new();
        for resource in Resource::ALL {
            let schema = registry.get(resource);
            assert!(schema.sort_field(schema.tiebreak).is_some(), "{resource}");
            for (name, _) in schema.default_sort {
                assert!(schema.sort_field(name).is_some(), "{resource}: {name}");
            }
        }
    }

    #[test]
    fn updatable_alias_targets_installable_column() {
        let schema = SchemaRegistry::new().get(Resource::Packages);
        assert_eq!(
            schema.field("systems_updatable").unwrap().target,
            FieldTarget::Row("systems_installable")
        );
        assert_eq!(
            schema.sort_field("systems_updatable").unwrap().column,
            "systems_installable"
        );
    }

    #[test]
    fn only_systems_lack_an_aggregate() {
        let registry = SchemaRegistry::new();
        assert!(registry.get(Resource::Advisories).has_aggregate);
        assert!(registry.get(Resource::Packages).has_aggregate);
        assert!(!registry.get(Resource::Systems).has_aggregate);
    }
}

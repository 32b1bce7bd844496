//! Export query builder using SeaQuery.
//!
//! Every export query has the same outer shape:
//!
//! ```text
//! SELECT * FROM (<source>) AS rows
//! WHERE <row filters> AND <search>
//! ORDER BY <sort>, <tiebreak>
//! ```
//!
//! The source is chosen by resource and [`QueryStrategy`]. Cached sources read
//! the per-account aggregate tables; live sources join per-system tables and
//! count. Both expose identical column names, so row filters, search and
//! ordering never need to know which one they run against.

use sea_query::{
    Alias, Asterisk, Cond, Expr, JoinType, Order, PostgresQueryBuilder, Query, SelectStatement,
    SimpleExpr, Value,
};

use super::filter::{Filter, FilterValue, ValidatedFilterSet};
use super::schema::{FieldTarget, FilterSchema, Operator, SortDirection};
use super::strategy::QueryStrategy;
use super::tags::{TagCombination, TagExpression};
use super::types::{AccountContext, Resource};

/// Alias of the derived table every outer clause refers to.
const ROWS: &str = "rows";

/// `system_advisories.status_id` for advisories with an available update.
const STATUS_INSTALLABLE: i32 = 0;

/// `system_advisories.status_id` for advisories not yet installable.
const STATUS_APPLICABLE: i32 = 1;

fn col(table: &str, column: &str) -> Expr {
    Expr::col((Alias::new(table), Alias::new(column)))
}

fn col_ref(table: &str, column: &str) -> (Alias, Alias) {
    (Alias::new(table), Alias::new(column))
}

/// Query builder for one export request.
pub struct ExportQueryBuilder<'a> {
    schema: &'a FilterSchema,
    filters: &'a ValidatedFilterSet,
    account: &'a AccountContext,
    strategy: QueryStrategy,
    tag_combination: TagCombination,
}

impl<'a> ExportQueryBuilder<'a> {
    pub fn new(
        schema: &'a FilterSchema,
        filters: &'a ValidatedFilterSet,
        account: &'a AccountContext,
        strategy: QueryStrategy,
    ) -> Self {
        Self {
            schema,
            filters,
            account,
            strategy,
            tag_combination: TagCombination::default(),
        }
    }

    pub fn with_tag_combination(mut self, tag_combination: TagCombination) -> Self {
        self.tag_combination = tag_combination;
        self
    }

    /// Build the full export statement.
    pub fn build(&self) -> String {
        let mut query = Query::select();
        query
            .column(Asterisk)
            .from_subquery(self.source(), Alias::new(ROWS));

        for filter in self.filters.row_filters() {
            if let FieldTarget::Row(column) = filter.spec.target {
                query.and_where(filter_condition(col(ROWS, column), filter));
            }
        }
        if let Some(search) = &self.filters.search {
            query.and_where(self.search_condition(search).into());
        }

        for sort in &self.filters.sort {
            let order = match sort.direction {
                SortDirection::Asc => Order::Asc,
                SortDirection::Desc => Order::Desc,
            };
            query.order_by(col_ref(ROWS, sort.column), order);
        }

        query.to_string(PostgresQueryBuilder)
    }

    fn source(&self) -> SelectStatement {
        match (self.schema.resource, self.strategy) {
            (Resource::Advisories, QueryStrategy::Cached) => self.advisories_cached(),
            (Resource::Advisories, QueryStrategy::Live) => self.advisories_live(),
            (Resource::Packages, QueryStrategy::Cached) => self.packages_cached(),
            (Resource::Packages, QueryStrategy::Live) => self.packages_live(),
            (Resource::Systems, _) => self.systems(),
        }
    }

    /// Case-insensitive substring match over the schema's search columns.
    fn search_condition(&self, search: &str) -> Cond {
        let pattern = format!("%{}%", escape_like_wildcards(search));
        let mut any = Cond::any();
        for column in self.schema.search_columns {
            any = any.add(Expr::cust_with_values(
                format!("\"{ROWS}\".\"{column}\" ILIKE $1"),
                [pattern.clone()],
            ));
        }
        any
    }

    /// Per-system restrictions shared by every live source.
    ///
    /// Expects `sp` (system_platform) and `ih` (inventory.hosts) in scope.
    fn system_scope(&self) -> Cond {
        let mut cond = Cond::all().add(col("sp", "rh_account_id").eq(self.account.account_id));

        for filter in self.filters.system_filters() {
            if let FieldTarget::System { table, column } = filter.spec.target {
                cond = cond.add(filter_condition(col(table, column), filter));
            }
        }

        for clause in self.tag_combination.clauses(&self.filters.tags) {
            let mut any = Cond::any();
            for tag in clause {
                any = any.add(tag_condition(tag));
            }
            cond = cond.add(any);
        }

        if !self.account.groups.is_unrestricted() {
            let mut any = Cond::any();
            for id in self.account.groups.ids() {
                let group = serde_json::json!([{ "id": id }]).to_string();
                any = any.add(Expr::cust_with_values(
                    "\"ih\".\"groups\" @> CAST($1 AS jsonb)",
                    [group],
                ));
            }
            cond = cond.add(any);
        }

        cond
    }

    fn join_systems(&self, query: &mut SelectStatement, system_id: (Alias, Alias)) {
        query
            .join_as(
                JoinType::InnerJoin,
                Alias::new("system_platform"),
                Alias::new("sp"),
                Cond::all()
                    .add(col("sp", "id").equals(system_id))
                    .add(col("sp", "stale").eq(false)),
            )
            .join_as(
                JoinType::InnerJoin,
                (Alias::new("inventory"), Alias::new("hosts")),
                Alias::new("ih"),
                col("ih", "id").equals(col_ref("sp", "inventory_id")),
            );
    }

    fn advisories_cached(&self) -> SelectStatement {
        let mut query = advisory_base();
        query
            .expr_as(
                Expr::cust("\"aad\".\"systems_installable\"::bigint"),
                Alias::new("installable_systems"),
            )
            .expr_as(
                Expr::cust("\"aad\".\"systems_applicable\"::bigint"),
                Alias::new("applicable_systems"),
            )
            .join_as(
                JoinType::InnerJoin,
                Alias::new("advisory_account_data"),
                Alias::new("aad"),
                Cond::all()
                    .add(col("aad", "advisory_id").equals(col_ref("am", "id")))
                    .add(col("aad", "rh_account_id").eq(self.account.account_id)),
            )
            .cond_where(
                Cond::any()
                    .add(col("aad", "systems_installable").gt(0))
                    .add(col("aad", "systems_applicable").gt(0)),
            );
        query
    }

    fn advisories_live(&self) -> SelectStatement {
        let mut query = advisory_base();
        query
            .expr_as(
                Expr::cust(format!(
                    "COUNT(DISTINCT \"sp\".\"id\") FILTER (WHERE \"sa\".\"status_id\" = {STATUS_INSTALLABLE})"
                )),
                Alias::new("installable_systems"),
            )
            .expr_as(
                Expr::cust(format!(
                    "COUNT(DISTINCT \"sp\".\"id\") FILTER (WHERE \"sa\".\"status_id\" = {STATUS_APPLICABLE})"
                )),
                Alias::new("applicable_systems"),
            )
            .join_as(
                JoinType::InnerJoin,
                Alias::new("system_advisories"),
                Alias::new("sa"),
                Cond::all()
                    .add(col("sa", "advisory_id").equals(col_ref("am", "id")))
                    .add(col("sa", "rh_account_id").eq(self.account.account_id)),
            );
        self.join_systems(&mut query, col_ref("sa", "system_id"));
        query
            .cond_where(self.system_scope())
            .group_by_col(col_ref("am", "id"))
            .group_by_col(col_ref("at", "id"));
        query
    }

    fn packages_cached(&self) -> SelectStatement {
        let mut query = package_base();
        query
            .expr_as(
                Expr::cust("\"pad\".\"systems_installed\"::bigint"),
                Alias::new("systems_installed"),
            )
            .expr_as(
                Expr::cust("\"pad\".\"systems_installable\"::bigint"),
                Alias::new("systems_installable"),
            )
            .expr_as(
                Expr::cust("\"pad\".\"systems_applicable\"::bigint"),
                Alias::new("systems_applicable"),
            )
            .join_as(
                JoinType::InnerJoin,
                Alias::new("package_account_data"),
                Alias::new("pad"),
                Cond::all()
                    .add(col("pad", "package_name_id").equals(col_ref("pn", "id")))
                    .add(col("pad", "rh_account_id").eq(self.account.account_id)),
            )
            .cond_where(col("pad", "systems_installed").gt(0));
        query
    }

    fn packages_live(&self) -> SelectStatement {
        let mut query = package_base();
        query
            .expr_as(
                Expr::cust("COUNT(DISTINCT \"sp\".\"id\")"),
                Alias::new("systems_installed"),
            )
            .expr_as(
                Expr::cust(
                    "COUNT(DISTINCT \"sp\".\"id\") FILTER (WHERE \"spkg\".\"installable_id\" IS NOT NULL)",
                ),
                Alias::new("systems_installable"),
            )
            .expr_as(
                Expr::cust(
                    "COUNT(DISTINCT \"sp\".\"id\") FILTER (WHERE \"spkg\".\"applicable_id\" IS NOT NULL)",
                ),
                Alias::new("systems_applicable"),
            )
            .join_as(
                JoinType::InnerJoin,
                Alias::new("system_package"),
                Alias::new("spkg"),
                Cond::all()
                    .add(col("spkg", "name_id").equals(col_ref("pn", "id")))
                    .add(col("spkg", "rh_account_id").eq(self.account.account_id)),
            );
        self.join_systems(&mut query, col_ref("spkg", "system_id"));
        query
            .cond_where(self.system_scope())
            .group_by_col(col_ref("pn", "id"));
        query
    }

    /// Systems have no aggregate; their counts live on `system_platform`.
    fn systems(&self) -> SelectStatement {
        let mut query = Query::select();
        query
            .expr_as(
                Expr::cust("\"sp\".\"inventory_id\"::text"),
                Alias::new("id"),
            )
            .expr_as(col("sp", "display_name"), Alias::new("display_name"))
            .expr_as(col("sp", "os"), Alias::new("os"))
            .expr_as(col("sp", "last_upload"), Alias::new("last_upload"))
            .expr_as(col("sp", "stale"), Alias::new("stale"));

        for (kind, cache) in [("rhsa", "sec"), ("rhba", "bug"), ("rhea", "enh"), ("other", "other")] {
            for status in ["installable", "applicable"] {
                query.expr_as(
                    col("sp", &format!("{status}_advisory_{cache}_count_cache")),
                    Alias::new(format!("{status}_{kind}_count")),
                );
            }
        }

        query
            .expr_as(col("sp", "packages_installed"), Alias::new("packages_installed"))
            .expr_as(
                col("sp", "packages_installable"),
                Alias::new("packages_installable"),
            )
            .expr_as(
                col("sp", "packages_applicable"),
                Alias::new("packages_applicable"),
            )
            .expr_as(
                Expr::cust(
                    "ARRAY(SELECT concat(t->>'namespace', '/', t->>'key', '=', t->>'value') \
                     FROM jsonb_array_elements(COALESCE(\"ih\".\"tags\", '[]'::jsonb)) AS t)",
                ),
                Alias::new("tags"),
            )
            .from_as(Alias::new("system_platform"), Alias::new("sp"))
            .join_as(
                JoinType::InnerJoin,
                (Alias::new("inventory"), Alias::new("hosts")),
                Alias::new("ih"),
                col("ih", "id").equals(col_ref("sp", "inventory_id")),
            )
            .cond_where(self.system_scope());
        query
    }
}

/// Advisory metadata columns shared by both advisory sources.
fn advisory_base() -> SelectStatement {
    let mut query = Query::select();
    query
        .expr_as(col("am", "name"), Alias::new("id"))
        .expr_as(col("am", "description"), Alias::new("description"))
        .expr_as(col("am", "public_date"), Alias::new("public_date"))
        .expr_as(col("am", "synopsis"), Alias::new("synopsis"))
        .expr_as(
            Expr::cust("\"am\".\"advisory_type_id\"::int"),
            Alias::new("advisory_type"),
        )
        .expr_as(col("at", "name"), Alias::new("advisory_type_name"))
        .expr_as(
            Expr::cust("\"am\".\"severity_id\"::int"),
            Alias::new("severity"),
        )
        .expr_as(
            Expr::cust("COALESCE(jsonb_array_length(\"am\".\"cve_list\"), 0)::int"),
            Alias::new("cve_count"),
        )
        .expr_as(col("am", "reboot_required"), Alias::new("reboot_required"))
        .expr_as(
            Expr::cust("COALESCE(\"am\".\"release_versions\", '[]'::jsonb)"),
            Alias::new("release_versions"),
        )
        .from_as(Alias::new("advisory_metadata"), Alias::new("am"))
        .join_as(
            JoinType::InnerJoin,
            Alias::new("advisory_type"),
            Alias::new("at"),
            col("at", "id").equals(col_ref("am", "advisory_type_id")),
        );
    query
}

/// Package name columns shared by both package sources.
fn package_base() -> SelectStatement {
    let mut query = Query::select();
    query
        .expr_as(col("pn", "id"), Alias::new("id"))
        .expr_as(col("pn", "name"), Alias::new("name"))
        .expr_as(col("pn", "summary"), Alias::new("summary"))
        .from_as(Alias::new("package_name"), Alias::new("pn"));
    query
}

/// Systems carrying any of the tags in one OR-set.
fn tag_condition(tag: &TagExpression) -> SimpleExpr {
    let needle = serde_json::json!([{
        "namespace": tag.namespace,
        "key": tag.key,
        "value": tag.value,
    }])
    .to_string();
    Expr::cust_with_values("\"ih\".\"tags\" @> CAST($1 AS jsonb)", [needle])
}

/// Translate one validated filter into a predicate on `target`.
fn filter_condition(target: Expr, filter: &Filter) -> SimpleExpr {
    match filter.operator {
        Operator::Eq => target.eq(scalar(&filter.value)),
        Operator::Neq => target.ne(scalar(&filter.value)),
        Operator::Gt => target.gt(scalar(&filter.value)),
        Operator::Lt => target.lt(scalar(&filter.value)),
        Operator::Geq => target.gte(scalar(&filter.value)),
        Operator::Leq => target.lte(scalar(&filter.value)),
        Operator::In => target.is_in(list(&filter.value)),
        Operator::NotIn => target.is_not_in(list(&filter.value)),
        Operator::Between => match &filter.value {
            FilterValue::Range(low, high) => target.between(scalar(low), scalar(high)),
            other => target.eq(scalar(other)),
        },
    }
}

fn scalar(value: &FilterValue) -> Value {
    match value {
        FilterValue::Text(s) => s.clone().into(),
        FilterValue::Integer(i) => (*i).into(),
        FilterValue::Boolean(b) => (*b).into(),
        FilterValue::Date(ts) => (*ts).into(),
        // never produced for scalar operators; compares as NULL and matches nothing
        FilterValue::List(_) | FilterValue::Range(_, _) => Value::String(None),
    }
}

fn list(value: &FilterValue) -> Vec<Value> {
    match value {
        FilterValue::List(items) => items.iter().map(scalar).collect(),
        other => vec![scalar(other)],
    }
}

/// Escape SQL LIKE wildcard characters (`%`, `_`, `\`) in a value.
fn escape_like_wildcards(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::export::filter::{ExportParams, validate};
    use crate::export::schema::SchemaRegistry;
    use crate::export::types::InventoryGroups;

    fn account() -> AccountContext {
        AccountContext {
            account_id: 7,
            groups: InventoryGroups::default(),
        }
    }

    fn sql(resource: Resource, strategy: QueryStrategy, query: &str) -> String {
        sql_for(resource, strategy, query, &account())
    }

    fn sql_for(
        resource: Resource,
        strategy: QueryStrategy,
        query: &str,
        account: &AccountContext,
    ) -> String {
        let schema = SchemaRegistry::new().get(resource);
        let filters = validate(schema, &ExportParams::from_query(Some(query))).unwrap();
        ExportQueryBuilder::new(schema, &filters, account, strategy).build()
    }

    #[test]
    fn cached_advisories_read_aggregate() {
        let sql = sql(Resource::Advisories, QueryStrategy::Cached, "");
        assert!(sql.starts_with("SELECT * FROM (SELECT"));
        assert!(sql.contains("\"advisory_account_data\" AS \"aad\""));
        assert!(sql.contains("\"aad\".\"rh_account_id\" = 7"));
        assert!(!sql.contains("system_advisories"));
        assert!(!sql.contains("GROUP BY"));
    }

    #[test]
    fn live_advisories_join_systems_and_group() {
        let sql = sql(Resource::Advisories, QueryStrategy::Live, "");
        assert!(sql.contains("\"system_advisories\" AS \"sa\""));
        assert!(sql.contains("\"inventory\".\"hosts\" AS \"ih\""));
        assert!(sql.contains("\"sp\".\"rh_account_id\" = 7"));
        assert!(sql.contains("GROUP BY \"am\".\"id\", \"at\".\"id\""));
        assert!(!sql.contains("advisory_account_data"));
    }

    #[test]
    fn row_filter_applies_to_derived_table() {
        let sql = sql(Resource::Advisories, QueryStrategy::Cached, "filter[id]=RH-1");
        assert!(sql.contains("\"rows\".\"id\" = 'RH-1'"));
    }

    #[test]
    fn list_and_range_operators() {
        let sql = sql(
            Resource::Advisories,
            QueryStrategy::Cached,
            "filter[id]=in:RH-1,RH-2&filter[cve_count]=between:1,5",
        );
        assert!(sql.contains("\"rows\".\"id\" IN ('RH-1', 'RH-2')"));
        assert!(sql.contains("\"rows\".\"cve_count\" BETWEEN 1 AND 5"));
    }

    #[test]
    fn default_ordering_ends_with_tiebreak() {
        let sql = sql(Resource::Advisories, QueryStrategy::Cached, "");
        assert!(sql.ends_with("ORDER BY \"rows\".\"public_date\" DESC, \"rows\".\"id\" ASC"));
    }

    #[test]
    fn updatable_alias_sorts_installable_column() {
        let sql = sql(
            Resource::Packages,
            QueryStrategy::Cached,
            "sort=-systems_updatable",
        );
        assert!(sql.contains("ORDER BY \"rows\".\"systems_installable\" DESC, \"rows\".\"id\" ASC"));
    }

    #[test]
    fn search_is_case_insensitive_over_search_columns() {
        let sql = sql(Resource::Advisories, QueryStrategy::Cached, "search=kernel");
        assert!(sql.contains("\"rows\".\"id\" ILIKE '%kernel%'"));
        assert!(sql.contains("\"rows\".\"synopsis\" ILIKE '%kernel%'"));
        assert!(sql.contains(" OR "));
    }

    #[test]
    fn search_escapes_wildcards() {
        assert_eq!(escape_like_wildcards("50%_a\\b"), "50\\%\\_a\\\\b");
    }

    #[test]
    fn system_filter_lands_in_live_join() {
        let sql = sql(
            Resource::Packages,
            QueryStrategy::Live,
            "filter[os]=RHEL 8.6&filter[name]=kernel",
        );
        assert!(sql.contains("\"sp\".\"os\" = 'RHEL 8.6'"));
        assert!(sql.contains("\"rows\".\"name\" = 'kernel'"));
        assert!(sql.contains("GROUP BY \"pn\".\"id\""));
    }

    #[test]
    fn tags_become_containment_checks() {
        let sql = sql(
            Resource::Advisories,
            QueryStrategy::Live,
            "tags=ns1/k3=val4&tags=ns2/k1=val1",
        );
        assert_eq!(sql.matches("\"ih\".\"tags\" @> CAST(").count(), 2);
        assert!(sql.contains("k3"));
        assert!(sql.contains("val4"));
    }

    #[test]
    fn namespace_combination_ors_within_namespace() {
        let schema = SchemaRegistry::new().get(Resource::Systems);
        let filters = validate(
            schema,
            &ExportParams::from_query(Some("tags=ns1/k=a&tags=ns1/k=b")),
        )
        .unwrap();
        let sql = ExportQueryBuilder::new(schema, &filters, &account(), QueryStrategy::Live)
            .with_tag_combination(TagCombination::AnyWithinNamespace)
            .build();
        let tags_at = sql.find("\"ih\".\"tags\"").unwrap();
        assert!(sql[tags_at..].contains(" OR "));
    }

    #[test]
    fn inventory_groups_restrict_live_systems() {
        let account = AccountContext {
            account_id: 7,
            groups: InventoryGroups::new(BTreeMap::from([
                ("g1".to_string(), "one".to_string()),
                ("g2".to_string(), "two".to_string()),
            ])),
        };
        let sql = sql_for(Resource::Systems, QueryStrategy::Live, "", &account);
        assert_eq!(sql.matches("\"ih\".\"groups\" @> CAST(").count(), 2);
    }

    #[test]
    fn systems_ignore_strategy() {
        assert_eq!(
            sql(Resource::Systems, QueryStrategy::Cached, "filter[stale]=false"),
            sql(Resource::Systems, QueryStrategy::Live, "filter[stale]=false"),
        );
    }

    #[test]
    fn systems_expose_renamed_count_columns() {
        let sql = sql(Resource::Systems, QueryStrategy::Live, "");
        assert!(sql.contains(
            "\"sp\".\"installable_advisory_sec_count_cache\" AS \"installable_rhsa_count\""
        ));
        assert!(sql.contains(
            "\"sp\".\"applicable_advisory_other_count_cache\" AS \"applicable_other_count\""
        ));
    }

    #[test]
    fn same_request_builds_same_sql() {
        let q = "filter[cve_count]=gt:0&search=ssl&sort=severity";
        assert_eq!(
            sql(Resource::Advisories, QueryStrategy::Live, q),
            sql(Resource::Advisories, QueryStrategy::Live, q),
        );
    }
}

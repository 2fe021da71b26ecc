//! SQL fragment rendering for chart filters, aggregate queries and drill-down lookups.
//!
//! Literal values are escaped by doubling embedded single quotes and nothing else;
//! identifiers are interpolated as configured on the chart.

use crate::{
    catalog::Operator,
    error::{DashboardError, Result},
    grouping::AggregateBucket,
    models::{Aggregation, Chart, ChartKind, DashboardContext, FilterRule, SCOPE_WILDCARD},
};
use chrono::NaiveDate;
use std::{collections::BTreeMap, sync::Arc};

/// Display label given to NULL or blank grouping values.
pub const NULL_DISPLAY_LABEL: &str = "(Empty)";

/// Drill key carried by the synthetic overflow bucket.
pub const OTHERS_DRILL_KEY: &str = "Others";

pub const VIEW_SCOPE_COLUMN: &str = "CD_EMPRESA_PLANO";
pub const DEFAULT_SCOPE_COLUMN: &str = "CD_OPERADORA";

const SCOPE_WILDCARDS: [&str; 3] = [SCOPE_WILDCARD, "TODOS", "ALL"];

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn quote_identifier(column: &str) -> String {
    format!("\"{}\"", column.replace('"', "\"\""))
}

fn is_finite_number(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty() && trimmed.parse::<f64>().is_ok_and(f64::is_finite)
}

/// Numbers stay bare, everything else becomes a string literal.
fn filter_literal(value: &str) -> String {
    if is_finite_number(value) {
        value.trim().to_string()
    } else {
        quote_literal(value)
    }
}

fn temporal_literal(value: &str) -> String {
    let trimmed = value.trim();
    match NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        Ok(date) => format!("DATE '{}'", date.format("%Y-%m-%d")),
        Err(_) => quote_literal(value),
    }
}

fn split_list(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect()
}

/// Renders one chart/dashboard filter rule, or `None` when the rule is incomplete.
///
/// Equality here leaves numeric-looking values unquoted. Drill-down equality uses
/// [`drilldown_equality`], which always quotes.
pub fn filter_fragment(rule: &FilterRule) -> Option<String> {
    if !rule.is_complete() {
        return None;
    }
    let col = rule.column.trim();
    let value = rule.value.as_str();

    let fragment = match rule.operator {
        Operator::Equals => format!("{col} = {}", filter_literal(value)),
        Operator::NotEquals => format!("{col} != {}", filter_literal(value)),
        Operator::Contains => format!("{col} LIKE {}", quote_literal(&format!("%{value}%"))),
        Operator::StartsWith => format!("{col} LIKE {}", quote_literal(&format!("{value}%"))),
        Operator::EndsWith => format!("{col} LIKE {}", quote_literal(&format!("%{value}"))),
        Operator::GreaterThan => format!("{col} > {}", filter_literal(value)),
        Operator::LessThan => format!("{col} < {}", filter_literal(value)),
        Operator::GreaterOrEqual => format!("{col} >= {}", filter_literal(value)),
        Operator::LessOrEqual => format!("{col} <= {}", filter_literal(value)),
        Operator::After => format!("{col} > {}", temporal_literal(value)),
        Operator::Before => format!("{col} < {}", temporal_literal(value)),
        Operator::Between => {
            let bounds = split_list(value);
            match bounds.as_slice() {
                [low, high] => {
                    let render = |bound: &str| {
                        if is_finite_number(bound) {
                            bound.to_string()
                        } else {
                            temporal_literal(bound)
                        }
                    };
                    format!("{col} BETWEEN {} AND {}", render(low), render(high))
                }
                _ => return None,
            }
        }
        Operator::InList => {
            let items = split_list(value);
            if items.is_empty() {
                return None;
            }
            let rendered: Vec<String> = items.into_iter().map(filter_literal).collect();
            format!("{col} IN ({})", rendered.join(", "))
        }
    };
    Some(fragment)
}

/// Conjunction of every complete rule; empty when nothing applies.
pub fn generate_sql_from_filters(rules: &[FilterRule]) -> String {
    rules
        .iter()
        .filter_map(filter_fragment)
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Drill-down exact match. Always a string literal, so numeric-looking codes stored in
/// text columns still compare correctly.
pub fn drilldown_equality(column: &str, value: &str) -> String {
    format!("{column} = {}", quote_literal(value))
}

/// True for values a bucket click treats as SQL NULL.
pub fn is_null_bucket(value: Option<&str>) -> bool {
    match value {
        None => true,
        Some(value) => {
            let trimmed = value.trim();
            trimmed.is_empty()
                || trimmed.eq_ignore_ascii_case("NULL")
                || value == NULL_DISPLAY_LABEL
        }
    }
}

/// Clause selecting the raw rows behind one clicked bucket.
///
/// `siblings` is the snapshot of rendered buckets; it is only consulted for the
/// synthetic overflow bucket, whose rows are everything the other buckets are not.
pub fn bucket_clause(
    column: &str,
    value: Option<&str>,
    siblings: Option<&[AggregateBucket]>,
) -> String {
    if is_null_bucket(value) {
        return format!("{column} IS NULL");
    }
    let value = value.unwrap_or_default();

    if let (OTHERS_DRILL_KEY, Some(siblings)) = (value, siblings) {
        let excluded: Vec<String> = siblings
            .iter()
            .filter_map(|bucket| bucket.drill_key.as_deref())
            .filter(|key| {
                *key != OTHERS_DRILL_KEY && !key.trim().is_empty() && *key != NULL_DISPLAY_LABEL
            })
            .map(quote_literal)
            .collect();

        return if excluded.is_empty() {
            format!("{column} IS NOT NULL")
        } else {
            format!(
                "{column} NOT IN ({}) AND {column} IS NOT NULL",
                excluded.join(",")
            )
        };
    }

    drilldown_equality(column, value)
}

/// Picks the column the scope selector's ids are matched against.
pub trait ScopeColumnStrategy: Send + Sync {
    fn scope_column(&self, source_table: &str, context: &DashboardContext) -> String;
}

/// Views (`VW_` names, `SIGO` sources, raw-SQL dashboards) carry the plan-company
/// column; plain tables carry the operator column.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamingScopeColumn;

impl ScopeColumnStrategy for NamingScopeColumn {
    fn scope_column(&self, source_table: &str, context: &DashboardContext) -> String {
        let upper = source_table.to_uppercase();
        let view_like = upper.contains("VW_") || upper.contains("SIGO") || context.sql_mode;
        if view_like {
            VIEW_SCOPE_COLUMN.to_string()
        } else {
            DEFAULT_SCOPE_COLUMN.to_string()
        }
    }
}

pub fn is_wildcard_scope(selector: &str) -> bool {
    let trimmed = selector.trim();
    trimmed.is_empty()
        || SCOPE_WILDCARDS
            .iter()
            .any(|wildcard| trimmed.eq_ignore_ascii_case(wildcard))
}

/// Renders the request's grouping, filtering and ranking into SQL. Cheap to clone.
#[derive(Clone)]
pub struct SqlBuilder {
    scope: Arc<dyn ScopeColumnStrategy>,
}

impl Default for SqlBuilder {
    fn default() -> Self {
        Self::new(Arc::new(NamingScopeColumn))
    }
}

impl std::fmt::Debug for SqlBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlBuilder").finish_non_exhaustive()
    }
}

impl SqlBuilder {
    pub fn new(scope: Arc<dyn ScopeColumnStrategy>) -> Self {
        Self { scope }
    }

    /// `scopeColumn IN ('1', '2')` for a non-wildcard selector with at least one numeric id.
    pub fn scope_clause(&self, source_table: &str, context: &DashboardContext) -> Option<String> {
        if is_wildcard_scope(&context.scope_selector) {
            return None;
        }
        let ids: Vec<String> = split_list(&context.scope_selector)
            .into_iter()
            .filter(|id| is_finite_number(id))
            .map(quote_literal)
            .collect();
        if ids.is_empty() {
            return None;
        }
        let column = self.scope.scope_column(source_table, context);
        Some(format!("{column} IN ({})", ids.join(", ")))
    }

    /// User filters, optional extra rules (each conjunction parenthesised), then scope.
    fn context_clauses(
        &self,
        source_table: &str,
        context: &DashboardContext,
        extra: &[FilterRule],
    ) -> Vec<String> {
        let mut clauses = Vec::new();
        for rules in [context.user_filters.as_slice(), extra] {
            let rendered = generate_sql_from_filters(rules);
            if !rendered.is_empty() {
                clauses.push(format!("({rendered})"));
            }
        }
        if let Some(scope) = self.scope_clause(source_table, context) {
            clauses.push(scope);
        }
        clauses
    }

    /// `SELECT * FROM <source> WHERE <bucket> AND (<user filters>) AND <scope>`.
    pub fn drilldown_sql(
        &self,
        source_table: &str,
        column: &str,
        value: Option<&str>,
        siblings: Option<&[AggregateBucket]>,
        context: &DashboardContext,
    ) -> String {
        let mut clauses = vec![bucket_clause(column, value, siblings)];
        clauses.extend(self.context_clauses(source_table, context, &[]));
        format!("SELECT * FROM {source_table} WHERE {}", clauses.join(" AND "))
    }

    /// WHERE body for a chart's aggregate query: dashboard filters, chart filters, scope.
    pub fn chart_where(
        &self,
        source_table: &str,
        chart: &Chart,
        context: &DashboardContext,
    ) -> Option<String> {
        let clauses = self.context_clauses(source_table, context, &chart.chart_specific_filters);
        (!clauses.is_empty()).then(|| clauses.join(" AND "))
    }

    /// Server-side aggregate for one chart. Rows come back as `(NAME, VALUE)` ordered by
    /// value descending; `top_n` pushes the ranking cut into SQL.
    pub fn aggregate_sql(
        &self,
        chart: &Chart,
        context: &DashboardContext,
        top_n: Option<usize>,
    ) -> Result<String> {
        let source = aggregate_source(chart, context)?;
        let measure = aggregate_expression(chart)?;
        let where_sql = self.where_suffix(source, chart, context);

        if chart.kind == ChartKind::Kpi {
            return Ok(format!("SELECT {measure} AS VALUE FROM {source}{where_sql}"));
        }

        let category = chart.grouping_column(context).ok_or_else(|| {
            DashboardError::Configuration(format!(
                "chart '{}' has no category column",
                chart.title
            ))
        })?;

        let mut sql = format!(
            "SELECT {category} AS NAME, {measure} AS VALUE FROM {source}{where_sql} \
             GROUP BY {category} ORDER BY VALUE DESC"
        );
        if let Some(limit) = top_n {
            sql.push_str(&format!(" FETCH FIRST {limit} ROWS ONLY"));
        }
        Ok(sql)
    }

    /// Raw rows behind a chart, for aggregating in process.
    pub fn rows_sql(&self, chart: &Chart, context: &DashboardContext) -> Result<String> {
        let source = aggregate_source(chart, context)?;
        let where_sql = self.where_suffix(source, chart, context);
        Ok(format!("SELECT * FROM {source}{where_sql}"))
    }

    fn where_suffix(&self, source: &str, chart: &Chart, context: &DashboardContext) -> String {
        self.chart_where(source, chart, context)
            .map(|body| format!(" WHERE {body}"))
            .unwrap_or_default()
    }
}

fn aggregate_source<'a>(chart: &'a Chart, context: &'a DashboardContext) -> Result<&'a str> {
    chart
        .source()
        .or_else(|| Some(context.source_table.trim()).filter(|s| !s.is_empty()))
        .ok_or_else(|| {
            DashboardError::Configuration(format!("chart '{}' has no source table", chart.title))
        })
}

fn aggregate_expression(chart: &Chart) -> Result<String> {
    let value_column = || {
        chart
            .value_column
            .as_deref()
            .map(str::trim)
            .filter(|column| !column.is_empty())
            .ok_or_else(|| {
                DashboardError::Configuration(format!(
                    "chart '{}' aggregates with {:?} but has no value column",
                    chart.title, chart.aggregation
                ))
            })
    };

    Ok(match chart.aggregation {
        Aggregation::Count => "COUNT(*)".to_string(),
        Aggregation::Sum => format!("SUM({})", value_column()?),
        Aggregation::Avg => {
            let column = value_column()?;
            format!("SUM({column}) / COUNT(*)")
        }
    })
}

/// Case-insensitive substring match per local drill-down filter; blank values are skipped.
pub fn local_filter_clause(filters: &BTreeMap<String, String>) -> Option<String> {
    let clauses: Vec<String> = filters
        .iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .map(|(column, value)| {
            format!(
                "UPPER(TO_CHAR({})) LIKE UPPER({})",
                quote_identifier(column),
                quote_literal(&format!("%{value}%"))
            )
        })
        .collect();
    (!clauses.is_empty()).then(|| clauses.join(" AND "))
}

/// Row and count statements for a drill-down base query under local filters.
pub fn drilldown_queries(base_sql: &str, filters: &BTreeMap<String, String>) -> (String, String) {
    match local_filter_clause(filters) {
        Some(clause) => (
            format!("SELECT * FROM ({base_sql}) MAIN_QUERY WHERE {clause}"),
            format!("SELECT COUNT(*) FROM ({base_sql}) MAIN_QUERY WHERE {clause}"),
        ),
        None => (
            base_sql.to_string(),
            format!("SELECT COUNT(*) FROM ({base_sql}) MAIN_QUERY"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn bucket(name: &str, drill_key: Option<&str>, value: f64) -> AggregateBucket {
        AggregateBucket {
            name: name.to_string(),
            raw_value: value,
            drill_key: drill_key.map(str::to_string),
            visual_value: value,
            percent_share: 0.0,
        }
    }

    #[test]
    fn null_like_values_select_is_null() {
        for value in [None, Some(""), Some("   "), Some("NULL"), Some("Null"), Some("(Empty)")] {
            assert_eq!(bucket_clause("STATUS", value, None), "STATUS IS NULL", "{value:?}");
        }
        assert_eq!(bucket_clause("STATUS", Some("0"), None), "STATUS = '0'");
    }

    #[test]
    fn others_bucket_excludes_kept_keys() {
        let siblings = vec![
            bucket("A", Some("A"), 10.0),
            bucket("B", Some("B"), 8.0),
            bucket("(Empty)", None, 3.0),
            bucket("Others", Some(OTHERS_DRILL_KEY), 4.0),
        ];
        assert_eq!(
            bucket_clause("col", Some(OTHERS_DRILL_KEY), Some(&siblings)),
            "col NOT IN ('A','B') AND col IS NOT NULL"
        );
    }

    #[test]
    fn others_bucket_with_empty_complement() {
        let siblings = vec![bucket("Others", Some(OTHERS_DRILL_KEY), 4.0)];
        assert_eq!(
            bucket_clause("col", Some(OTHERS_DRILL_KEY), Some(&siblings)),
            "col IS NOT NULL"
        );
        assert_eq!(
            bucket_clause("col", Some(OTHERS_DRILL_KEY), None),
            "col = 'Others'"
        );
    }

    #[test]
    fn exact_match_doubles_quotes() {
        assert_eq!(
            bucket_clause("NM_PLANO", Some("D'Avila"), None),
            "NM_PLANO = 'D''Avila'"
        );
    }

    #[test]
    fn chart_filters_and_drilldown_quote_numbers_differently() {
        let rule = FilterRule::new("CD_PLANO", Operator::Equals, "0042");
        assert_eq!(generate_sql_from_filters(&[rule]), "CD_PLANO = 0042");
        assert_eq!(drilldown_equality("CD_PLANO", "0042"), "CD_PLANO = '0042'");
    }

    #[test]
    fn renders_each_operator() {
        let cases = [
            (Operator::NotEquals, "ATIVO", "N", "ATIVO != 'N'"),
            (Operator::Contains, "NM", "ana", "NM LIKE '%ana%'"),
            (Operator::StartsWith, "NM", "O'B", "NM LIKE 'O''B%'"),
            (Operator::EndsWith, "NM", "son", "NM LIKE '%son'"),
            (Operator::GreaterThan, "VL", "10.5", "VL > 10.5"),
            (Operator::LessThan, "VL", "3", "VL < 3"),
            (Operator::GreaterOrEqual, "VL", "1", "VL >= 1"),
            (Operator::LessOrEqual, "VL", "2", "VL <= 2"),
            (Operator::Between, "VL", "1, 9", "VL BETWEEN 1 AND 9"),
            (
                Operator::Between,
                "DT",
                "2024-01-01,2024-02-01",
                "DT BETWEEN DATE '2024-01-01' AND DATE '2024-02-01'",
            ),
            (Operator::InList, "UF", "PE, SP", "UF IN ('PE', 'SP')"),
            (Operator::InList, "QT", "1,2", "QT IN (1, 2)"),
            (Operator::After, "DT", "2024-03-05", "DT > DATE '2024-03-05'"),
            (Operator::Before, "DT", "ontem", "DT < 'ontem'"),
        ];
        for (operator, column, value, expected) in cases {
            let rule = FilterRule::new(column, operator, value);
            assert_eq!(filter_fragment(&rule).as_deref(), Some(expected));
        }
    }

    #[test]
    fn skips_incomplete_rules() {
        let rules = vec![
            FilterRule::new("", Operator::Equals, "x"),
            FilterRule::new("UF", Operator::Equals, ""),
            FilterRule::new("VL", Operator::Between, "1"),
            FilterRule::new("UF", Operator::Equals, "PE"),
            FilterRule::new("QT", Operator::GreaterThan, "2"),
        ];
        assert_eq!(generate_sql_from_filters(&rules), "UF = 'PE' AND QT > 2");
        assert_eq!(generate_sql_from_filters(&[]), "");
    }

    #[test]
    fn scope_column_follows_source_naming() {
        let builder = SqlBuilder::default();
        let mut context = DashboardContext::new("TB_CONTRATOS");
        context.scope_selector = "10, 20,abc".into();

        assert_eq!(
            builder.scope_clause("TB_CONTRATOS", &context).as_deref(),
            Some("CD_OPERADORA IN ('10', '20')")
        );
        assert_eq!(
            builder.scope_clause("vw_beneficiarios", &context).as_deref(),
            Some("CD_EMPRESA_PLANO IN ('10', '20')")
        );

        context.sql_mode = true;
        assert_eq!(
            builder.scope_clause("TB_CONTRATOS", &context).as_deref(),
            Some("CD_EMPRESA_PLANO IN ('10', '20')")
        );

        for wildcard in ["%", "todos", "", "abc"] {
            context.scope_selector = wildcard.into();
            assert_eq!(builder.scope_clause("TB_CONTRATOS", &context), None);
        }
    }

    #[test]
    fn drilldown_sql_for_empty_bucket() {
        let builder = SqlBuilder::default();
        let mut context = DashboardContext::new("TB_CHAMADOS");
        context.user_filters = vec![
            FilterRule::new("UF", Operator::Equals, "PE"),
            FilterRule::new("QT_DIAS", Operator::GreaterThan, "5"),
        ];
        context.scope_selector = "7".into();

        let sql = builder.drilldown_sql("TB_CHAMADOS", "STATUS", Some("(Empty)"), None, &context);
        assert_eq!(
            sql,
            "SELECT * FROM TB_CHAMADOS WHERE STATUS IS NULL AND (UF = 'PE' AND QT_DIAS > 5) \
             AND CD_OPERADORA IN ('7')"
        );
    }

    #[test]
    fn drilldown_sql_without_context_clauses() {
        let builder = SqlBuilder::default();
        let context = DashboardContext::new("TB_CHAMADOS");
        assert_eq!(
            builder.drilldown_sql("TB_CHAMADOS", "STATUS", Some("Open"), None, &context),
            "SELECT * FROM TB_CHAMADOS WHERE STATUS = 'Open'"
        );
    }

    #[test]
    fn aggregate_sql_groups_and_ranks() {
        let builder = SqlBuilder::default();
        let mut context = DashboardContext::new("TB_CONTRATOS");
        context.user_filters = vec![FilterRule::new("UF", Operator::Equals, "PE")];
        context.scope_selector = "3".into();
        let mut chart = Chart::new(ChartKind::Pie, "Receita", "NM_PLANO")
            .with_source("TB_CONTRATOS")
            .with_value(Aggregation::Avg, "VL_MENSALIDADE");
        chart.chart_specific_filters = vec![FilterRule::new("ATIVO", Operator::Equals, "S")];

        assert_eq!(
            builder.aggregate_sql(&chart, &context, Some(20)).unwrap(),
            "SELECT NM_PLANO AS NAME, SUM(VL_MENSALIDADE) / COUNT(*) AS VALUE FROM TB_CONTRATOS \
             WHERE (UF = 'PE') AND (ATIVO = 'S') AND CD_OPERADORA IN ('3') \
             GROUP BY NM_PLANO ORDER BY VALUE DESC FETCH FIRST 20 ROWS ONLY"
        );
    }

    #[test]
    fn rows_sql_shares_the_aggregate_where() {
        let builder = SqlBuilder::default();
        let mut context = DashboardContext::new("TB_CONTRATOS");
        context.scope_selector = "3".into();
        let chart = Chart::new(ChartKind::Bar, "Receita", "NM_PLANO");

        assert_eq!(
            builder.rows_sql(&chart, &context).unwrap(),
            "SELECT * FROM TB_CONTRATOS WHERE CD_OPERADORA IN ('3')"
        );
        assert!(builder.rows_sql(&chart, &DashboardContext::new(" ")).is_err());
    }

    #[test]
    fn aggregate_sql_requires_value_column_for_sums() {
        let builder = SqlBuilder::default();
        let context = DashboardContext::new("TB_CONTRATOS");
        let mut chart = Chart::new(ChartKind::Bar, "Total", "UF");
        chart.aggregation = Aggregation::Sum;
        let err = builder.aggregate_sql(&chart, &context, None).unwrap_err();
        assert!(matches!(err, DashboardError::Configuration(_)));

        let kpi = Chart::new(ChartKind::Kpi, "Vidas", "");
        assert_eq!(
            builder.aggregate_sql(&kpi, &context, None).unwrap(),
            "SELECT COUNT(*) AS VALUE FROM TB_CONTRATOS"
        );
    }

    #[test]
    fn local_filters_wrap_base_query() {
        let mut filters = BTreeMap::new();
        filters.insert("NM_BENEFICIARIO".to_string(), "ana".to_string());
        filters.insert("UF".to_string(), "  ".to_string());

        let (rows, count) = drilldown_queries("SELECT * FROM T WHERE A = '1'", &filters);
        assert_eq!(
            rows,
            "SELECT * FROM (SELECT * FROM T WHERE A = '1') MAIN_QUERY \
             WHERE UPPER(TO_CHAR(\"NM_BENEFICIARIO\")) LIKE UPPER('%ana%')"
        );
        assert_eq!(
            count,
            "SELECT COUNT(*) FROM (SELECT * FROM T WHERE A = '1') MAIN_QUERY \
             WHERE UPPER(TO_CHAR(\"NM_BENEFICIARIO\")) LIKE UPPER('%ana%')"
        );

        let (rows, count) = drilldown_queries("SELECT 1 FROM DUAL", &BTreeMap::new());
        assert_eq!(rows, "SELECT 1 FROM DUAL");
        assert_eq!(count, "SELECT COUNT(*) FROM (SELECT 1 FROM DUAL) MAIN_QUERY");
    }
}

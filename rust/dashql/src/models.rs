use crate::{
    catalog::{self, ColumnKind, Operator},
    error::{DashboardError, Result},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Scope selector value meaning "every operator".
pub const SCOPE_WILDCARD: &str = "%";

/// Grouping column assumed for circular charts saved without one.
pub const DEFAULT_GROUPING_COLUMN: &str = "STATUS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub charts: Vec<Chart>,
    pub context: DashboardContext,
}

impl Dashboard {
    pub fn new(name: impl Into<String>, context: DashboardContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            charts: Vec::new(),
            context,
        }
    }

    pub fn chart(&self, id: Uuid) -> Option<&Chart> {
        self.charts.iter().find(|chart| chart.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardContext {
    pub source_table: String,
    #[serde(default)]
    pub user_filters: Vec<FilterRule>,
    #[serde(default = "wildcard_scope")]
    pub scope_selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by_column: Option<String>,
    /// Dashboards built from a raw SQL source rather than a catalog table.
    #[serde(default)]
    pub sql_mode: bool,
}

fn wildcard_scope() -> String {
    SCOPE_WILDCARD.to_string()
}

impl DashboardContext {
    pub fn new(source_table: impl Into<String>) -> Self {
        Self {
            source_table: source_table.into(),
            user_filters: Vec::new(),
            scope_selector: wildcard_scope(),
            group_by_column: None,
            sql_mode: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Kpi,
    Bar,
    StackedBar,
    Line,
    Area,
    Pie,
    Donut,
    Table,
    Treemap,
}

impl ChartKind {
    /// Circular and hierarchical charts get top-N grouping and slice boosting.
    pub fn is_circular(self) -> bool {
        matches!(self, ChartKind::Pie | ChartKind::Donut | ChartKind::Treemap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Count,
    Sum,
    Avg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: ChartKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_column: Option<String>,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub chart_specific_filters: Vec<FilterRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub others_label: Option<String>,
}

impl Chart {
    pub fn new(
        kind: ChartKind,
        title: impl Into<String>,
        category_column: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            title: title.into(),
            category_column: category_column.into(),
            value_column: None,
            aggregation: Aggregation::Count,
            color: String::new(),
            chart_specific_filters: Vec::new(),
            source_table: None,
            group_by: None,
            others_label: None,
        }
    }

    pub fn with_source(mut self, source_table: impl Into<String>) -> Self {
        self.source_table = Some(source_table.into());
        self
    }

    pub fn with_value(mut self, aggregation: Aggregation, value_column: impl Into<String>) -> Self {
        self.aggregation = aggregation;
        self.value_column = Some(value_column.into());
        self
    }

    /// The declared source table, if it is non-blank.
    pub fn source(&self) -> Option<&str> {
        self.source_table
            .as_deref()
            .map(str::trim)
            .filter(|source| !source.is_empty())
    }

    /// Resolves the column a bucket click groups on: the chart's category column, then
    /// its explicit grouping field, then the dashboard's, then the circular-chart default.
    pub fn grouping_column<'a>(&'a self, context: &'a DashboardContext) -> Option<&'a str> {
        let explicit = [
            Some(self.category_column.as_str()),
            self.group_by.as_deref(),
            context.group_by_column.as_deref(),
        ];
        explicit
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|column| !column.is_empty())
            .or_else(|| {
                matches!(self.kind, ChartKind::Pie | ChartKind::Donut)
                    .then_some(DEFAULT_GROUPING_COLUMN)
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterRule {
    pub column: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: String,
}

impl FilterRule {
    pub fn new(column: impl Into<String>, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            operator,
            value: value.into(),
        }
    }

    /// Blank columns or values are ignored when rendering SQL.
    pub fn is_complete(&self) -> bool {
        !self.column.trim().is_empty() && !self.value.is_empty()
    }

    /// Points the rule at another column, resetting the operator to that column's default.
    pub fn retarget(&mut self, column: impl Into<String>, kind: ColumnKind) {
        self.column = column.into();
        self.operator = catalog::operators_for_kind(kind)[0].operator;
        self.value.clear();
    }

    pub fn validate(&self, kind: ColumnKind) -> Result<()> {
        if catalog::operators_for_kind(kind)
            .iter()
            .any(|def| def.operator == self.operator)
        {
            Ok(())
        } else {
            Err(DashboardError::Validation(format!(
                "operator '{}' is not valid for {} column '{}'",
                self.operator.as_str(),
                kind.as_str(),
                self.column
            )))
        }
    }
}

/// Column metadata as reported by the column metadata provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: Option<&str>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.map(str::to_string),
        }
    }
}

/// Result-set column as returned alongside executor rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(rename = "metaData", default)]
    pub columns: Vec<ColumnMeta>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn new(columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|name| ColumnMeta {
                    name: (*name).to_string(),
                    db_type: None,
                })
                .collect(),
            rows,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn first_value(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }

    /// Rows keyed by column name. Cells beyond the column metadata are dropped.
    pub fn to_objects(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(column, cell)| (column.name.clone(), cell.clone()))
                    .collect()
            })
            .collect()
    }
}

/// Reads a cell as a number, accepting numeric strings the way drivers often return them.
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Renders a cell as the text a user would see, `None` for SQL NULL.
pub fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

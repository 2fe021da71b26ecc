//! Comparison operators offered per semantic column type, plus the heuristics that
//! decide which semantic type a column has.

use crate::models::ColumnInfo;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Between,
    InList,
    After,
    Before,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::Contains => "contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::GreaterThan => "greater_than",
            Operator::LessThan => "less_than",
            Operator::GreaterOrEqual => "greater_or_equal",
            Operator::LessOrEqual => "less_or_equal",
            Operator::Between => "between",
            Operator::InList => "in_list",
            Operator::After => "after",
            Operator::Before => "before",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Text,
    Numeric,
    Temporal,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Text => "text",
            ColumnKind::Numeric => "numeric",
            ColumnKind::Temporal => "temporal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OperatorDef {
    pub operator: Operator,
    pub label: &'static str,
}

const fn def(operator: Operator, label: &'static str) -> OperatorDef {
    OperatorDef { operator, label }
}

const NUMERIC_OPERATORS: &[OperatorDef] = &[
    def(Operator::Equals, "Equals"),
    def(Operator::GreaterThan, "Greater than"),
    def(Operator::LessThan, "Less than"),
    def(Operator::GreaterOrEqual, "Greater or equal"),
    def(Operator::LessOrEqual, "Less or equal"),
    def(Operator::Between, "Between"),
    def(Operator::InList, "In list"),
];

const TEMPORAL_OPERATORS: &[OperatorDef] = &[
    def(Operator::Equals, "Equals"),
    def(Operator::After, "After"),
    def(Operator::Before, "Before"),
    def(Operator::Between, "Between dates"),
];

const TEXT_OPERATORS: &[OperatorDef] = &[
    def(Operator::Equals, "Equals"),
    def(Operator::Contains, "Contains"),
    def(Operator::StartsWith, "Starts with"),
    def(Operator::EndsWith, "Ends with"),
    def(Operator::InList, "In list"),
];

const FALLBACK_OPERATORS: &[OperatorDef] = &[
    def(Operator::Equals, "Equals"),
    def(Operator::Contains, "Contains"),
    def(Operator::GreaterThan, "Greater than"),
];

/// Operators for a declared database type name. The first entry is the default.
pub fn operators_for(data_type: Option<&str>) -> &'static [OperatorDef] {
    match data_type.map(str::trim).filter(|t| !t.is_empty()) {
        Some(data_type) => operators_for_kind(classify(data_type)),
        None => FALLBACK_OPERATORS,
    }
}

pub fn operators_for_kind(kind: ColumnKind) -> &'static [OperatorDef] {
    match kind {
        ColumnKind::Numeric => NUMERIC_OPERATORS,
        ColumnKind::Temporal => TEMPORAL_OPERATORS,
        ColumnKind::Text => TEXT_OPERATORS,
    }
}

pub fn default_operator(data_type: Option<&str>) -> Operator {
    operators_for(data_type)[0].operator
}

/// Classifies a database type name by substring, matching vendor spellings such as
/// `NUMBER(10,2)`, `BINARY_FLOAT` or `TIMESTAMP(6) WITH TIME ZONE`.
pub fn classify(data_type: &str) -> ColumnKind {
    let upper = data_type.to_uppercase();
    const NUMERIC: [&str; 5] = ["NUMBER", "NUMERIC", "FLOAT", "INTEGER", "DECIMAL"];
    // Short integer spellings only count as whole tokens so `INTERVAL` or `POINT` stay text.
    const INTEGER_TOKENS: [&str; 4] = ["INT", "SMALLINT", "BIGINT", "TINYINT"];
    const TEMPORAL: [&str; 2] = ["DATE", "TIME"];

    let integer_token = upper
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| INTEGER_TOKENS.contains(&token));
    if integer_token || NUMERIC.iter().any(|needle| upper.contains(needle)) {
        ColumnKind::Numeric
    } else if TEMPORAL.iter().any(|needle| upper.contains(needle)) {
        ColumnKind::Temporal
    } else {
        ColumnKind::Text
    }
}

/// Strategy that decides a column's semantic type. Swap in [`CatalogTypeInference`]
/// when the catalog reports reliable types.
pub trait TypeInference: Send + Sync {
    fn infer(&self, column: &ColumnInfo) -> ColumnKind;
}

/// Trusts the declared catalog type only.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogTypeInference;

impl TypeInference for CatalogTypeInference {
    fn infer(&self, column: &ColumnInfo) -> ColumnKind {
        column
            .data_type
            .as_deref()
            .map(classify)
            .unwrap_or(ColumnKind::Text)
    }
}

/// Naming-convention inference: `CD_`/`ID_` codes are text even when stored as numbers,
/// and untyped or varchar columns are guessed from their prefix or suffix.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrefixTypeInference;

const CODE_PREFIXES: [&str; 2] = ["CD_", "ID_"];
const NUMERIC_PREFIXES: [&str; 4] = ["NU_", "QT_", "VL_", "NR_"];
const TEMPORAL_PREFIXES: [&str; 2] = ["DT_", "DATA_"];
const TEMPORAL_SUFFIXES: [&str; 2] = ["_DT", "_DATA"];

impl TypeInference for PrefixTypeInference {
    fn infer(&self, column: &ColumnInfo) -> ColumnKind {
        let name = column.name.to_uppercase();
        if CODE_PREFIXES.iter().any(|prefix| name.starts_with(prefix)) {
            return ColumnKind::Text;
        }

        let declared = column
            .data_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let generic = declared.map_or(true, |t| t.eq_ignore_ascii_case("VARCHAR2"));
        if generic {
            if NUMERIC_PREFIXES.iter().any(|prefix| name.starts_with(prefix)) {
                return ColumnKind::Numeric;
            }
            if TEMPORAL_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
                || TEMPORAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
            {
                return ColumnKind::Temporal;
            }
        }

        declared.map(classify).unwrap_or(ColumnKind::Text)
    }
}

//! Turns aggregate result rows into presentable series: top-N grouping with an overflow
//! bucket and minimum-slice boosting for circular charts.

use crate::{
    config::EngineConfig,
    error::{DashboardError, Result},
    models::{value_as_f64, value_as_text, Aggregation, Chart, ChartKind, QueryResult},
    sql::{NULL_DISPLAY_LABEL, OTHERS_DRILL_KEY},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Category used by client-side aggregation for rows without a category value.
pub const MISSING_CATEGORY: &str = "N/A";

/// One aggregated row before presentation processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBucket {
    pub name: Option<String>,
    pub value: f64,
}

impl RawBucket {
    pub fn new(name: Option<&str>, value: f64) -> Self {
        Self {
            name: name.map(str::to_string),
            value,
        }
    }

    fn numeric_value(&self) -> f64 {
        if self.value.is_finite() {
            self.value
        } else {
            0.0
        }
    }
}

/// A rendered bucket. `raw_value` is what labels, tooltips and exports show;
/// `visual_value` only sizes the slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateBucket {
    pub name: String,
    pub raw_value: f64,
    pub drill_key: Option<String>,
    pub visual_value: f64,
    pub percent_share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "buckets", rename_all = "snake_case")]
pub enum ChartSeries {
    /// Bar, line and table charts render the input untouched.
    Raw(Vec<RawBucket>),
    Grouped(Vec<AggregateBucket>),
}

impl ChartSeries {
    pub fn len(&self) -> usize {
        match self {
            ChartSeries::Raw(buckets) => buckets.len(),
            ChartSeries::Grouped(buckets) => buckets.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn grouped(&self) -> Option<&[AggregateBucket]> {
        match self {
            ChartSeries::Grouped(buckets) => Some(buckets),
            ChartSeries::Raw(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupingOptions {
    pub top_n: usize,
    pub min_share: f64,
    pub others_label: String,
}

impl Default for GroupingOptions {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for GroupingOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            top_n: config.top_buckets,
            min_share: config.min_slice_share,
            others_label: config.others_label.clone(),
        }
    }
}

impl GroupingOptions {
    /// Applies a chart-level overflow label, if the chart sets one.
    pub fn for_chart(&self, chart: &Chart) -> Self {
        let mut options = self.clone();
        if let Some(label) = chart
            .others_label
            .as_deref()
            .map(str::trim)
            .filter(|label| !label.is_empty())
        {
            options.others_label = label.to_string();
        }
        options
    }
}

fn display_name(name: Option<&str>) -> String {
    match name {
        Some(name) if !name.trim().is_empty() => name.to_string(),
        _ => NULL_DISPLAY_LABEL.to_string(),
    }
}

pub fn prepare_series(
    kind: ChartKind,
    raw: Vec<RawBucket>,
    options: &GroupingOptions,
) -> ChartSeries {
    if !kind.is_circular() {
        return ChartSeries::Raw(raw);
    }
    let grouped = group_and_boost(&raw, options);
    if grouped.is_empty() && !raw.is_empty() {
        return ChartSeries::Raw(raw);
    }
    ChartSeries::Grouped(grouped)
}

/// Sorts descending, keeps `top_n` named buckets, folds the rest into one overflow
/// bucket, then lifts every slice under `min_share` of the total up to that share.
pub fn group_and_boost(raw: &[RawBucket], options: &GroupingOptions) -> Vec<AggregateBucket> {
    let mut sorted: Vec<&RawBucket> = raw.iter().collect();
    sorted.sort_by(|a, b| b.numeric_value().total_cmp(&a.numeric_value()));

    let keep = options.top_n.min(sorted.len());
    let (kept, overflow) = sorted.split_at(keep);

    let mut grouped: Vec<AggregateBucket> = kept
        .iter()
        .map(|bucket| {
            let value = bucket.numeric_value();
            AggregateBucket {
                name: display_name(bucket.name.as_deref()),
                raw_value: value,
                drill_key: bucket.name.clone(),
                visual_value: value,
                percent_share: 0.0,
            }
        })
        .collect();

    let overflow_sum: f64 = overflow.iter().map(|bucket| bucket.numeric_value()).sum();
    if overflow_sum > 0.0 {
        grouped.push(AggregateBucket {
            name: options.others_label.clone(),
            raw_value: overflow_sum,
            drill_key: Some(OTHERS_DRILL_KEY.to_string()),
            visual_value: overflow_sum,
            percent_share: 0.0,
        });
    }

    let total: f64 = grouped.iter().map(|bucket| bucket.raw_value).sum();
    for bucket in &mut grouped {
        let share = if total > 0.0 {
            bucket.raw_value / total
        } else {
            0.0
        };
        bucket.percent_share = share;
        bucket.visual_value = if share > 0.0 && share < options.min_share {
            total * options.min_share
        } else {
            bucket.raw_value
        };
    }
    grouped
}

/// Maps executor rows shaped `(NAME, VALUE)` into raw buckets.
pub fn buckets_from_result(result: &QueryResult) -> Vec<RawBucket> {
    let name_idx = result.column_index("NAME").unwrap_or(0);
    let value_idx = result.column_index("VALUE").unwrap_or(1);
    result
        .rows
        .iter()
        .map(|row| RawBucket {
            name: row.get(name_idx).and_then(value_as_text),
            value: row.get(value_idx).and_then(value_as_f64).unwrap_or(0.0),
        })
        .collect()
}

#[derive(Default)]
struct Accumulator {
    count: u64,
    sum: f64,
}

fn value_column(chart: &Chart) -> Option<&str> {
    chart
        .value_column
        .as_deref()
        .map(str::trim)
        .filter(|column| !column.is_empty())
}

fn numeric_cell(row: &Map<String, Value>, column: Option<&str>) -> f64 {
    column
        .and_then(|column| row.get(column))
        .and_then(value_as_f64)
        .unwrap_or(0.0)
}

/// Client-side aggregation over raw rows: group by the category column, apply the
/// chart's aggregation, rank descending and keep `top_n`.
pub fn aggregate_rows(
    rows: &[Map<String, Value>],
    chart: &Chart,
    top_n: usize,
) -> Result<Vec<RawBucket>> {
    let category = chart.category_column.trim();
    if category.is_empty() {
        return Err(DashboardError::Configuration(format!(
            "chart '{}' has no category column",
            chart.title
        )));
    }
    let measure = value_column(chart);

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Accumulator> = HashMap::new();
    for row in rows {
        let key = row
            .get(category)
            .and_then(value_as_text)
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| MISSING_CATEGORY.to_string());
        let entry = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            Accumulator::default()
        });
        entry.count += 1;
        entry.sum += numeric_cell(row, measure);
    }

    let mut buckets: Vec<RawBucket> = order
        .into_iter()
        .map(|key| {
            let acc = &groups[&key];
            let value = match chart.aggregation {
                Aggregation::Count => acc.count as f64,
                Aggregation::Sum => acc.sum,
                Aggregation::Avg => acc.sum / acc.count as f64,
            };
            RawBucket {
                name: Some(key),
                value,
            }
        })
        .collect();
    buckets.sort_by(|a, b| b.value.total_cmp(&a.value));
    buckets.truncate(top_n);
    Ok(buckets)
}

/// Single headline number for KPI charts.
pub fn kpi_value(rows: &[Map<String, Value>], chart: &Chart) -> f64 {
    let measure = value_column(chart);
    match chart.aggregation {
        Aggregation::Count => rows.len() as f64,
        Aggregation::Sum => rows.iter().map(|row| numeric_cell(row, measure)).sum(),
        Aggregation::Avg => {
            let sum: f64 = rows.iter().map(|row| numeric_cell(row, measure)).sum();
            sum / rows.len().max(1) as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn boosts_small_empty_bucket_without_touching_raw_value() {
        let raw = vec![
            RawBucket::new(Some("Open"), 40.0),
            RawBucket::new(Some("Closed"), 35.0),
            RawBucket::new(None, 5.0),
        ];
        let series = prepare_series(ChartKind::Pie, raw, &GroupingOptions::default());
        let buckets = series.grouped().expect("pie charts are grouped");

        assert_eq!(buckets.len(), 3);
        let empty = &buckets[2];
        assert_eq!(empty.name, "(Empty)");
        assert_eq!(empty.drill_key, None);
        assert_eq!(empty.raw_value, 5.0);
        assert!(approx(empty.percent_share, 0.0625));
        assert!(approx(empty.visual_value, 6.4));

        assert_eq!(buckets[0].visual_value, buckets[0].raw_value);
    }

    #[test]
    fn caps_at_top_n_plus_overflow() {
        let raw: Vec<RawBucket> = (0..1000)
            .map(|i| RawBucket::new(Some(&format!("cat-{i}")), (i + 1) as f64))
            .collect();
        let input_total: f64 = raw.iter().map(|b| b.value).sum();

        let buckets = group_and_boost(&raw, &GroupingOptions::default());
        assert_eq!(buckets.len(), 21);

        let others = buckets.last().unwrap();
        assert_eq!(others.name, "Others");
        assert_eq!(others.drill_key.as_deref(), Some(OTHERS_DRILL_KEY));
        assert_eq!(buckets[0].name, "cat-999");

        let raw_total: f64 = buckets.iter().map(|b| b.raw_value).sum();
        assert!(approx(raw_total, input_total));
        for bucket in &buckets {
            assert!(bucket.visual_value >= bucket.raw_value);
            if bucket.percent_share >= 0.08 {
                assert_eq!(bucket.visual_value, bucket.raw_value);
            }
        }
    }

    #[test]
    fn chart_label_overrides_overflow_name() {
        let raw: Vec<RawBucket> = (0..3)
            .map(|i| RawBucket::new(Some(&format!("k{i}")), 1.0))
            .collect();
        let mut chart = Chart::new(ChartKind::Donut, "t", "c");
        chart.others_label = Some("Outros".into());
        let options = GroupingOptions {
            top_n: 2,
            ..GroupingOptions::default()
        }
        .for_chart(&chart);

        let buckets = group_and_boost(&raw, &options);
        assert_eq!(buckets.last().unwrap().name, "Outros");
        assert_eq!(buckets.last().unwrap().drill_key.as_deref(), Some("Others"));
    }

    #[test]
    fn non_circular_charts_pass_through() {
        let raw = vec![RawBucket::new(Some("b"), 1.0), RawBucket::new(Some("a"), 9.0)];
        let series = prepare_series(ChartKind::Bar, raw.clone(), &GroupingOptions::default());
        assert_eq!(series, ChartSeries::Raw(raw));
    }

    #[test]
    fn zero_totals_are_not_boosted() {
        let raw = vec![RawBucket::new(Some("a"), 0.0), RawBucket::new(Some(" "), 0.0)];
        let buckets = group_and_boost(&raw, &GroupingOptions::default());
        assert_eq!(buckets.len(), 2);
        assert!(buckets.iter().all(|b| b.visual_value == 0.0));
        assert_eq!(buckets[1].name, "(Empty)");
        assert_eq!(buckets[1].drill_key.as_deref(), Some(" "));
    }

    #[test]
    fn maps_name_value_rows() {
        let result = QueryResult::new(
            &["NAME", "VALUE"],
            vec![vec![json!("Open"), json!("12")], vec![Value::Null, json!(3)]],
        );
        assert_eq!(
            buckets_from_result(&result),
            vec![RawBucket::new(Some("Open"), 12.0), RawBucket::new(None, 3.0)]
        );
    }

    #[test]
    fn aggregates_rows_client_side() {
        let rows: Vec<Map<String, Value>> = [
            json!({"UF": "PE", "VL": 10}),
            json!({"UF": "PE", "VL": "20"}),
            json!({"UF": "SP", "VL": 90}),
            json!({"UF": null, "VL": 1}),
        ]
        .into_iter()
        .map(|row| row.as_object().cloned().unwrap())
        .collect();

        let chart = Chart::new(ChartKind::Bar, "UF", "UF").with_value(Aggregation::Avg, "VL");
        let buckets = aggregate_rows(&rows, &chart, 20).unwrap();
        assert_eq!(
            buckets,
            vec![
                RawBucket::new(Some("SP"), 90.0),
                RawBucket::new(Some("PE"), 15.0),
                RawBucket::new(Some(MISSING_CATEGORY), 1.0),
            ]
        );

        let count = Chart::new(ChartKind::Bar, "UF", "UF");
        let top = aggregate_rows(&rows, &count, 1).unwrap();
        assert_eq!(top, vec![RawBucket::new(Some("PE"), 2.0)]);

        let kpi = Chart::new(ChartKind::Kpi, "Total", "").with_value(Aggregation::Sum, "VL");
        assert_eq!(kpi_value(&rows, &kpi), 121.0);
    }
}

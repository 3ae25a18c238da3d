use std::collections::HashMap;

use anyhow::{Result, anyhow, bail};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    data::{Value, format_number},
    dataset::{Column, Dataset},
    expr,
    filter::{self, FilterCondition},
    months::{Month, month_of},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFn {
    Sum,
    Mean,
    Count,
    Min,
    Max,
}

impl AggregateFn {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFn::Sum => "sum",
            AggregateFn::Mean => "mean",
            AggregateFn::Count => "count",
            AggregateFn::Min => "min",
            AggregateFn::Max => "max",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Grouping {
    /// One output row per distinct value of `column`, first-encounter order.
    Column { column: String },
    /// One output row per calendar month of the date `column`, ascending.
    Month { column: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryPlan {
    pub aggregate: AggregateFn,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<Grouping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<String>,
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_expr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortOrder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    All,
    Label(String),
    Month(Month),
}

impl GroupKey {
    fn render(&self) -> String {
        match self {
            GroupKey::All => "all".to_string(),
            GroupKey::Label(label) => label.clone(),
            GroupKey::Month(month) => month.label(),
        }
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    rows: usize,
    values: usize,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Accumulator {
    fn add(&mut self, amount: Option<f64>) {
        self.rows += 1;
        if let Some(amount) = amount {
            self.values += 1;
            self.sum += amount;
            self.min = Some(self.min.map_or(amount, |current| current.min(amount)));
            self.max = Some(self.max.map_or(amount, |current| current.max(amount)));
        }
    }

    fn result(&self, aggregate: AggregateFn) -> Option<f64> {
        match aggregate {
            AggregateFn::Sum => Some(self.sum),
            AggregateFn::Count => Some(self.rows as f64),
            AggregateFn::Mean => (self.values > 0).then(|| self.sum / self.values as f64),
            AggregateFn::Min => self.min,
            AggregateFn::Max => self.max,
        }
    }
}

impl QueryPlan {
    /// Checks column references against `dataset` before any row is read.
    pub fn validate(&self, dataset: &Dataset) -> Result<Vec<FilterCondition>> {
        match (&self.measure, self.aggregate) {
            (None, AggregateFn::Count) => {}
            (None, other) => bail!("Aggregate '{}' requires a measure column", other.as_str()),
            (Some(name), _) => {
                let column = require_column(dataset, name)?;
                if !column.datatype.is_numeric() {
                    bail!(
                        "Measure column '{}' is {} and cannot be aggregated",
                        name,
                        column.datatype
                    );
                }
            }
        }
        if let Some(Grouping::Column { column } | Grouping::Month { column }) = &self.group_by {
            require_column(dataset, column)?;
        }
        let conditions = filter::parse_filters(&self.filters)?;
        for condition in &conditions {
            require_column(dataset, &condition.column)?;
        }
        Ok(conditions)
    }

    pub fn value_header(&self) -> String {
        match &self.measure {
            Some(measure) => format!("{}({})", self.aggregate.as_str(), measure),
            None => self.aggregate.as_str().to_string(),
        }
    }
}

fn require_column<'a>(dataset: &'a Dataset, name: &str) -> Result<&'a Column> {
    dataset
        .column(name)
        .ok_or_else(|| anyhow!("Column '{name}' not found in dataset"))
}

pub fn execute(plan: &QueryPlan, dataset: &Dataset) -> Result<QueryResult> {
    let conditions = plan.validate(dataset)?;
    let measure = plan
        .measure
        .as_deref()
        .map(|name| require_column(dataset, name))
        .transpose()?;

    let mut order: Vec<GroupKey> = Vec::new();
    let mut accumulators: HashMap<GroupKey, Accumulator> = HashMap::new();
    let mut matched = 0usize;

    for row in 0..dataset.row_count() {
        if !filter::evaluate_conditions(&conditions, dataset, row)? {
            continue;
        }
        if let Some(expression) = &plan.where_expr {
            let context = expr::build_context(dataset, row)?;
            if !expr::evaluate_expression_to_bool(expression, &context)? {
                continue;
            }
        }
        let Some(key) = group_key(plan.group_by.as_ref(), dataset, row)? else {
            continue;
        };
        matched += 1;
        let amount = measure.and_then(|column| column.get(row)).and_then(Value::as_f64);
        if !accumulators.contains_key(&key) {
            order.push(key.clone());
        }
        accumulators.entry(key).or_default().add(amount);
    }
    debug!("Query plan matched {matched} row(s) in {} group(s)", order.len());

    if order.is_empty() && plan.group_by.is_none() {
        order.push(GroupKey::All);
        accumulators.insert(GroupKey::All, Accumulator::default());
    }

    let mut results = order
        .into_iter()
        .map(|key| {
            let value = accumulators
                .get(&key)
                .and_then(|acc| acc.result(plan.aggregate));
            (key, value)
        })
        .collect::<Vec<_>>();

    if matches!(plan.group_by, Some(Grouping::Month { .. })) {
        results.sort_by(|a, b| match (&a.0, &b.0) {
            (GroupKey::Month(left), GroupKey::Month(right)) => left.cmp(right),
            _ => std::cmp::Ordering::Equal,
        });
    }
    if let Some(order) = plan.sort {
        results.sort_by(|a, b| {
            let left = a.1.unwrap_or(f64::NEG_INFINITY);
            let right = b.1.unwrap_or(f64::NEG_INFINITY);
            match order {
                SortOrder::Asc => left.total_cmp(&right),
                SortOrder::Desc => right.total_cmp(&left),
            }
        });
    }
    if let Some(limit) = plan.limit {
        results.truncate(limit);
    }

    let mut headers = Vec::with_capacity(2);
    match &plan.group_by {
        Some(Grouping::Column { column }) => headers.push(column.clone()),
        Some(Grouping::Month { .. }) => headers.push("Month".to_string()),
        None => headers.push("scope".to_string()),
    }
    headers.push(plan.value_header());

    let rows = results
        .into_iter()
        .map(|(key, value)| {
            vec![
                key.render(),
                value.map(format_number).unwrap_or_default(),
            ]
        })
        .collect();
    Ok(QueryResult { headers, rows })
}

fn group_key(grouping: Option<&Grouping>, dataset: &Dataset, row: usize) -> Result<Option<GroupKey>> {
    Ok(match grouping {
        None => Some(GroupKey::All),
        Some(Grouping::Column { column }) => require_column(dataset, column)?
            .get(row)
            .map(|value| GroupKey::Label(value.as_display())),
        Some(Grouping::Month { column }) => require_column(dataset, column)?
            .get(row)
            .and_then(month_of)
            .map(GroupKey::Month),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::RawCell;

    fn dataset() -> Dataset {
        let rows = [
            ("2024-01-05", "Travel", "100"),
            ("2024-01-20", "Meals", "50"),
            ("2024-02-01", "Travel", "30"),
            ("", "Travel", "999"),
            ("2023-12-24", "Gifts", ""),
        ];
        let mut headers = Vec::new();
        for name in ["Date", "Category", "Amount"] {
            headers.push(name.to_string());
        }
        let body = rows
            .iter()
            .map(|(date, category, amount)| {
                vec![
                    RawCell::from(*date),
                    RawCell::from(*category),
                    RawCell::from(*amount),
                ]
            })
            .collect();
        Dataset::from_rows(headers, body).unwrap()
    }

    fn plan(json: &str) -> QueryPlan {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn sums_by_column_in_first_encounter_order() {
        let result = execute(
            &plan(r#"{"aggregate":"sum","measure":"Amount","group_by":{"kind":"column","column":"Category"}}"#),
            &dataset(),
        )
        .unwrap();
        assert_eq!(result.headers, vec!["Category", "sum(Amount)"]);
        assert_eq!(
            result.rows,
            vec![
                vec!["Travel".to_string(), "1129".to_string()],
                vec!["Meals".to_string(), "50".to_string()],
                vec!["Gifts".to_string(), "0".to_string()],
            ]
        );
    }

    #[test]
    fn month_grouping_is_calendar_ordered_and_skips_undated_rows() {
        let result = execute(
            &plan(r#"{"aggregate":"count","group_by":{"kind":"month","column":"Date"}}"#),
            &dataset(),
        )
        .unwrap();
        assert_eq!(result.headers, vec!["Month", "count"]);
        let months = result.rows.iter().map(|row| row[0].as_str()).collect::<Vec<_>>();
        assert_eq!(months, vec!["2023-12", "2024-01", "2024-02"]);
        assert_eq!(result.rows[1][1], "2");
    }

    #[test]
    fn filters_where_sort_and_limit_compose() {
        let result = execute(
            &plan(
                r#"{
                    "aggregate": "max",
                    "measure": "Amount",
                    "group_by": {"kind": "column", "column": "Category"},
                    "filters": ["Amount < 500"],
                    "where": "year_of(date) == 2024",
                    "sort": "desc",
                    "limit": 1
                }"#,
            ),
            &dataset(),
        )
        .unwrap();
        assert_eq!(result.rows, vec![vec!["Travel".to_string(), "100".to_string()]]);
    }

    #[test]
    fn ungrouped_mean_over_no_rows_is_blank() {
        let result = execute(
            &plan(r#"{"aggregate":"mean","measure":"Amount","filters":["Category = Nothing"]}"#),
            &dataset(),
        )
        .unwrap();
        assert_eq!(result.rows, vec![vec!["all".to_string(), String::new()]]);
    }

    #[test]
    fn validation_rejects_bad_references() {
        let dataset = dataset();
        let missing_measure = plan(r#"{"aggregate":"sum"}"#);
        assert!(execute(&missing_measure, &dataset).is_err());

        let text_measure = plan(r#"{"aggregate":"sum","measure":"Category"}"#);
        let err = execute(&text_measure, &dataset).unwrap_err();
        assert!(err.to_string().contains("cannot be aggregated"));

        let unknown_group =
            plan(r#"{"aggregate":"count","group_by":{"kind":"column","column":"Vendor"}}"#);
        assert!(execute(&unknown_group, &dataset).is_err());

        let unknown_filter = plan(r#"{"aggregate":"count","filters":["Vendor = x"]}"#);
        assert!(execute(&unknown_filter, &dataset).is_err());
    }

    #[test]
    fn unknown_plan_fields_are_rejected() {
        let parsed = serde_json::from_str::<QueryPlan>(r#"{"aggregate":"sum","code":"import os"}"#);
        assert!(parsed.is_err());
    }
}

use std::collections::{BTreeMap, HashMap};

use clap::ValueEnum;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    dataset::{Column, Dataset},
    error::PipelineError,
    filter::FilteredView,
    months::{Month, MonthBuckets},
};

pub const TOP_GROUPS_LIMIT: usize = 10;

/// How rows without a usable month count toward `total` and the top groups.
/// They never appear in the monthly series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum UndatedRows {
    /// Skip undated rows everywhere, so the monthly series sums to `total`.
    #[default]
    Exclude,
    /// Count undated rows in `total` and the top groups.
    Include,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyTotal {
    pub month: Month,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupTotal {
    pub group: String,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregates {
    pub total: f64,
    pub monthly: Vec<MonthlyTotal>,
    pub top_groups: Vec<GroupTotal>,
}

impl Aggregates {
    pub fn monthly_sum(&self) -> f64 {
        self.monthly.iter().map(|entry| entry.total).sum()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AggregateRequest<'a> {
    pub measure_column: &'a str,
    pub group_column: &'a str,
    pub undated: UndatedRows,
}

pub fn aggregate(
    dataset: &Dataset,
    view: &FilteredView,
    buckets: &MonthBuckets,
    request: &AggregateRequest<'_>,
) -> Result<Aggregates, PipelineError> {
    let measure = lookup(dataset, request.measure_column)?;
    let group = lookup(dataset, request.group_column)?;

    let mut total = 0.0;
    let mut monthly: BTreeMap<Month, f64> = BTreeMap::new();
    let mut groups: Vec<GroupTotal> = Vec::new();
    let mut group_positions: HashMap<String, usize> = HashMap::new();
    let mut skipped = 0usize;

    for &row in view.rows() {
        let month = buckets.get(row);
        if month.is_none() && request.undated == UndatedRows::Exclude {
            skipped += 1;
            continue;
        }
        let amount = measure_amount(measure, row);
        total += amount;
        if let Some(month) = month {
            *monthly.entry(month).or_insert(0.0) += amount;
        }
        if let Some(value) = group.get(row) {
            let key = value.as_display();
            match group_positions.get(&key) {
                Some(&position) => groups[position].total += amount,
                None => {
                    group_positions.insert(key.clone(), groups.len());
                    groups.push(GroupTotal {
                        group: key,
                        total: amount,
                    });
                }
            }
        }
    }

    // stable sort: equal totals stay in first-encounter order
    groups.sort_by(|a, b| b.total.total_cmp(&a.total));
    groups.truncate(TOP_GROUPS_LIMIT);

    if skipped > 0 {
        debug!("Skipped {skipped} undated row(s) while aggregating");
    }

    Ok(Aggregates {
        total,
        monthly: monthly
            .into_iter()
            .map(|(month, total)| MonthlyTotal { month, total })
            .collect(),
        top_groups: groups,
    })
}

fn lookup<'a>(dataset: &'a Dataset, name: &str) -> Result<&'a Column, PipelineError> {
    dataset
        .column(name)
        .ok_or_else(|| PipelineError::UnknownColumn(name.to_string()))
}

/// Missing and non-numeric cells contribute zero.
fn measure_amount(column: &Column, row: usize) -> f64 {
    column.get(row).and_then(|value| value.as_f64()).unwrap_or(0.0)
}

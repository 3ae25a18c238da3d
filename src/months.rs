use std::{collections::HashSet, fmt, str::FromStr};

use anyhow::{Result, anyhow};
use chrono::{Datelike, NaiveDateTime};
use log::debug;
use serde::{Serialize, Serializer};

use crate::{
    data::{Value, parse_temporal},
    dataset::Dataset,
    error::PipelineError,
};

/// A year-month bucket. Ordering is calendar order and matches the ordering of
/// the `YYYY-MM` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    year: i32,
    month: u32,
}

impl Month {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn of(datetime: &NaiveDateTime) -> Self {
        Self {
            year: datetime.year(),
            month: datetime.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Month {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let (year, month) = trimmed
            .split_once('-')
            .ok_or_else(|| anyhow!("Month '{trimmed}' must look like YYYY-MM"))?;
        let year = year
            .parse::<i32>()
            .map_err(|_| anyhow!("Invalid year in month '{trimmed}'"))?;
        let month = month
            .parse::<u32>()
            .map_err(|_| anyhow!("Invalid month in '{trimmed}'"))?;
        Month::new(year, month).ok_or_else(|| anyhow!("Month '{trimmed}' is out of range"))
    }
}

impl Serialize for Month {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Month of a single cell. Numbers are never read as dates; text that does not
/// parse is simply missing.
pub fn month_of(value: &Value) -> Option<Month> {
    match value {
        Value::Temporal(dt) => Some(Month::of(dt)),
        Value::Text(text) => parse_temporal(text).map(|dt| Month::of(&dt)),
        Value::Integer(_) | Value::Real(_) => None,
    }
}

/// One optional month per dataset row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthBuckets {
    buckets: Vec<Option<Month>>,
}

impl MonthBuckets {
    pub fn get(&self, row: usize) -> Option<Month> {
        self.buckets.get(row).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Rows whose date was missing or did not parse.
    pub fn undated_count(&self) -> usize {
        self.buckets.iter().filter(|bucket| bucket.is_none()).count()
    }

    pub fn distinct_months(&self) -> usize {
        self.buckets.iter().flatten().collect::<HashSet<_>>().len()
    }
}

impl FromIterator<Option<Month>> for MonthBuckets {
    fn from_iter<I: IntoIterator<Item = Option<Month>>>(iter: I) -> Self {
        Self {
            buckets: iter.into_iter().collect(),
        }
    }
}

pub fn bucket_column(dataset: &Dataset, date_column: &str) -> Result<MonthBuckets, PipelineError> {
    let column = dataset
        .column(date_column)
        .ok_or_else(|| PipelineError::UnknownColumn(date_column.to_string()))?;
    let buckets = column
        .cells
        .iter()
        .map(|cell| cell.as_ref().and_then(month_of))
        .collect::<MonthBuckets>();
    debug!(
        "Bucketed '{}' into {} month(s); {} row(s) without a usable date",
        date_column,
        buckets.distinct_months(),
        buckets.undated_count()
    );
    Ok(buckets)
}

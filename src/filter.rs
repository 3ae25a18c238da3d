use std::collections::HashSet;

use anyhow::{Result, anyhow};
use log::{debug, warn};

use crate::{
    data::{ColumnType, Value, compare_values, parse_typed_value},
    dataset::Dataset,
    error::PipelineError,
};

/// Row indices retained from a [`Dataset`], in dataset order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredView {
    rows: Vec<usize>,
}

impl FilteredView {
    /// Every row of the dataset.
    pub fn unfiltered(dataset: &Dataset) -> Self {
        Self {
            rows: (0..dataset.row_count()).collect(),
        }
    }

    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Distinct non-missing display values of `column`, in first-encounter order.
pub fn distinct_group_values(dataset: &Dataset, column: &str) -> Result<Vec<String>, PipelineError> {
    let column = dataset
        .column(column)
        .ok_or_else(|| PipelineError::UnknownColumn(column.to_string()))?;
    let mut seen = HashSet::new();
    Ok(column
        .cells
        .iter()
        .flatten()
        .map(Value::as_display)
        .filter(|value| seen.insert(value.clone()))
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupFilter {
    column: String,
    allowed: HashSet<String>,
}

impl GroupFilter {
    /// Allows every value present in the column, i.e. no narrowing.
    pub fn all(dataset: &Dataset, column: &str) -> Result<Self, PipelineError> {
        let allowed = distinct_group_values(dataset, column)?.into_iter().collect();
        Ok(Self {
            column: column.to_string(),
            allowed,
        })
    }

    pub fn only<I, S>(column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            column: column.to_string(),
            allowed: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, value: &str) -> bool {
        self.allowed.contains(value)
    }

    /// Rows whose group value is allowed. Missing group values never match.
    pub fn apply(&self, dataset: &Dataset) -> Result<FilteredView, PipelineError> {
        let column = dataset
            .column(&self.column)
            .ok_or_else(|| PipelineError::UnknownColumn(self.column.clone()))?;
        let present = column
            .cells
            .iter()
            .flatten()
            .map(Value::as_display)
            .collect::<HashSet<_>>();
        for value in self.allowed.iter().filter(|value| !present.contains(*value)) {
            warn!("'{}' never contains '{}'; ignoring it", self.column, value);
        }
        let rows = column
            .cells
            .iter()
            .enumerate()
            .filter_map(|(row, cell)| {
                cell.as_ref()
                    .filter(|value| self.allows(&value.as_display()))
                    .map(|_| row)
            })
            .collect::<Vec<_>>();
        debug!(
            "Group filter on '{}' kept {} of {} row(s)",
            self.column,
            rows.len(),
            dataset.row_count()
        );
        Ok(FilteredView { rows })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Eq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCondition {
    pub column: String,
    pub operator: ComparisonOperator,
    pub raw_value: String,
}

pub fn parse_filters(filters: &[String]) -> Result<Vec<FilterCondition>> {
    filters.iter().map(|f| parse_filter(f)).collect()
}

pub fn parse_filter(filter: &str) -> Result<FilterCondition> {
    let trimmed = filter.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("Empty filter expression"));
    }

    let lowered = trimmed.to_ascii_lowercase();
    for (needle, op) in [
        (" contains ", ComparisonOperator::Contains),
        (" startswith ", ComparisonOperator::StartsWith),
        (" endswith ", ComparisonOperator::EndsWith),
    ] {
        if let Some(idx) = lowered.find(needle) {
            let (left, right_with_space) = trimmed.split_at(idx);
            let right = right_with_space[needle.len()..].trim();
            return Ok(FilterCondition {
                column: left.trim().to_string(),
                operator: op,
                raw_value: unquote(right).to_string(),
            });
        }
    }

    for needle in ["!=", ">=", "<=", "=", ">", "<"] {
        if let Some(idx) = trimmed.find(needle) {
            let op = match needle {
                "=" => ComparisonOperator::Eq,
                "!=" => ComparisonOperator::NotEq,
                ">" => ComparisonOperator::Gt,
                ">=" => ComparisonOperator::Ge,
                "<" => ComparisonOperator::Lt,
                "<=" => ComparisonOperator::Le,
                _ => unreachable!(),
            };
            let left = trimmed[..idx].trim();
            let right = trimmed[idx + needle.len()..].trim();
            if left.is_empty() {
                return Err(anyhow!("Filter '{trimmed}' is missing a column name"));
            }
            return Ok(FilterCondition {
                column: left.to_string(),
                operator: op,
                raw_value: unquote(right).to_string(),
            });
        }
    }

    Err(anyhow!("Failed to parse filter expression '{trimmed}'"))
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 {
        let bytes = value.as_bytes();
        if (bytes[0] == b'"' && bytes[value.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[value.len() - 1] == b'\'')
        {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// True when `row` satisfies every condition.
pub fn evaluate_conditions(
    conditions: &[FilterCondition],
    dataset: &Dataset,
    row: usize,
) -> Result<bool> {
    for condition in conditions {
        let column = dataset
            .column(&condition.column)
            .ok_or_else(|| anyhow!("Column '{}' not found for filter", condition.column))?;
        if !evaluate_condition(condition, column.datatype, column.get(row))? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn evaluate_condition(
    condition: &FilterCondition,
    column_type: ColumnType,
    value: Option<&Value>,
) -> Result<bool> {
    use ComparisonOperator::*;
    match condition.operator {
        Contains | StartsWith | EndsWith => {
            let haystack = value.map(Value::as_display).unwrap_or_default().to_lowercase();
            let needle = condition.raw_value.to_lowercase();
            Ok(match condition.operator {
                Contains => haystack.contains(&needle),
                StartsWith => haystack.starts_with(&needle),
                _ => haystack.ends_with(&needle),
            })
        }
        Eq | NotEq | Gt | Ge | Lt | Le => {
            let rhs = parse_typed_value(&condition.raw_value, column_type)?;
            match (value, rhs) {
                (Some(left), Some(right)) => {
                    let ordering = compare_values(left, &right).ok_or_else(|| {
                        anyhow!(
                            "Cannot compare '{}' with '{}' in column '{}'",
                            left,
                            right,
                            condition.column
                        )
                    })?;
                    Ok(match condition.operator {
                        Eq => ordering.is_eq(),
                        NotEq => ordering.is_ne(),
                        Gt => ordering.is_gt(),
                        Ge => ordering.is_ge(),
                        Lt => ordering.is_lt(),
                        _ => ordering.is_le(),
                    })
                }
                (None, None) => Ok(matches!(condition.operator, Eq | Ge | Le)),
                (None, Some(_)) | (Some(_), None) => Ok(matches!(condition.operator, NotEq)),
            }
        }
    }
}

use std::collections::HashSet;

use anyhow::{Result, bail};
use chrono::NaiveDateTime;

use crate::data::{ColumnType, Numeric, Value, format_number, parse_numeric_token, parse_temporal};

/// A cell as delivered by an ingestion source, before type inference.
#[derive(Debug, Clone, PartialEq)]
pub enum RawCell {
    Empty,
    /// Delimited-file field; numbers and dates are recognised from the text.
    Text(String),
    /// Native workbook string; stays text even when it looks numeric.
    String(String),
    Integer(i64),
    Number(f64),
    Bool(bool),
    Temporal(NaiveDateTime),
}

impl RawCell {
    fn into_text(self) -> String {
        match self {
            RawCell::Empty => String::new(),
            RawCell::Text(s) | RawCell::String(s) => s.trim().to_string(),
            RawCell::Integer(i) => i.to_string(),
            RawCell::Number(f) => format_number(f),
            RawCell::Bool(b) => b.to_string(),
            RawCell::Temporal(dt) => Value::Temporal(dt).as_display(),
        }
    }
}

impl From<&str> for RawCell {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            RawCell::Empty
        } else {
            RawCell::Text(value.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Observation {
    Missing,
    Integer(i64),
    Real(f64),
    Temporal(NaiveDateTime),
    Text,
}

fn observe(cell: &RawCell) -> Observation {
    match cell {
        RawCell::Empty => Observation::Missing,
        RawCell::Integer(i) => Observation::Integer(*i),
        RawCell::Number(f) if f.is_finite() => Observation::Real(*f),
        RawCell::Number(_) => Observation::Missing,
        RawCell::Bool(_) => Observation::Text,
        RawCell::Temporal(dt) => Observation::Temporal(*dt),
        RawCell::String(s) => {
            if is_missing_token(s.trim()) {
                Observation::Missing
            } else {
                Observation::Text
            }
        }
        RawCell::Text(s) => {
            let trimmed = s.trim();
            if is_missing_token(trimmed) {
                Observation::Missing
            } else if let Some(numeric) = parse_numeric_token(trimmed) {
                match numeric {
                    Numeric::Integer(i) => Observation::Integer(i),
                    Numeric::Real(f) => Observation::Real(f),
                }
            } else if let Some(dt) = parse_temporal(trimmed) {
                Observation::Temporal(dt)
            } else {
                Observation::Text
            }
        }
    }
}

fn is_missing_token(trimmed: &str) -> bool {
    trimmed.is_empty() || is_placeholder_token(&trimmed.to_ascii_lowercase())
}

fn is_placeholder_token(lowered: &str) -> bool {
    let stripped = lowered.trim_start_matches('#');
    matches!(
        stripped,
        "na" | "n/a" | "n.a." | "nan" | "null" | "none" | "missing" | "-"
    )
}

#[derive(Debug, Default)]
struct TypeCandidate {
    non_empty: usize,
    integer_matches: usize,
    real_matches: usize,
    temporal_matches: usize,
}

impl TypeCandidate {
    fn update(&mut self, observation: &Observation) {
        match observation {
            Observation::Missing => return,
            Observation::Integer(_) => self.integer_matches += 1,
            Observation::Real(_) => self.real_matches += 1,
            Observation::Temporal(_) => self.temporal_matches += 1,
            Observation::Text => {}
        }
        self.non_empty += 1;
    }

    fn decide(&self) -> ColumnType {
        if self.non_empty == 0 {
            ColumnType::Text
        } else if self.integer_matches == self.non_empty {
            ColumnType::Integer
        } else if self.integer_matches + self.real_matches == self.non_empty {
            ColumnType::Real
        } else if self.temporal_matches == self.non_empty {
            ColumnType::Temporal
        } else {
            ColumnType::Text
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub datatype: ColumnType,
    pub cells: Vec<Option<Value>>,
}

impl Column {
    /// Infers the column type from `raw` and converts every cell to it.
    pub fn infer(name: impl Into<String>, raw: Vec<RawCell>) -> Self {
        let observations = raw.iter().map(observe).collect::<Vec<_>>();
        let mut candidate = TypeCandidate::default();
        for observation in &observations {
            candidate.update(observation);
        }
        let datatype = candidate.decide();
        let cells = raw
            .into_iter()
            .zip(observations)
            .map(|(cell, observation)| convert(cell, observation, datatype))
            .collect();
        Self {
            name: name.into(),
            datatype,
            cells,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, row: usize) -> Option<&Value> {
        self.cells.get(row).and_then(Option::as_ref)
    }

    pub fn distinct_count(&self) -> usize {
        self.cells
            .iter()
            .flatten()
            .map(Value::distinct_key)
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn missing_count(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_none()).count()
    }
}

fn convert(cell: RawCell, observation: Observation, datatype: ColumnType) -> Option<Value> {
    match (datatype, observation) {
        (_, Observation::Missing) => None,
        (ColumnType::Integer, Observation::Integer(i)) => Some(Value::Integer(i)),
        (ColumnType::Real, Observation::Integer(i)) => Some(Value::Real(i as f64)),
        (ColumnType::Real, Observation::Real(f)) => Some(Value::Real(f)),
        (ColumnType::Temporal, Observation::Temporal(dt)) => Some(Value::Temporal(dt)),
        _ => Some(Value::Text(cell.into_text())),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    columns: Vec<Column>,
    row_count: usize,
}

impl Dataset {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let row_count = columns.first().map(Column::len).unwrap_or(0);
        for column in &columns {
            if column.len() != row_count {
                bail!(
                    "Column '{}' has {} row(s) but expected {}",
                    column.name,
                    column.len(),
                    row_count
                );
            }
        }
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                bail!("Duplicate column name '{}'", column.name);
            }
        }
        Ok(Self { columns, row_count })
    }

    /// Builds a dataset from a header row and row-major raw cells. Short rows
    /// are padded with missing cells; duplicate or blank headers are renamed.
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<RawCell>>) -> Result<Self> {
        let headers = dedupe_headers(headers);
        let mut columns = headers
            .iter()
            .map(|_| Vec::with_capacity(rows.len()))
            .collect::<Vec<Vec<RawCell>>>();
        for (row_idx, row) in rows.into_iter().enumerate() {
            if row.len() > headers.len() {
                bail!(
                    "Row {} has {} field(s) but the header defines {}",
                    row_idx + 2,
                    row.len(),
                    headers.len()
                );
            }
            let mut cells = row.into_iter();
            for column in columns.iter_mut() {
                column.push(cells.next().unwrap_or(RawCell::Empty));
            }
        }
        let columns = headers
            .into_iter()
            .zip(columns)
            .map(|(name, raw)| Column::infer(name, raw))
            .collect();
        Self::new(columns)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.column_index(name).map(|idx| &self.columns[idx])
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Renders the first `limit` rows as display strings, missing cells blank.
    pub fn head(&self, limit: usize) -> Vec<Vec<String>> {
        (0..self.row_count.min(limit))
            .map(|row| {
                self.columns
                    .iter()
                    .map(|column| column.get(row).map(Value::as_display).unwrap_or_default())
                    .collect()
            })
            .collect()
    }
}

fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    headers
        .into_iter()
        .enumerate()
        .map(|(idx, header)| {
            let trimmed = header.trim();
            let base = if trimmed.is_empty() {
                format!("Unnamed: {idx}")
            } else {
                trimmed.to_string()
            };
            let mut candidate = base.clone();
            let mut suffix = 1;
            while seen.contains(&candidate) {
                candidate = format!("{base}.{suffix}");
                suffix += 1;
            }
            seen.insert(candidate.clone());
            candidate
        })
        .collect()
}

use std::{cmp::Ordering, fmt};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Temporal,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Real => "real",
            ColumnType::Temporal => "temporal",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Real)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Real(f64),
    Temporal(NaiveDateTime),
    Text(String),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Real(f) => format_number(*f),
            Value::Temporal(dt) => {
                if dt.time() == NaiveTime::MIN {
                    dt.format("%Y-%m-%d").to_string()
                } else {
                    dt.format("%Y-%m-%d %H:%M:%S").to_string()
                }
            }
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(f) => Some(*f),
            _ => None,
        }
    }

    /// Hashable identity used for distinct counts. Integers and reals that
    /// compare equal share a key.
    pub fn distinct_key(&self) -> DistinctKey {
        match self {
            Value::Text(s) => DistinctKey::Text(s.clone()),
            Value::Integer(i) => DistinctKey::Number(number_bits(*i as f64)),
            Value::Real(f) => DistinctKey::Number(number_bits(*f)),
            Value::Temporal(dt) => DistinctKey::Temporal(*dt),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DistinctKey {
    Text(String),
    Number(u64),
    Temporal(NaiveDateTime),
}

fn number_bits(value: f64) -> u64 {
    // -0.0 and 0.0 are the same value for counting purposes
    if value == 0.0 {
        0.0f64.to_bits()
    } else {
        value.to_bits()
    }
}

/// Orders two values of compatible kinds. Integers and reals compare
/// numerically; any other cross-kind pairing has no order.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Temporal(a), Value::Temporal(b)) => Some(a.cmp(b)),
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => Some(a.total_cmp(&b)),
            _ => None,
        },
    }
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &[
        "%Y-%m-%d",
        "%Y/%m/%d",
        "%m/%d/%Y",
        "%d/%m/%Y",
        "%m-%d-%Y",
        "%d-%m-%Y",
        "%d.%m.%Y",
        "%d %b %Y",
        "%b %d, %Y",
    ];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%m/%d/%Y %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.naive_local());
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

/// Best-effort temporal parse of a text token: datetimes, dates, and bare
/// `YYYY-MM` months (pinned to the first of the month).
pub fn parse_temporal(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = parse_naive_datetime(trimmed) {
        return Some(dt);
    }
    if let Ok(date) = parse_naive_date(trimmed) {
        return Some(date.and_time(NaiveTime::MIN));
    }
    let is_year_month = trimmed.len() == 7 && trimmed.as_bytes()[4] == b'-';
    if !is_year_month {
        return None;
    }
    NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    Integer(i64),
    Real(f64),
}

impl Numeric {
    pub fn into_value(self) -> Value {
        match self {
            Numeric::Integer(i) => Value::Integer(i),
            Numeric::Real(f) => Value::Real(f),
        }
    }
}

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥'];

/// Parses accounting-style numbers: optional sign, a leading currency symbol,
/// parentheses for negatives, and comma thousands separators.
pub fn parse_numeric_token(value: &str) -> Option<Numeric> {
    let mut body = value.trim();
    if body.is_empty() {
        return None;
    }

    let mut negative = false;
    if body.len() > 2 && body.starts_with('(') && body.ends_with(')') {
        negative = true;
        body = body[1..body.len() - 1].trim();
    }
    if let Some(rest) = body.strip_prefix('-') {
        negative = !negative;
        body = rest.trim_start();
    } else if let Some(rest) = body.strip_prefix('+') {
        body = rest.trim_start();
    }
    if let Some(rest) = body.strip_prefix(CURRENCY_SYMBOLS) {
        body = rest.trim_start();
    }
    if body.is_empty() || !body.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        return None;
    }

    let cleaned = strip_thousands_separators(body)?;
    let signed = if negative {
        format!("-{cleaned}")
    } else {
        cleaned
    };
    if let Ok(parsed) = signed.parse::<i64>() {
        return Some(Numeric::Integer(parsed));
    }
    signed
        .parse::<f64>()
        .ok()
        .filter(|parsed| parsed.is_finite())
        .map(Numeric::Real)
}

fn strip_thousands_separators(body: &str) -> Option<String> {
    if !body.contains(',') {
        return Some(body.to_string());
    }
    let (integer_part, fraction) = match body.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (body, None),
    };
    let mut groups = integer_part.split(',');
    let first = groups.next()?;
    if first.is_empty() || first.len() > 3 {
        return None;
    }
    let mut cleaned = first.to_string();
    for group in groups {
        if group.len() != 3 || !group.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        cleaned.push_str(group);
    }
    if let Some(frac) = fraction {
        cleaned.push('.');
        cleaned.push_str(frac);
    }
    Some(cleaned)
}

/// Parses `value` into the representation used by a column of type `ty`.
/// Empty input is a missing value rather than an error.
pub fn parse_typed_value(value: &str, ty: ColumnType) -> Result<Option<Value>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let parsed = match ty {
        ColumnType::Text => Value::Text(trimmed.to_string()),
        ColumnType::Integer | ColumnType::Real => parse_numeric_token(trimmed)
            .map(Numeric::into_value)
            .with_context(|| format!("Failed to parse '{trimmed}' as {ty}"))?,
        ColumnType::Temporal => Value::Temporal(
            parse_temporal(trimmed)
                .with_context(|| format!("Failed to parse '{trimmed}' as a date"))?,
        ),
    };
    Ok(Some(parsed))
}

pub fn normalize_column_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' => c,
            _ => '_',
        })
        .collect::<String>()
        .to_ascii_lowercase()
}

pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

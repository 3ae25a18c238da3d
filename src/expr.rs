use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDateTime};
use evalexpr::{
    ContextWithMutableFunctions, ContextWithMutableVariables, Function, HashMapContext,
    Value as EvalValue, eval_with_context,
};

use crate::{
    data::{Value, normalize_column_name, parse_temporal},
    dataset::Dataset,
    months::Month,
};

pub fn value_to_evalexpr(value: &Value) -> EvalValue {
    match value {
        Value::Text(s) => EvalValue::String(s.clone()),
        Value::Integer(i) => EvalValue::Int(*i),
        Value::Real(f) => EvalValue::Float(*f),
        Value::Temporal(_) => EvalValue::String(value.as_display()),
    }
}

// month_of(date) -> "YYYY-MM", year_of(date), date_diff_days(end, start)
fn register_temporal_functions(context: &mut HashMapContext) -> Result<()> {
    context
        .set_function(
            "month_of".into(),
            Function::new(|argument| {
                let dt = parse_datetime_arg(argument)?;
                Ok(EvalValue::String(Month::of(&dt).label()))
            }),
        )
        .map_err(anyhow::Error::from)?;

    context
        .set_function(
            "year_of".into(),
            Function::new(|argument| {
                let dt = parse_datetime_arg(argument)?;
                Ok(EvalValue::Int(i64::from(dt.year())))
            }),
        )
        .map_err(anyhow::Error::from)?;

    context
        .set_function(
            "date_diff_days".into(),
            Function::new(|arguments| {
                let args = expect_pair(arguments, "date_diff_days")?;
                let end = parse_datetime_arg(&args.0)?;
                let start = parse_datetime_arg(&args.1)?;
                Ok(EvalValue::Int((end.date() - start.date()).num_days()))
            }),
        )
        .map_err(anyhow::Error::from)?;

    Ok(())
}

/// Binds row `row` of `dataset` into a fresh evaluation context.
pub fn build_context(dataset: &Dataset, row: usize) -> Result<HashMapContext> {
    let mut context = HashMapContext::new();
    register_temporal_functions(&mut context)?;
    for (idx, column) in dataset.columns().iter().enumerate() {
        let bound = column
            .get(row)
            .map(value_to_evalexpr)
            .unwrap_or(EvalValue::Empty);
        context
            .set_value(normalize_column_name(&column.name), bound.clone())
            .with_context(|| format!("Binding column '{}'", column.name))?;
        context
            .set_value(format!("c{idx}"), bound)
            .with_context(|| format!("Binding column index {idx}"))?;
    }
    Ok(context)
}

pub fn evaluate_expression_to_bool(expr: &str, context: &HashMapContext) -> Result<bool> {
    let result = eval_with_context(expr, context)
        .with_context(|| format!("Evaluating expression '{expr}'"))?;
    Ok(eval_value_truthy(result))
}

pub fn eval_value_truthy(value: EvalValue) -> bool {
    match value {
        EvalValue::Boolean(b) => b,
        EvalValue::Int(i) => i != 0,
        EvalValue::Float(f) => f != 0.0,
        EvalValue::String(s) => !s.is_empty(),
        EvalValue::Tuple(values) => values.into_iter().any(eval_value_truthy),
        EvalValue::Empty => false,
    }
}

fn eval_error(message: &str) -> evalexpr::EvalexprError {
    evalexpr::EvalexprError::CustomMessage(message.to_string())
}

fn expect_pair(
    arguments: &EvalValue,
    name: &str,
) -> Result<(EvalValue, EvalValue), evalexpr::EvalexprError> {
    match arguments {
        EvalValue::Tuple(values) if values.len() == 2 => Ok((values[0].clone(), values[1].clone())),
        _ => Err(eval_error(&format!("{name} expects 2 arguments"))),
    }
}

fn parse_datetime_arg(value: &EvalValue) -> Result<NaiveDateTime, evalexpr::EvalexprError> {
    match value {
        EvalValue::String(raw) => parse_temporal(raw)
            .ok_or_else(|| eval_error(&format!("'{raw}' is not a recognizable date"))),
        other => Err(eval_error(&format!("Expected a date string, got {other:?}"))),
    }
}

use std::fmt::Write as _;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;

use crate::{
    aggregate::{self, AggregateRequest, Aggregates, UndatedRows},
    ask,
    cli::SummaryArgs,
    config::AppConfig,
    dataset::Dataset,
    error::PipelineError,
    export,
    filter::{self, GroupFilter},
    ingest, months,
    roles::{self, ColumnRoleSet, Selection, SelectionRequest},
    table,
};

pub const BAR_WIDTH: usize = 40;

#[derive(Debug, Clone, Copy, Default)]
pub struct DashboardOptions<'a> {
    pub selection: SelectionRequest<'a>,
    /// Group values to keep; every value when `None`.
    pub only: Option<&'a [String]>,
    pub undated: UndatedRows,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub total: f64,
    /// Distinct months across the whole dataset, before group filtering.
    pub months: usize,
    /// Distinct non-missing group values across the whole dataset.
    pub groups: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub selection: Selection,
    pub undated_rows: UndatedRows,
    pub rows_in_view: usize,
    pub rows_without_month: usize,
    pub metrics: Metrics,
    pub group_values: Vec<String>,
    #[serde(flatten)]
    pub aggregates: Aggregates,
}

pub fn build(
    dataset: &Dataset,
    roles: &ColumnRoleSet,
    options: &DashboardOptions<'_>,
) -> Result<Dashboard, PipelineError> {
    let selection = roles.select(&options.selection)?;
    let buckets = months::bucket_column(dataset, &selection.date_column)?;
    let group_values = filter::distinct_group_values(dataset, &selection.group_column)?;
    let group_filter = match options.only {
        Some(values) => GroupFilter::only(&selection.group_column, values.iter().map(String::as_str)),
        None => GroupFilter::all(dataset, &selection.group_column)?,
    };
    let view = group_filter.apply(dataset)?;
    let aggregates = aggregate::aggregate(
        dataset,
        &view,
        &buckets,
        &AggregateRequest {
            measure_column: &selection.measure_column,
            group_column: &selection.group_column,
            undated: options.undated,
        },
    )?;
    Ok(Dashboard {
        metrics: Metrics {
            total: aggregates.total,
            months: buckets.distinct_months(),
            groups: group_values.len(),
        },
        undated_rows: options.undated,
        rows_in_view: view.len(),
        rows_without_month: buckets.undated_count(),
        selection,
        group_values,
        aggregates,
    })
}

/// Text rendering: data preview, headline metrics, then the two charts.
pub fn render_text(dashboard: &Dashboard, dataset: &Dataset, preview_rows: usize) -> String {
    let selection = &dashboard.selection;
    let mut out = String::new();

    let shown = dataset.row_count().min(preview_rows);
    let _ = writeln!(out, "Data Preview ({shown} of {} rows)", dataset.row_count());
    out.push_str(&table::render_table(
        &dataset.column_names(),
        &dataset.head(preview_rows),
    ));
    out.push('\n');

    let metrics = vec![
        vec!["Total".to_string(), table::format_amount(dashboard.metrics.total)],
        vec!["Months".to_string(), dashboard.metrics.months.to_string()],
        vec![
            format!("{}s", selection.group_column),
            dashboard.metrics.groups.to_string(),
        ],
    ];
    out.push_str(&table::render_table(
        &["Metric".to_string(), "Value".to_string()],
        &metrics,
    ));
    if dashboard.rows_without_month > 0 {
        let _ = writeln!(
            out,
            "{} row(s) have no usable '{}' value ({} in totals)",
            dashboard.rows_without_month,
            selection.date_column,
            match dashboard.undated_rows {
                UndatedRows::Exclude => "excluded",
                UndatedRows::Include => "included",
            }
        );
    }
    out.push('\n');

    let _ = writeln!(out, "Monthly Trend ({})", selection.measure_column);
    let monthly = dashboard
        .aggregates
        .monthly
        .iter()
        .map(|entry| (entry.month.label(), entry.total))
        .collect::<Vec<_>>();
    if monthly.is_empty() {
        out.push_str("(no dated rows)\n");
    } else {
        out.push_str(&table::render_bar_chart(&monthly, BAR_WIDTH));
    }
    out.push('\n');

    let _ = writeln!(
        out,
        "Top {}s by {}",
        selection.group_column, selection.measure_column
    );
    let top = dashboard
        .aggregates
        .top_groups
        .iter()
        .map(|entry| (entry.group.clone(), entry.total))
        .collect::<Vec<_>>();
    if top.is_empty() {
        out.push_str("(no rows selected)\n");
    } else {
        out.push_str(&table::render_bar_chart(&top, BAR_WIDTH));
    }
    out
}

pub fn execute(args: &SummaryArgs) -> Result<()> {
    let config = AppConfig::load_optional(args.config.as_deref())?;
    let dataset = ingest::load_dataset(&args.input.input, &args.input.load_options()?)
        .with_context(|| format!("Loading {:?}", args.input.input))?;
    let roles = roles::classify(&dataset);
    let options = DashboardOptions {
        selection: args.selection.request(),
        only: (!args.only.is_empty()).then_some(args.only.as_slice()),
        undated: config.undated_rows(args.include_undated),
    };
    let dashboard = build(&dataset, &roles, &options)?;
    info!(
        "Summarized '{}' by month of '{}' and by '{}' ({} row(s) selected)",
        dashboard.selection.measure_column,
        dashboard.selection.date_column,
        dashboard.selection.group_column,
        dashboard.rows_in_view
    );

    if args.json {
        let rendered =
            serde_json::to_string_pretty(&dashboard).context("Serializing dashboard to JSON")?;
        println!("{rendered}");
    } else {
        print!("{}", render_text(&dashboard, &dataset, args.preview_rows));
    }

    if let Some(path) = &args.export {
        export::export_monthly_csv(
            path,
            &dashboard.selection.measure_column,
            &dashboard.aggregates.monthly,
        )?;
    }

    if let Some(question) = &args.ask {
        println!();
        if let Err(err) = ask::answer(question, &dataset, &config, args.bridge.api_key.as_deref()) {
            warn!("Question could not be answered: {err:#}");
            println!("Ask failed: {err:#}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::RawCell;

    // Twelve distinct amounts keep "Amount" above the measure threshold.
    fn dataset() -> Dataset {
        let rows = [
            ("2024-01-05", "A", "100"),
            ("2024-01-20", "B", "50"),
            ("2024-02-01", "A", "30"),
            ("", "A", "999"),
            ("2024-03-03", "C", "1"),
            ("2024-03-04", "C", "2"),
            ("2024-03-05", "C", "3"),
            ("2024-03-06", "C", "4"),
            ("2024-03-07", "C", "5"),
            ("2024-03-08", "C", "6"),
            ("2024-03-09", "C", "7"),
            ("2024-03-10", "", "8"),
        ];
        Dataset::from_rows(
            vec!["Posted Date".into(), "Category".into(), "Amount".into()],
            rows.iter()
                .map(|(date, category, amount)| {
                    vec![
                        RawCell::from(*date),
                        RawCell::from(*category),
                        RawCell::from(*amount),
                    ]
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn default_selection_and_full_universe() {
        let dataset = dataset();
        let roles = roles::classify(&dataset);
        let dashboard = build(&dataset, &roles, &DashboardOptions::default()).unwrap();

        assert_eq!(dashboard.selection.date_column, "Posted Date");
        assert_eq!(dashboard.selection.measure_column, "Amount");
        assert_eq!(dashboard.selection.group_column, "Category");
        assert_eq!(dashboard.group_values, vec!["A", "B", "C"]);
        assert_eq!(dashboard.metrics.groups, 3);
        assert_eq!(dashboard.metrics.months, 3);
        assert_eq!(dashboard.rows_without_month, 1);
        // missing-category row is never selected; undated row is excluded
        assert_eq!(dashboard.metrics.total, 208.0);
        assert_eq!(dashboard.aggregates.monthly_sum(), dashboard.metrics.total);
    }

    #[test]
    fn only_narrows_rows_but_not_metric_universe() {
        let dataset = dataset();
        let roles = roles::classify(&dataset);
        let only = vec!["A".to_string()];
        let dashboard = build(
            &dataset,
            &roles,
            &DashboardOptions {
                only: Some(&only),
                undated: UndatedRows::Include,
                ..DashboardOptions::default()
            },
        )
        .unwrap();
        assert_eq!(dashboard.metrics.total, 1129.0);
        assert_eq!(dashboard.metrics.groups, 3);
        assert_eq!(dashboard.metrics.months, 3);
        assert_eq!(dashboard.aggregates.top_groups.len(), 1);
        assert_eq!(dashboard.rows_in_view, 3);
    }

    #[test]
    fn selection_errors_surface_as_pipeline_errors() {
        let dataset = dataset();
        let roles = roles::classify(&dataset);
        let err = build(
            &dataset,
            &roles,
            &DashboardOptions {
                selection: SelectionRequest {
                    measure: Some("Category"),
                    ..SelectionRequest::default()
                },
                ..DashboardOptions::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::NotACandidate { .. }));
    }

    #[test]
    fn text_rendering_has_every_section() {
        let dataset = dataset();
        let roles = roles::classify(&dataset);
        let dashboard = build(&dataset, &roles, &DashboardOptions::default()).unwrap();
        let text = render_text(&dashboard, &dataset, 2);
        assert!(text.starts_with("Data Preview (2 of 12 rows)\n"));
        let metric = |name: &str| {
            text.lines()
                .find(|line| line.starts_with(name))
                .and_then(|line| line.split_whitespace().last())
                .map(str::to_string)
        };
        assert_eq!(metric("Total ").as_deref(), Some("208.00"));
        assert_eq!(metric("Months ").as_deref(), Some("3"));
        assert_eq!(metric("Categorys ").as_deref(), Some("3"));
        assert!(text.contains("Monthly Trend (Amount)"));
        assert!(text.contains("Top Categorys by Amount"));
        assert!(text.contains("1 row(s) have no usable 'Posted Date' value (excluded in totals)"));
    }
}

use std::collections::HashSet;

use ledger_lens::{
    aggregate::{AggregateRequest, TOP_GROUPS_LIMIT, UndatedRows, aggregate},
    dataset::{Column, Dataset, RawCell},
    export::{monthly_csv_bytes, read_monthly_csv},
    filter::{FilteredView, GroupFilter},
    months::bucket_column,
};
use proptest::prelude::*;

type Row = (Option<(i32, u32, u32)>, usize, i64);

fn row_strategy() -> impl Strategy<Value = Row> {
    (
        proptest::option::weighted(0.8, (2022i32..2025, 1u32..=12, 1u32..=28)),
        0usize..14,
        -5_000i64..5_000,
    )
}

fn build(rows: &[Row]) -> Dataset {
    let dates = rows
        .iter()
        .map(|(date, _, _)| match date {
            Some((y, m, d)) => RawCell::from(format!("{y:04}-{m:02}-{d:02}").as_str()),
            None => RawCell::Empty,
        })
        .collect();
    let groups = rows
        .iter()
        .map(|(_, group, _)| RawCell::from(format!("G{group}").as_str()))
        .collect();
    let amounts = rows
        .iter()
        .map(|(_, _, amount)| RawCell::Integer(*amount))
        .collect();
    Dataset::new(vec![
        Column::infer("txn_date", dates),
        Column::infer("category", groups),
        Column::infer("amount", amounts),
    ])
    .expect("columns share a length")
}

fn request(undated: UndatedRows) -> AggregateRequest<'static> {
    AggregateRequest {
        measure_column: "amount",
        group_column: "category",
        undated,
    }
}

proptest! {
    #[test]
    fn monthly_series_sums_to_total(rows in prop::collection::vec(row_strategy(), 1..80)) {
        let dataset = build(&rows);
        let buckets = bucket_column(&dataset, "txn_date").unwrap();
        let view = GroupFilter::all(&dataset, "category").unwrap().apply(&dataset).unwrap();
        let result = aggregate(&dataset, &view, &buckets, &request(UndatedRows::Exclude)).unwrap();

        prop_assert_eq!(result.monthly_sum(), result.total);
        let dated: i64 = rows.iter().filter(|r| r.0.is_some()).map(|r| r.2).sum();
        prop_assert_eq!(result.total, dated as f64);
    }

    #[test]
    fn full_universe_filter_keeps_every_row(rows in prop::collection::vec(row_strategy(), 1..80)) {
        let dataset = build(&rows);
        let view = GroupFilter::all(&dataset, "category").unwrap().apply(&dataset).unwrap();
        prop_assert_eq!(view, FilteredView::unfiltered(&dataset));
    }

    #[test]
    fn include_policy_totals_every_selected_row(rows in prop::collection::vec(row_strategy(), 1..80)) {
        let dataset = build(&rows);
        let buckets = bucket_column(&dataset, "txn_date").unwrap();
        let view = FilteredView::unfiltered(&dataset);
        let included = aggregate(&dataset, &view, &buckets, &request(UndatedRows::Include)).unwrap();
        let excluded = aggregate(&dataset, &view, &buckets, &request(UndatedRows::Exclude)).unwrap();

        let all: i64 = rows.iter().map(|r| r.2).sum();
        prop_assert_eq!(included.total, all as f64);
        prop_assert_eq!(included.monthly, excluded.monthly);
    }

    #[test]
    fn months_ascend_and_top_groups_descend(rows in prop::collection::vec(row_strategy(), 1..80)) {
        let dataset = build(&rows);
        let buckets = bucket_column(&dataset, "txn_date").unwrap();
        let view = FilteredView::unfiltered(&dataset);
        let result = aggregate(&dataset, &view, &buckets, &request(UndatedRows::Exclude)).unwrap();

        prop_assert!(result.monthly.windows(2).all(|pair| pair[0].month < pair[1].month));
        prop_assert!(result.top_groups.windows(2).all(|pair| pair[0].total >= pair[1].total));
        prop_assert!(result.top_groups.len() <= TOP_GROUPS_LIMIT);

        let dated_groups = rows
            .iter()
            .filter(|r| r.0.is_some())
            .map(|r| r.1)
            .collect::<HashSet<_>>();
        prop_assert_eq!(result.top_groups.len(), dated_groups.len().min(TOP_GROUPS_LIMIT));
    }

    #[test]
    fn subset_filter_only_keeps_allowed_groups(
        rows in prop::collection::vec(row_strategy(), 1..80),
        allowed in prop::collection::hash_set(0usize..14, 0..5),
    ) {
        let dataset = build(&rows);
        let names = allowed.iter().map(|g| format!("G{g}")).collect::<Vec<_>>();
        let view = GroupFilter::only("category", names.clone()).apply(&dataset).unwrap();
        let expected = rows.iter().filter(|r| allowed.contains(&r.1)).count();
        prop_assert_eq!(view.len(), expected);

        let buckets = bucket_column(&dataset, "txn_date").unwrap();
        let result = aggregate(&dataset, &view, &buckets, &request(UndatedRows::Include)).unwrap();
        prop_assert!(result.top_groups.iter().all(|entry| names.contains(&entry.group)));
    }

    #[test]
    fn exported_csv_has_one_row_per_month(rows in prop::collection::vec(row_strategy(), 1..80)) {
        let dataset = build(&rows);
        let buckets = bucket_column(&dataset, "txn_date").unwrap();
        let view = FilteredView::unfiltered(&dataset);
        let result = aggregate(&dataset, &view, &buckets, &request(UndatedRows::Exclude)).unwrap();

        let bytes = monthly_csv_bytes("amount", &result.monthly).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        prop_assert_eq!(text.lines().count(), result.monthly.len() + 1);
        let (measure, parsed) = read_monthly_csv(bytes.as_slice()).unwrap();
        prop_assert_eq!(measure, "amount");
        prop_assert_eq!(parsed, result.monthly);
    }
}

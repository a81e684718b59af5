// SPDX-License-Identifier: Apache-2.0

//! FID-range rewrite soundness.
//!
//! The rewrite `IN (fids)` -> `(field >= min AND field <= max AND field
//! NOT IN (gaps))` must select exactly the same id set as the original
//! list, for every list it accepts.
//!

use filtermate::fid_range_expression;
use regex::Regex;
use std::collections::BTreeSet;
use tracing_test::traced_test;

// Evaluate the generated range expression over a universe of candidate
// ids and return the accepted set.
fn select(range_expr: &str, universe: impl Iterator<Item = i64>) -> BTreeSet<i64> {
    let bounds = Regex::new(r#""fid" >= (\d+) AND "fid" <= (\d+)"#).unwrap();
    let caps = bounds.captures(range_expr).expect("range bounds");
    let min: i64 = caps[1].parse().unwrap();
    let max: i64 = caps[2].parse().unwrap();

    let gaps: BTreeSet<i64> = Regex::new(r"NOT IN \(([^)]+)\)")
        .unwrap()
        .captures(range_expr)
        .map(|c| {
            c[1].split(',')
                .filter_map(|x| x.trim().parse().ok())
                .collect()
        })
        .unwrap_or_default();

    universe
        .filter(|x| (min..=max).contains(x) && !gaps.contains(x))
        .collect()
}

#[test]
#[traced_test]
fn test_dense_list_with_gaps() {
    let fids: Vec<i64> = (10..=200).filter(|x| x % 37 != 0).collect();
    let expr = fid_range_expression("fid", &fids).expect("rewrite expected");
    let selected = select(&expr, 0..400);
    let original: BTreeSet<i64> = fids.into_iter().collect();
    assert_eq!(selected, original);
}

#[test]
#[traced_test]
fn test_perfect_range() {
    let fids: Vec<i64> = (1..=500).collect();
    let expr = fid_range_expression("fid", &fids).expect("rewrite expected");
    assert!(!expr.contains("NOT IN"));
    let selected = select(&expr, 0..1000);
    assert_eq!(selected, fids.into_iter().collect::<BTreeSet<i64>>());
}

#[test]
#[traced_test]
fn test_rewrite_declines_when_unsound_would_be_cheaper() {
    // Below the length threshold.
    assert!(fid_range_expression("fid", &(1..=5).collect::<Vec<i64>>()).is_none());
    // Coverage under one half.
    let sparse: Vec<i64> = (0..50).map(|x| x * 10).collect();
    assert!(fid_range_expression("fid", &sparse).is_none());
}

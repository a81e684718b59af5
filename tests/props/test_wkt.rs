// SPDX-License-Identifier: Apache-2.0

//! WKT-budget and tolerance invariants of adaptive simplification.
//!

use approx::assert_relative_eq;
use filtermate::{EndCap, SimplifyOutcome, buffer_arc_error, simplify_adaptive, to_wkt_fixed};
use geos::Geometry;
use std::f64::consts::PI;
use tracing_test::traced_test;

fn dense_ring(vertices: usize, radius: f64) -> Geometry {
    let pts: Vec<String> = (0..=vertices)
        .map(|i| {
            let a = 2.0 * PI * (i % vertices) as f64 / vertices as f64;
            format!("{:.6} {:.6}", radius * a.cos(), radius * a.sin())
        })
        .collect();
    Geometry::new_from_wkt(&format!("POLYGON (({}))", pts.join(", "))).unwrap()
}

#[test]
#[traced_test]
fn test_budget_met_or_fallback_logged() {
    for budget in [500usize, 2_000, 10_000] {
        let g = dense_ring(3_000, 5_000.0);
        let got = simplify_adaptive(&g, budget, false, None).unwrap();
        match got.outcome {
            SimplifyOutcome::Unchanged
            | SimplifyOutcome::Simplified
            | SimplifyOutcome::Fallback => {
                assert!(
                    got.wkt.len() <= budget,
                    "budget {budget} missed: {} chars",
                    got.wkt.len()
                );
            }
            // Over budget is acceptable only as a best-effort reduction.
            SimplifyOutcome::OverBudget => {
                let full = to_wkt_fixed(&g, false).unwrap();
                assert!(got.wkt.len() < full.len());
            }
        }
    }
}

#[test]
#[traced_test]
fn test_tolerance_monotone_in_segments() {
    let distance = 125.0;
    let mut last = f64::INFINITY;
    for segments in [1u32, 2, 4, 8, 16, 32, 64, 128] {
        let e = buffer_arc_error(distance, segments, EndCap::Round);
        assert!(
            e < last,
            "arc error must decrease as segments grow (at {segments})"
        );
        last = e;
    }
}

#[test]
#[traced_test]
fn test_flat_and_square_double_the_error() {
    let round = buffer_arc_error(80.0, 6, EndCap::Round);
    assert_relative_eq!(buffer_arc_error(80.0, 6, EndCap::Flat), round * 2.0);
    assert_relative_eq!(buffer_arc_error(80.0, 6, EndCap::Square), round * 2.0);
}

#[test]
#[traced_test]
fn test_precision_is_crs_aware() {
    let g = Geometry::new_from_wkt("POINT (1.123456789012 2.987654321098)").unwrap();
    let geographic = to_wkt_fixed(&g, true).unwrap();
    let projected = to_wkt_fixed(&g, false).unwrap();
    // 8 decimals geographic, 3 projected.
    assert!(geographic.contains("1.12345679"));
    assert!(projected.contains("1.123"));
    assert!(!projected.contains("1.1234"));
}

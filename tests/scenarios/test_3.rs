// SPDX-License-Identifier: Apache-2.0

//! Multi-step plan: two spatial predicates then an attribute.
//!
//! Given:
//!     * The composite expression
//!       `ST_Intersects(...) AND ST_Within(...) AND "type" = 'city'`.
//! Then:
//!     * the planner emits three steps, spatial first, attribute last;
//!     * applying the steps in order, each combined onto the prior subset
//!       with AND, reproduces every conjunct exactly once.
//!

use filtermate::{OperationType, combine_with_subset, decompose};
use tracing_test::traced_test;

const COMPOSITE: &str = r#"ST_Intersects("t"."geom", ST_GeomFromText('POLYGON ((0 0, 1 0, 1 1, 0 1, 0 0))', 2154)) AND ST_Within("t"."geom", ST_GeomFromText('POINT (0 0)', 2154)) AND "type" = 'city'"#;

#[test]
#[traced_test]
fn test_three_steps_spatial_first() {
    let steps = decompose(COMPOSITE, 10_000);
    assert_eq!(steps.len(), 3);
    assert_eq!(steps[0].operation_type, OperationType::Spatial);
    assert_eq!(steps[1].operation_type, OperationType::Spatial);
    assert_eq!(steps[2].operation_type, OperationType::Attribute);
    assert!(steps[0].expression.contains("ST_Intersects"));
    assert!(steps[1].expression.contains("ST_Within"));
    assert_eq!(steps[2].expression, r#""type" = 'city'"#);

    // Spatial steps promise the larger reduction.
    assert!(steps[0].estimated_reduction_pct > steps[2].estimated_reduction_pct);
}

#[test]
#[traced_test]
fn test_steps_apply_in_order_with_and() {
    let steps = decompose(COMPOSITE, 10_000);

    let mut subset = String::new();
    for step in &steps {
        subset = if subset.is_empty() {
            step.expression.clone()
        } else {
            combine_with_subset(&step.expression, &subset, "AND")
        };
    }

    // Every conjunct present exactly once, spatial leading.
    assert_eq!(subset.matches("ST_Intersects").count(), 1);
    assert_eq!(subset.matches("ST_Within").count(), 1);
    assert_eq!(subset.matches(r#""type" = 'city'"#).count(), 1);
    let intersects_at = subset.find("ST_Intersects").unwrap();
    let attribute_at = subset.find(r#""type""#).unwrap();
    assert!(intersects_at < attribute_at);
    assert_eq!(subset.matches('(').count(), subset.matches(')').count());
}

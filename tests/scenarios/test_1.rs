// SPDX-License-Identifier: Apache-2.0

//! Simple attribute filter with an OGR target.
//!
//! Given:
//!     * Source layer `towns` (OGR) filtered by the host expression
//!       `"population" > 10000`.
//!     * One OGR target `pois` with predicate INTERSECTS, no buffer.
//! Then:
//!     * the source subset becomes exactly `"population" > 10000`;
//!     * the target subset becomes `fid IN (<ids matched in-process>)`;
//!     * a history entry lands for both layers.
//!

use crate::utils::{MockLayer, MockRegistry, engine, request};
use filtermate::prelude::*;
use std::sync::Arc;
use tracing_test::traced_test;

#[tokio::test]
#[traced_test]
async fn test_attribute_filter_ogr_target() {
    let source = Arc::new(MockLayer::new("towns", "ogr").with_features(&[
        (1, "POLYGON ((0 0, 10 0, 10 10, 0 10, 0 0))"),
        (2, "POLYGON ((40 40, 60 40, 60 60, 40 60, 40 40))"),
    ]));
    let target = Arc::new(MockLayer::new("pois", "ogr").with_features(&[
        (100, "POINT (5 5)"),
        (101, "POINT (50 50)"),
        (102, "POINT (95 95)"),
    ]));
    let registry = MockRegistry::new().with(source.clone()).with(target.clone());

    let history = Arc::new(HistoryLog::in_memory().await.unwrap());
    let engine = engine(registry).with_history(history.clone());

    let mut req = request("towns", &[("pois", Predicate::Intersects)]);
    req.selection = Selection::Expression(r#""population" > 10000"#.to_owned());

    let outcome = engine.run(req, CancelToken::new()).await.unwrap();
    assert!(!outcome.partial, "{:?}", outcome.failed_layers);
    assert!(outcome.applied_layers.contains(&"pois".to_owned()));

    // Source got the sanitized attribute expression verbatim.
    assert_eq!(source.subset_string(), r#""population" > 10000"#);

    // Target got a bare-fid IN list of the in-process matches: 100 falls
    // inside town 1, 101 inside town 2, 102 nowhere.
    assert_eq!(target.subset_string(), "fid IN (100, 101)");

    // Both applications were recorded.
    let source_entry = history.last("11111111-2222-3333-4444-555555555555", "towns")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(source_entry.subset_string, r#""population" > 10000"#);
    let target_entry = history.last("11111111-2222-3333-4444-555555555555", "pois")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(target_entry.subset_string, "fid IN (100, 101)");
    assert_eq!(target_entry.source_layer_id.as_deref(), Some("towns"));
}

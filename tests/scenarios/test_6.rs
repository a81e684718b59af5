// SPDX-License-Identifier: Apache-2.0

//! Cancellation mid-fan-out.
//!
//! Given:
//!     * Ten database targets filtered sequentially, with cancellation
//!       arriving while the fifth is starting.
//! Then:
//!     * the four completed targets keep their filters;
//!     * the remaining six are untouched;
//!     * the session's views are dropped during cleanup.
//!

use crate::utils::{CancelingReporter, MockLayer, MockRegistry, RecordingRunner, request};
use filtermate::prelude::*;
use std::sync::Arc;
use tracing_test::traced_test;

#[tokio::test]
#[traced_test]
async fn test_cancel_after_four_targets() {
    let source = Arc::new(
        MockLayer::new("towns", "ogr")
            .with_features(&[(1, "POLYGON ((0 0, 10 0, 10 10, 0 10, 0 0))")]),
    );
    let mut registry = MockRegistry::new().with(source.clone());

    let mut targets = Vec::new();
    let mut specs = Vec::new();
    for i in 0..10 {
        let id = format!("t{i}");
        // Same SQLite file: the single-writer limit forces sequential
        // execution, which makes the cancellation point deterministic.
        let layer = Arc::new(
            MockLayer::new(&id, "spatialite").with_db_path("/data/shared.sqlite"),
        );
        registry = registry.with(layer.clone());
        targets.push(layer);
        specs.push(id);
    }

    let token = CancelToken::new();
    let reporter = Arc::new(CancelingReporter::new(token.clone(), 5));
    let runner = Arc::new(RecordingRunner::default());
    let engine = FilterEngine::new(
        Arc::new(registry),
        Arc::new(InlineExecutor),
        reporter,
    )
    .with_pg_runner(runner.clone());

    let target_specs: Vec<(&str, Predicate)> = specs
        .iter()
        .map(|id| (id.as_str(), Predicate::Intersects))
        .collect();
    let mut req = request("towns", &target_specs);
    req.selection = Selection::FeatureIds(vec![1]);

    let outcome = engine.run(req, token).await.unwrap();
    assert!(outcome.canceled);
    assert_eq!(outcome.applied_layers.len(), 4, "{:?}", outcome.applied_layers);

    // First four carry a filter, the rest are untouched.
    for layer in targets.iter().take(4) {
        assert!(!layer.subset_string().is_empty(), "{} lost its filter", layer.id());
    }
    for layer in targets.iter().skip(4) {
        assert_eq!(layer.subset_string(), "", "{} was touched", layer.id());
    }

    // Cleanup asked the database for this session's views.
    let fetched = runner.fetched.lock().unwrap().clone();
    assert!(
        fetched.iter().any(|x| x.contains("fm_temp_")),
        "session cleanup must enumerate temp views"
    );
}

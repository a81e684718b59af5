// SPDX-License-Identifier: Apache-2.0

//! UI-thread exclusivity.
//!
//! No subset string (or reload, extent update, repaint) may reach a host
//! layer from any thread other than the one backing the UI executor. The
//! instrumented mock layers record the thread of every mutation.
//!

use crate::utils::{MockLayer, MockRegistry, UiThreadExecutor, request};
use filtermate::prelude::*;
use std::sync::Arc;
use tracing_test::traced_test;

#[tokio::test]
#[traced_test]
async fn test_mutations_only_on_ui_thread() {
    let source = Arc::new(
        MockLayer::new("towns", "ogr")
            .with_features(&[(1, "POINT (5 5)"), (2, "POINT (50 50)")]),
    );
    let target = Arc::new(
        MockLayer::new("pois", "ogr")
            .with_features(&[(10, "POINT (5 5)"), (11, "POINT (99 99)")]),
    );
    let registry = MockRegistry::new().with(source.clone()).with(target.clone());

    let executor = Arc::new(UiThreadExecutor::new());
    let ui_thread = executor.thread_id();
    let engine = FilterEngine::new(
        Arc::new(registry),
        executor,
        Arc::new(LogReporter),
    );

    let mut req = request("towns", &[("pois", Predicate::Intersects)]);
    req.selection = Selection::Expression(r#""population" > 0"#.to_owned());
    let outcome = engine.run(req, CancelToken::new()).await.unwrap();
    assert!(!outcome.applied_layers.is_empty());

    let main_thread = std::thread::current().id();
    for layer in [&source, &target] {
        let threads = layer.mutation_threads();
        assert!(!threads.is_empty(), "{} saw no mutations", layer.id());
        for t in threads {
            assert_eq!(t, ui_thread, "{}: mutation off the UI thread", layer.id());
            assert_ne!(t, main_thread);
        }
    }
}

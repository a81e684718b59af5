// SPDX-License-Identifier: Apache-2.0

//! PostgreSQL pair with a buffer.
//!
//! Given:
//!     * PostgreSQL source `towns` with 300 explicitly selected features.
//!     * PostgreSQL target `roads`, predicate INTERSECTS, buffer 50 m,
//!       5 segments, round cap.
//! Then:
//!     * a `source` view is created with a pre-computed `ST_Buffer` column,
//!       a GIST index on each geometry column, and an ANALYZE;
//!     * the target subset drives off that view's `geom_buffered` column;
//!     * nothing in the pipeline enumerated host features.
//!

use crate::utils::{MockLayer, MockRegistry, RecordingRunner, engine, request};
use filtermate::prelude::*;
use std::sync::Arc;
use tracing_test::traced_test;

#[tokio::test]
#[traced_test]
async fn test_pg_pair_promotes_source_view() {
    let source = Arc::new(MockLayer::new("towns", "postgres"));
    let target = Arc::new(MockLayer::new("roads", "postgres"));
    let registry = MockRegistry::new().with(source.clone()).with(target.clone());

    let runner = Arc::new(RecordingRunner::default());
    let engine = engine(registry).with_pg_runner(runner.clone());

    let fids: Vec<i64> = (1..=300).collect();
    let mut req = request("towns", &[("roads", Predicate::Intersects)]);
    req.selection = Selection::FeatureIds(fids);
    req.buffer = Some(BufferSpec {
        distance: BufferDistance::Constant(50.0),
        segments: 5,
        end_cap: EndCap::Round,
        dissolve: true,
    });

    let outcome = engine.run(req, CancelToken::new()).await.unwrap();
    assert!(!outcome.partial, "{:?}", outcome.failed_layers);

    let executed = runner.executed();
    let create = executed
        .iter()
        .find(|x| x.starts_with("CREATE MATERIALIZED VIEW"))
        .expect("source view creation");
    assert!(create.contains("fm_temp_source_"));
    assert!(create.contains("ST_Buffer(\"geom\", 50, 'quad_segs=5') AS geom_buffered"));
    assert!(create.contains("\"fid\" IN (1, 2, 3"));
    assert!(
        executed
            .iter()
            .any(|x| x.contains("USING GIST") && x.contains("geom_buffered")),
        "GIST index on the buffered column"
    );
    assert!(executed.iter().any(|x| x.starts_with("ANALYZE")));

    // The applied subset reads the view, buffer pre-computed.
    let subset = target.subset_string();
    assert!(subset.starts_with("EXISTS (SELECT 1 FROM \"filtermate_temp\".\"fm_temp_source_"));
    assert!(subset.contains("ST_Intersects(\"roads\".\"geom\", __source.geom_buffered)"));
}

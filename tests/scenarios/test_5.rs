// SPDX-License-Identifier: Apache-2.0

//! Geographic CRS with a large buffer.
//!
//! Given:
//!     * Source in EPSG:4326 (degrees), buffer distance 10.
//! Then:
//!     * the request fails with a geometry-preparation error whose message
//!       names the unit mismatch and proposes reprojection;
//!     * no target layer was mutated.
//!

use crate::utils::{MockLayer, MockRegistry, engine, request};
use filtermate::prelude::*;
use std::sync::Arc;
use tracing_test::traced_test;

#[tokio::test]
#[traced_test]
async fn test_large_buffer_on_degrees_fails_loudly() {
    let source = Arc::new(
        MockLayer::new("towns", "ogr")
            .with_crs("EPSG:4326", true)
            .with_features(&[(1, "POINT (2.35 48.85)")]),
    );
    let target = Arc::new(MockLayer::new("pois", "ogr").with_features(&[(10, "POINT (2.35 48.85)")]));
    let registry = MockRegistry::new().with(source.clone()).with(target.clone());
    let engine = engine(registry);

    let mut req = request("towns", &[("pois", Predicate::Intersects)]);
    req.selection = Selection::FeatureIds(vec![1]);
    req.buffer = Some(BufferSpec {
        distance: BufferDistance::Constant(10.0),
        segments: 5,
        end_cap: EndCap::Round,
        dissolve: true,
    });

    let err = engine.run(req, CancelToken::new()).await.unwrap_err();
    match &err {
        FilterError::GeometryPreparation(msg) => {
            assert!(msg.contains("degrees"), "message must name the unit: {msg}");
            assert!(msg.contains("Reproject"), "message must propose a fix: {msg}");
        }
        x => panic!("expected a geometry-preparation error, got {x}"),
    }

    // The target was never touched.
    assert_eq!(target.subset_string(), "");
}

// SPDX-License-Identifier: Apache-2.0

//! Large FID list on a SpatiaLite target.
//!
//! Given:
//!     * A selection of 800 ids combined (AND) with an INTERSECTS
//!       predicate on a SpatiaLite target.
//! Then:
//!     * dense lists convert to `fid >= min AND fid <= max`;
//!     * sparse lists stay inline, but the FID predicate is placed first
//!       so left-to-right evaluation filters by index before geometry.
//!

use filtermate::{Backend, CombinedQueryOptimizer, LayerDescriptor, OptimizationKind};
use tracing_test::traced_test;

fn spatialite_target() -> LayerDescriptor {
    LayerDescriptor {
        layer_id: "parcels".into(),
        backend: Backend::SpatiaLite,
        schema: None,
        table: "parcels".into(),
        geometry_column: "geometry".into(),
        primary_key: "fid".into(),
        primary_key_is_numeric: true,
        crs_auth_id: "EPSG:2154".into(),
        crs_is_geographic: false,
        srid: Some(2154),
        field_names: vec![],
        feature_count_hint: Some(100_000),
        database_path: Some("/data/parcels.sqlite".into()),
    }
}

const SPATIAL: &str =
    r#"Intersects("geometry", GeomFromText('POLYGON ((0 0, 1 0, 1 1, 0 1, 0 0))', 2154))"#;

#[test]
#[traced_test]
fn test_dense_800_ids_become_a_range() {
    let optimizer = CombinedQueryOptimizer::new("s4");
    let fids: Vec<String> = (1..=800).map(|x| x.to_string()).collect();
    let fid_expr = format!(r#""fid" IN ({})"#, fids.join(", "));

    let got = optimizer
        .optimize(SPATIAL, &fid_expr, "AND", &spatialite_target())
        .unwrap()
        .expect("rewrite expected");
    assert_eq!(got.kind, OptimizationKind::Range);
    assert!(got.expression.contains(r#""fid" >= 1 AND "fid" <= 800"#));
    assert!(!got.expression.contains("IN (1, 2,"));
}

#[test]
#[traced_test]
fn test_sparse_ids_stay_inline_but_lead() {
    let optimizer = CombinedQueryOptimizer::new("s4");
    // Coverage well under one half: no sound range conversion.
    let fids: Vec<String> = (1..=800).map(|x| (x * 13).to_string()).collect();
    let fid_expr = format!(r#""fid" IN ({})"#, fids.join(", "));

    let got = optimizer
        .optimize(SPATIAL, &fid_expr, "AND", &spatialite_target())
        .unwrap()
        .expect("rewrite expected");
    assert_eq!(got.kind, OptimizationKind::FidList);
    // The FID predicate leads; the spatial clause follows.
    let fid_at = got.expression.find(r#""fid" IN"#).unwrap();
    let spatial_at = got.expression.find("Intersects").unwrap();
    assert!(fid_at < spatial_at);
}

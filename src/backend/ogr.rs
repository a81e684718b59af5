// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! OGR path: in-process select-by-location.
//!
//! OGR subset strings cannot express spatial joins, so the relation is
//! evaluated here, feature by feature, against the prepared in-memory
//! source. The surviving target ids come back as a plain `IN` list the
//! driver does understand.
//!
//! Geometry handles are not thread-safe on the host side; callers keep
//! this path off background threads when the target is a live layer
//! rather than a snapshot.
//!

use crate::{
    FilterError, LayerDescriptor, Predicate,
    expression::{PkValue, build_fid_expression},
    geometry::MemorySourceLayer,
    host::Feature,
};
use geos::Geom;
use tracing::debug;

fn relates(target: &impl Geom, source: &impl Geom, p: Predicate) -> Result<bool, FilterError> {
    // Direction matches the SQL emission: predicate(target_geom, source_geom).
    let it = match p {
        Predicate::Intersects => target.intersects(source)?,
        Predicate::Contains => target.contains(source)?,
        Predicate::Within => target.within(source)?,
        Predicate::Touches => target.touches(source)?,
        Predicate::Overlaps => target.overlaps(source)?,
        Predicate::Crosses => target.crosses(source)?,
        Predicate::Disjoint => target.disjoint(source)?,
        Predicate::Equals => target.equals(source)?,
        Predicate::Covers => target.covers(source)?,
        Predicate::CoveredBy => target.covered_by(source)?,
    };
    Ok(it)
}

/// Evaluate the spatial relation between every target feature and the
/// prepared source, returning the matching target ids.
///
/// Predicates are OR-combined, mirroring the SQL backends. The source
/// union is indexed once as a GEOS prepared geometry; note the operand
/// swap, since the prepared side is the source while the SQL convention
/// puts the target first.
pub fn select_by_location(
    targets: &[Feature],
    source: &MemorySourceLayer,
    predicates: &[Predicate],
) -> Result<Vec<i64>, FilterError> {
    if predicates.is_empty() {
        return Err(FilterError::Input("No predicates for target".into()));
    }

    let mut matched = Vec::new();
    let prepared = source.dissolved.to_prepared_geom()?;
    for t in targets {
        let mut hit = false;
        for p in predicates {
            let ok = match p {
                Predicate::Intersects => prepared.intersects(&t.geom)?,
                Predicate::Contains => prepared.within(&t.geom)?,
                Predicate::Within => prepared.contains(&t.geom)?,
                Predicate::Touches => prepared.touches(&t.geom)?,
                Predicate::Overlaps => prepared.overlaps(&t.geom)?,
                Predicate::Crosses => prepared.crosses(&t.geom)?,
                Predicate::Disjoint => prepared.disjoint(&t.geom)?,
                Predicate::Covers => prepared.covered_by(&t.geom)?,
                Predicate::CoveredBy => prepared.covers(&t.geom)?,
                Predicate::Equals => relates(&t.geom, &source.dissolved, *p)?,
            };
            if ok {
                hit = true;
                break;
            }
        }
        if hit {
            matched.push(t.fid);
        }
    }
    debug!(
        "select_by_location: {} of {} target features matched",
        matched.len(),
        targets.len()
    );
    Ok(matched)
}

/// Build the OGR subset expression from matched ids: `fid IN (...)`, or
/// the quoted pk when it is not literally `fid`.
pub fn build_ogr_expression(
    matched: &[i64],
    target: &LayerDescriptor,
) -> Result<String, FilterError> {
    if matched.is_empty() {
        // An empty IN list is invalid SQL; an always-false predicate keeps
        // the subset form.
        let pk = if target.primary_key == "fid" {
            "fid".to_owned()
        } else {
            format!("\"{}\"", target.primary_key)
        };
        return Ok(format!("{pk} IN (-1)"));
    }
    let values: Vec<PkValue> = matched.iter().map(|x| PkValue::Int(*x)).collect();
    Ok(build_fid_expression(&values, target))
}

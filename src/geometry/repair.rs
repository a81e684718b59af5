// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Geometry repair ladder.
//!
//! Every rung is tried in order and the first non-empty result that
//! validates wins. The last two rungs (convex hull, bounding box) trade
//! precision for safety and are logged as warnings.
//!

use crate::FilterError;
use geos::{Geom, Geometry};
use tracing::{debug, warn};

// Simplification tolerance for rung 3. Small enough to leave healthy
// vertices alone while collapsing the degenerate ones.
const TINY_TOLERANCE: f64 = 1e-8;

/// What a successful repair cost in fidelity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairGrade {
    /// Geometry was already valid.
    Untouched,
    /// Topology-preserving repair succeeded.
    Exact,
    /// Shape was replaced by its convex hull or bounding box.
    Approximate,
}

fn acceptable<T: Geom>(g: &T) -> bool {
    g.is_valid() && !g.is_empty().unwrap_or(true)
}

/// Run the repair ladder over one geometry.
///
/// Rungs: (1) `make_valid`; (2) zero-width buffer; (3) tiny-tolerance
/// simplify then `make_valid`; (4) convex hull; (5) bounding box. Returns
/// the repaired geometry and the fidelity grade, or an error when every
/// rung failed.
pub fn repair(geom: &Geometry) -> Result<(Geometry, RepairGrade), FilterError> {
    if acceptable(geom) {
        return Ok((geom.clone(), RepairGrade::Untouched));
    }

    if let Ok(fixed) = geom.make_valid()
        && acceptable(&fixed)
    {
        debug!("repair: make_valid succeeded");
        return Ok((fixed, RepairGrade::Exact));
    }

    if let Ok(fixed) = geom.buffer(0.0, 8)
        && acceptable(&fixed)
    {
        debug!("repair: zero-width buffer succeeded");
        return Ok((fixed, RepairGrade::Exact));
    }

    if let Ok(simplified) = geom.simplify(TINY_TOLERANCE)
        && let Ok(fixed) = simplified.make_valid()
        && acceptable(&fixed)
    {
        debug!("repair: simplify + make_valid succeeded");
        return Ok((fixed, RepairGrade::Exact));
    }

    if let Ok(hull) = geom.convex_hull()
        && acceptable(&hull)
    {
        warn!("repair: falling back to convex hull; precision lost");
        return Ok((hull, RepairGrade::Approximate));
    }

    if let Ok(bbox) = geom.envelope()
        && acceptable(&bbox)
    {
        warn!("repair: falling back to bounding box; precision lost");
        return Ok((bbox, RepairGrade::Approximate));
    }

    Err(FilterError::GeometryPreparation(
        "Repair ladder exhausted; geometry unusable".into(),
    ))
}

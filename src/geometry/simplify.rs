// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Adaptive simplification targeting a WKT length budget.
//!
//! Tolerances are derived from what the caller already knows about the
//! geometry (buffer arc error, extent size) and scaled by how drastic the
//! required reduction is, then simplification iterates with a doubling
//! tolerance until the serialized form fits. Geometric fallbacks (convex
//! hull, rotated rectangle, envelope) close the gap when it never does.
//!

use crate::{EndCap, FilterError, config::config};
use geos::{Geom, Geometry, GeometryTypes};
use std::f64::consts::PI;
use tracing::{debug, info, warn};

const MAX_ATTEMPTS: usize = 15;
const MIN_TOLERANCE: f64 = 1e-9;
const MAX_TOLERANCE: f64 = 10_000.0;

/// Why the returned WKT looks the way it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimplifyOutcome {
    /// Fit the budget without touching the geometry.
    Unchanged,
    /// Douglas-Peucker simplification got it under budget.
    Simplified,
    /// A geometric fallback (hull / rectangle / envelope) was required.
    Fallback,
    /// Even the fallbacks stayed over budget; best effort returned.
    OverBudget,
}

/// A simplification run's result.
#[derive(Debug)]
pub struct Simplified {
    /// The geometry backing `wkt`.
    pub geom: Geometry,
    /// Serialized form, within budget unless `outcome` says otherwise.
    pub wkt: String,
    /// How the budget was met.
    pub outcome: SimplifyOutcome,
}

/// Serialize with CRS-aware precision: geographic coordinates keep more
/// decimals than projected ones.
pub fn to_wkt_fixed(geom: &Geometry, crs_is_geographic: bool) -> Result<String, FilterError> {
    let precision = if crs_is_geographic {
        config().wkt_precision_geographic()
    } else {
        config().wkt_precision_projected()
    };
    let mut writer = geos::WKTWriter::new()?;
    writer.set_rounding_precision(precision as _);
    writer.set_trim(true);
    Ok(writer.write(geom)?)
}

/// Maximum deviation introduced by approximating a buffer arc with
/// `segments` chords: `|d| * (1 - cos((pi / (2 * segments)) / 2))`. Flat
/// and square caps deviate twice as much.
pub fn buffer_arc_error(distance: f64, segments: u32, end_cap: EndCap) -> f64 {
    let half_angle = (PI / (2.0 * f64::from(segments.max(1)))) / 2.0;
    let base = distance.abs() * (1.0 - half_angle.cos());
    match end_cap {
        EndCap::Round => base,
        EndCap::Flat | EndCap::Square => base * 2.0,
    }
}

// How aggressively to scale the base tolerance given the required
// reduction ratio (target / current length).
fn severity_factor(reduction_ratio: f64) -> f64 {
    if reduction_ratio < 0.01 {
        50.0
    } else if reduction_ratio < 0.05 {
        20.0
    } else if reduction_ratio < 0.1 {
        10.0
    } else if reduction_ratio < 0.5 {
        5.0
    } else {
        2.0
    }
}

fn extent_size(geom: &Geometry) -> f64 {
    match (geom.get_x_min(), geom.get_x_max(), geom.get_y_min(), geom.get_y_max()) {
        (Ok(x0), Ok(x1), Ok(y0), Ok(y1)) => (x1 - x0).abs().max((y1 - y0).abs()),
        _ => 0.0,
    }
}

/// Derive the starting tolerance for the iteration.
pub fn initial_tolerance(
    geom: &Geometry,
    reduction_ratio: f64,
    crs_is_geographic: bool,
    buffer: Option<(f64, u32, EndCap)>,
) -> f64 {
    let base = match buffer {
        Some((distance, segments, end_cap)) if distance != 0.0 => {
            buffer_arc_error(distance, segments, end_cap)
        }
        _ => {
            let size = extent_size(geom);
            if crs_is_geographic {
                size * 0.0001
            } else {
                size * 0.001
            }
        }
    };
    let tolerance = base * severity_factor(reduction_ratio);

    // Extreme reductions are allowed to push past the normal ceiling,
    // proportionally to how far under 1% the ratio sits.
    let max_tolerance = if reduction_ratio < 0.01 {
        MAX_TOLERANCE * (0.01 / reduction_ratio.max(1e-6))
    } else {
        MAX_TOLERANCE
    };
    tolerance.clamp(MIN_TOLERANCE, max_tolerance)
}

// Type-degradation guard: simplification must not turn areas into lines
// or lines into points.
fn degrades(original: GeometryTypes, candidate: GeometryTypes) -> bool {
    fn rank(t: GeometryTypes) -> u8 {
        match t {
            GeometryTypes::Point | GeometryTypes::MultiPoint => 0,
            GeometryTypes::LineString
            | GeometryTypes::LinearRing
            | GeometryTypes::MultiLineString => 1,
            GeometryTypes::Polygon | GeometryTypes::MultiPolygon => 2,
            _ => 3,
        }
    }
    rank(candidate) < rank(original)
}

/// Reduce a geometry's WKT to at most `max_len` characters, preserving
/// topology where possible.
pub fn simplify_adaptive(
    geom: &Geometry,
    max_len: usize,
    crs_is_geographic: bool,
    buffer: Option<(f64, u32, EndCap)>,
) -> Result<Simplified, FilterError> {
    let wkt = to_wkt_fixed(geom, crs_is_geographic)?;
    if wkt.len() <= max_len {
        return Ok(Simplified {
            geom: geom.clone(),
            wkt,
            outcome: SimplifyOutcome::Unchanged,
        });
    }

    let original_type = geom.geometry_type();
    let reduction_ratio = max_len as f64 / wkt.len() as f64;
    let mut tolerance = initial_tolerance(geom, reduction_ratio, crs_is_geographic, buffer);
    debug!(
        "simplify_adaptive: {} chars over a {max_len} budget, starting tolerance {tolerance:e}",
        wkt.len()
    );

    let mut best: Option<(Geometry, String)> = None;
    for attempt in 0..MAX_ATTEMPTS {
        let candidate = match geom.topology_preserve_simplify(tolerance) {
            Ok(x) => x,
            Err(_) => match geom.simplify(tolerance) {
                Ok(x) => x,
                Err(_) => {
                    tolerance *= 2.0;
                    continue;
                }
            },
        };
        if candidate.is_empty().unwrap_or(true)
            || !candidate.is_valid()
            || degrades(original_type, candidate.geometry_type())
        {
            tolerance *= 2.0;
            continue;
        }
        let candidate_wkt = to_wkt_fixed(&candidate, crs_is_geographic)?;
        let better = best
            .as_ref()
            .map(|(_, w)| candidate_wkt.len() < w.len())
            .unwrap_or(true);
        if better {
            best = Some((candidate, candidate_wkt.clone()));
        }
        if candidate_wkt.len() <= max_len {
            info!(
                "simplify_adaptive: fit budget after {} attempt(s), tolerance {tolerance:e}",
                attempt + 1
            );
            let (geom, wkt) = best.expect("just assigned");
            return Ok(Simplified {
                geom,
                wkt,
                outcome: SimplifyOutcome::Simplified,
            });
        }
        tolerance *= 2.0;
    }

    // Geometric fallbacks, least to most brutal.
    for (name, fallback) in [
        ("convex hull", geom.convex_hull()),
        ("rotated rectangle", geom.minimum_rotated_rectangle()),
        ("envelope", geom.envelope()),
    ] {
        if let Ok(candidate) = fallback
            && candidate.is_valid()
            && !candidate.is_empty().unwrap_or(true)
        {
            let candidate_wkt = to_wkt_fixed(&candidate, crs_is_geographic)?;
            if candidate_wkt.len() <= max_len {
                warn!("simplify_adaptive: fell back to {name}");
                return Ok(Simplified {
                    geom: candidate,
                    wkt: candidate_wkt,
                    outcome: SimplifyOutcome::Fallback,
                });
            }
            let better = best
                .as_ref()
                .map(|(_, w)| candidate_wkt.len() < w.len())
                .unwrap_or(true);
            if better {
                best = Some((candidate, candidate_wkt));
            }
        }
    }

    match best {
        Some((geom, wkt)) => {
            warn!(
                "simplify_adaptive: budget {max_len} unreachable; returning best found \
                 ({} chars)",
                wkt.len()
            );
            Ok(Simplified {
                geom,
                wkt,
                outcome: SimplifyOutcome::OverBudget,
            })
        }
        None => Err(FilterError::GeometryPreparation(
            "Adaptive simplification produced no usable geometry".into(),
        )),
    }
}

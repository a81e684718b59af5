// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Buffering of source geometries, with the fallback and coercion rules
//! the predicates downstream depend on.
//!

use crate::{EndCap, FilterError};
use geos::{BufferParams, CapStyle, Geom, Geometry, GeometryTypes};
use tracing::{debug, info, warn};

/// Result of buffering a feature set.
#[derive(Debug)]
pub struct BufferOutcome {
    /// Buffered (and possibly dissolved) geometries.
    pub geoms: Vec<Geometry>,
    /// Features buffered successfully.
    pub valid: usize,
    /// Features whose buffer failed or produced garbage.
    pub invalid: usize,
    /// Features completely consumed by a negative buffer.
    pub eroded: usize,
}

/// Refuse buffer distances that cannot mean anything in degrees.
///
/// A distance above one unit in a geographic CRS is almost certainly meant
/// in meters; silently buffering by degrees would cover continents.
pub fn check_units(crs_is_geographic: bool, distance: f64) -> Result<(), FilterError> {
    if crs_is_geographic && distance.abs() > 1.0 {
        let msg = format!(
            "Buffer distance {distance} is in degrees (geographic CRS): a value above 1 \
             would span hundreds of kilometers. Reproject the source to a metric CRS \
             or express the distance in degrees."
        );
        return Err(FilterError::GeometryPreparation(msg.into()));
    }
    Ok(())
}

fn cap_style(end_cap: EndCap) -> CapStyle {
    match end_cap {
        EndCap::Round => CapStyle::Round,
        EndCap::Flat => CapStyle::Flat,
        EndCap::Square => CapStyle::Square,
    }
}

fn buffer_one(
    geom: &Geometry,
    distance: f64,
    segments: u32,
    end_cap: EndCap,
) -> Result<Geometry, FilterError> {
    let params = BufferParams::builder()
        .end_cap_style(cap_style(end_cap))
        .quadrant_segments(segments as i32)
        .build()?;
    Ok(geom.buffer_with_params(distance, &params)?)
}

/// Buffer every feature geometry, counting failures and erosions.
///
/// The preferred path buffers the whole collection at once, which lets
/// GEOS dissolve as it goes. When that yields an empty or invalid result,
/// fall back to buffering feature-by-feature and unioning afterwards.
pub fn buffer_all(
    geoms: &[Geometry],
    distance: f64,
    segments: u32,
    end_cap: EndCap,
    dissolve: bool,
) -> Result<BufferOutcome, FilterError> {
    if geoms.is_empty() {
        return Err(FilterError::GeometryPreparation(
            "No geometries to buffer".into(),
        ));
    }

    // Collection-at-once path; only worth it when dissolving anyway.
    if dissolve {
        let copies: Vec<Geometry> = geoms.iter().map(Clone::clone).collect();
        if let Ok(collection) = Geometry::create_geometry_collection(copies)
            && let Ok(buffered) = buffer_one(&collection, distance, segments, end_cap)
            && buffered.is_valid()
            && !buffered.is_empty().unwrap_or(true)
        {
            debug!("buffer_all: collection path succeeded");
            let dissolved = coerce_to_multipolygon(buffered)?;
            return Ok(BufferOutcome {
                geoms: vec![dissolved],
                valid: geoms.len(),
                invalid: 0,
                eroded: 0,
            });
        }
        debug!("buffer_all: collection path failed, buffering per feature");
    }

    let negative = distance < 0.0;
    let mut out = Vec::with_capacity(geoms.len());
    let mut valid = 0usize;
    let mut invalid = 0usize;
    let mut eroded = 0usize;

    for (ndx, g) in geoms.iter().enumerate() {
        match buffer_one(g, distance, segments, end_cap) {
            Ok(b) => {
                if b.is_empty().unwrap_or(true) {
                    if negative {
                        debug!("buffer_all: feature {ndx} completely eroded");
                        eroded += 1;
                    } else {
                        invalid += 1;
                    }
                } else if b.is_valid() {
                    valid += 1;
                    out.push(b);
                } else {
                    invalid += 1;
                }
            }
            Err(x) => {
                warn!("buffer_all: feature {ndx} failed to buffer: {x}");
                invalid += 1;
            }
        }
    }

    if negative && eroded > 0 {
        info!(
            "Negative buffer: {valid} features kept, {eroded} completely eroded, \
             {invalid} invalid"
        );
    }

    if out.is_empty() {
        if negative && eroded == geoms.len() {
            return Err(FilterError::GeometryPreparation(
                "Negative buffer eroded every input feature".into(),
            ));
        }
        return Err(FilterError::GeometryPreparation(
            "Buffering produced no usable geometry".into(),
        ));
    }

    let geoms = if dissolve {
        vec![dissolve_all(out)?]
    } else {
        out
    };

    Ok(BufferOutcome {
        geoms,
        valid,
        invalid,
        eroded,
    })
}

/// Union a set of geometries into one, coercing stray collections into a
/// `MultiPolygon` so downstream predicates never see a mixed bag.
pub fn dissolve_all(geoms: Vec<Geometry>) -> Result<Geometry, FilterError> {
    if geoms.is_empty() {
        return Err(FilterError::GeometryPreparation(
            "No valid geometries to dissolve".into(),
        ));
    }
    let collection = Geometry::create_geometry_collection(geoms)?;
    let unioned = collection.unary_union()?;
    coerce_to_multipolygon(unioned)
}

/// If the union produced a `GeometryCollection`, extract its polygonal
/// members and re-collect them as a `MultiPolygon`. Non-collection,
/// non-polygonal output (points, lines) is passed through untouched.
pub fn coerce_to_multipolygon(geom: Geometry) -> Result<Geometry, FilterError> {
    if geom.geometry_type() != GeometryTypes::GeometryCollection {
        return Ok(geom);
    }
    let n = geom.get_num_geometries()?;
    let mut polygons = Vec::new();
    for ndx in 0..n {
        let part = geom.get_geometry_n(ndx)?;
        match part.geometry_type() {
            // Collection members are borrowed views; round-trip through WKT
            // to obtain owned polygons for the new MultiPolygon.
            GeometryTypes::Polygon => {
                polygons.push(Geometry::new_from_wkt(&part.to_wkt()?)?);
            }
            GeometryTypes::MultiPolygon => {
                for i in 0..part.get_num_geometries()? {
                    let poly = part.get_geometry_n(i)?;
                    polygons.push(Geometry::new_from_wkt(&poly.to_wkt()?)?);
                }
            }
            _ => {}
        }
    }
    if polygons.is_empty() {
        // Nothing polygonal to salvage; hand back the collection.
        warn!("coerce_to_multipolygon: collection holds no polygonal parts");
        return Ok(geom);
    }
    Ok(Geometry::create_multipolygon(polygons)?)
}

// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Source-geometry preparation.
//!
//! Turns the driving selection of a filter request into exactly one
//! [`PreparedSourceGeometry`]: a table reference when both ends live in
//! PostgreSQL, an in-memory layer for the OGR path, or a dissolved WKT
//! literal everyone can consume. Along the way features are repaired,
//! optionally reprojected and buffered, optionally reduced to centroids,
//! and the serialized form is held under the configured length budget.
//!

mod buffer;
mod repair;
mod reproject;
mod simplify;

pub use buffer::*;
pub use repair::*;
pub use reproject::*;
pub use simplify::*;

use crate::{
    Backend, BufferDistance, BufferSpec, FilterError, LayerDescriptor,
    config::config,
    host::{Feature, HostLayer},
};
use geos::{Geom, Geometry};
use tracing::{debug, info, warn};

/// The materialized output of source-geometry preparation. Exactly one
/// variant per prepared source.
#[derive(Debug)]
pub enum PreparedSourceGeometry {
    /// Both source and target are PostgreSQL; `EXISTS` joins go straight
    /// to the source table.
    TableReference {
        /// Source schema.
        schema: Option<String>,
        /// Source table.
        table: String,
        /// Source geometry column.
        geom_column: String,
        /// Restriction narrowing the source to the driving selection.
        filter_predicate: Option<String>,
    },
    /// A session materialized view stands in for the source.
    MaterializedViewReference {
        /// Schema holding the view.
        schema: String,
        /// View name (session naming convention).
        view_name: String,
        /// Primary-key column exposed by the view.
        pk_column: String,
    },
    /// Dissolved source geometry as a WKT literal; usable by every backend.
    WKTLiteral {
        /// The serialized geometry.
        wkt: String,
        /// SRID the coordinates are expressed in.
        srid: u32,
        /// How many features went in.
        original_feature_count: usize,
        /// TRUE when adaptive simplification ran.
        was_simplified: bool,
        /// TRUE when the features were dissolved into one geometry.
        was_dissolved: bool,
        /// TRUE when centroids replaced the original geometries.
        used_centroid: bool,
    },
    /// In-process snapshot driving the OGR select-by-location path.
    InMemoryLayer(MemorySourceLayer),
}

impl PreparedSourceGeometry {
    /// Feature count the preparation started from.
    pub fn source_feature_count(&self) -> Option<usize> {
        match self {
            PreparedSourceGeometry::WKTLiteral {
                original_feature_count,
                ..
            } => Some(*original_feature_count),
            PreparedSourceGeometry::InMemoryLayer(x) => Some(x.features.len()),
            _ => None,
        }
    }
}

/// In-process source snapshot: validated (and possibly buffered or
/// centroided) features plus their dissolved union, computed once and
/// reused across target layers.
#[derive(Debug)]
pub struct MemorySourceLayer {
    /// Validated source features.
    pub features: Vec<Feature>,
    /// Union of all feature geometries; the select-by-location driver.
    pub dissolved: Geometry,
    /// SRID of the coordinates.
    pub srid: u32,
}

/// Everything the preparer needs to know beyond the layer itself.
#[derive(Debug)]
pub struct PrepareSpec<'a> {
    /// Restrict to these feature ids; `None` uses the current subset.
    pub feature_ids: Option<&'a [i64]>,
    /// Optional buffer.
    pub buffer: Option<&'a BufferSpec>,
    /// Replace source geometries by their centroids.
    pub use_centroids: bool,
    /// Effective backend of the target layer being served.
    pub target_backend: Backend,
    /// Project CRS authority id (reprojection fallback).
    pub project_crs: &'a str,
    /// TRUE when the project CRS is geographic.
    pub project_crs_is_geographic: bool,
}

/// Counters reported after preparation.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrepareStats {
    /// Features read from the source.
    pub selected: usize,
    /// Features dropped after the repair ladder failed.
    pub dropped: usize,
    /// Features repaired with precision loss.
    pub approximate: usize,
    /// Features consumed by a negative buffer.
    pub eroded: usize,
}

/// Runs the preparation pipeline. Stateless; one instance per request is
/// idiomatic but not required.
#[derive(Debug, Default)]
pub struct GeometryPreparer;

impl GeometryPreparer {
    /// Prepare the source geometry for one request/target pairing.
    ///
    /// PostgreSQL-to-PostgreSQL pairs shortcut to a [table
    /// reference][PreparedSourceGeometry::TableReference]; everything else
    /// walks the full select, repair, reproject, buffer, centroid, emit
    /// pipeline.
    pub fn prepare(
        &self,
        layer: &dyn HostLayer,
        descriptor: &LayerDescriptor,
        spec: &PrepareSpec<'_>,
        source_filter: Option<String>,
    ) -> Result<(PreparedSourceGeometry, PrepareStats), FilterError> {
        // PG -> PG: hand the table over, no feature traffic at all. A
        // requested buffer stays pending; EXISTS-mode applies it in SQL
        // (or pre-computes it into a source view).
        if descriptor.backend == Backend::PostgreSql
            && spec.target_backend == Backend::PostgreSql
            && !spec.use_centroids
        {
            if let Some(b) = spec.buffer
                && let BufferDistance::Constant(d) = &b.distance
            {
                check_units(descriptor.crs_is_geographic, *d)?;
            }
            debug!("prepare: PostgreSQL pair, emitting table reference");
            return Ok((
                PreparedSourceGeometry::TableReference {
                    schema: descriptor.schema.clone(),
                    table: descriptor.table.clone(),
                    geom_column: descriptor.geometry_column.clone(),
                    filter_predicate: source_filter,
                },
                PrepareStats::default(),
            ));
        }

        let mut stats = PrepareStats::default();

        // 1. Select.
        let features = layer.features(spec.feature_ids)?;
        stats.selected = features.len();
        if features.is_empty() {
            return Err(FilterError::GeometryPreparation(
                "Source selection is empty".into(),
            ));
        }

        // 2. Validate + repair, dropping the unrepairable with a count.
        let mut fids = Vec::with_capacity(features.len());
        let mut geoms = Vec::with_capacity(features.len());
        for f in &features {
            match repair(&f.geom) {
                Ok((fixed, grade)) => {
                    if grade == RepairGrade::Approximate {
                        stats.approximate += 1;
                    }
                    fids.push(f.fid);
                    geoms.push(fixed);
                }
                Err(x) => {
                    warn!("prepare: dropping feature {}: {x}", f.fid);
                    stats.dropped += 1;
                }
            }
        }
        if geoms.is_empty() {
            return Err(FilterError::GeometryPreparation(
                "Every source feature failed the repair ladder".into(),
            ));
        }
        if stats.dropped > 0 {
            info!(
                "prepare: dropped {} of {} source features as unrepairable",
                stats.dropped, stats.selected
            );
        }

        // 3 + 4. Buffer, through a metric handle when the source is
        // geographic.
        let mut dissolved_by_buffer = false;
        let mut buffer_applied = false;
        if let Some(b) = spec.buffer {
            let distance = self.resolve_distance(layer, b, fids.first().copied())?;
            if distance != 0.0 {
                check_units(descriptor.crs_is_geographic, distance)?;

                let reprojector = if descriptor.crs_is_geographic {
                    let metric = select_metric_crs(
                        layer.extent(),
                        spec.project_crs,
                        spec.project_crs_is_geographic,
                    );
                    info!("prepare: buffering through metric handle {metric}");
                    Some(Reprojector::new(&descriptor.crs_auth_id, &metric)?)
                } else {
                    None
                };
                if let Some(r) = &reprojector {
                    geoms = geoms
                        .iter()
                        .map(|g| r.transform(g))
                        .collect::<Result<Vec<_>, _>>()?;
                }

                let outcome =
                    buffer_all(&geoms, distance, b.segments, b.end_cap, b.dissolve)?;
                stats.eroded = outcome.eroded;
                geoms = outcome.geoms;
                dissolved_by_buffer = b.dissolve;
                buffer_applied = true;

                if let Some(r) = &reprojector {
                    let back = Reprojector::new(r.target(), &descriptor.crs_auth_id)?;
                    geoms = geoms
                        .iter()
                        .map(|g| back.transform(g))
                        .collect::<Result<Vec<_>, _>>()?;
                }
            }
        }

        // 5. Centroid substitution.
        if spec.use_centroids {
            geoms = geoms
                .iter()
                .map(|g| Ok(g.get_centroid()?))
                .collect::<Result<Vec<_>, FilterError>>()?;
            debug!("prepare: substituted {} centroids", geoms.len());
        }

        let srid = descriptor.srid.unwrap_or(0);

        // 6. Emit per target-backend needs.
        if spec.target_backend.effective() == Backend::Ogr {
            // Buffering may drop or merge features; source fids only
            // survive the untouched path (select-by-location never reads
            // them anyway).
            let features = if buffer_applied {
                geoms
                    .iter()
                    .enumerate()
                    .map(|(ndx, geom)| Feature::new(ndx as i64, geom.clone()))
                    .collect()
            } else {
                fids.iter()
                    .copied()
                    .zip(geoms.iter().cloned())
                    .map(|(fid, geom)| Feature::new(fid, geom))
                    .collect()
            };
            let dissolved = dissolve_all(geoms)?;
            return Ok((
                PreparedSourceGeometry::InMemoryLayer(MemorySourceLayer {
                    features,
                    dissolved,
                    srid,
                }),
                stats,
            ));
        }

        let was_dissolved = geoms.len() > 1 || dissolved_by_buffer;
        let one = if geoms.len() == 1 {
            geoms.pop().expect("len checked")
        } else {
            dissolve_all(geoms)?
        };

        let max_len = config().max_wkt_length();
        let buffer_hint = spec.buffer.and_then(|b| match &b.distance {
            BufferDistance::Constant(d) => Some((*d, b.segments, b.end_cap)),
            BufferDistance::Expression(_) => None,
        });
        let simplified = simplify_adaptive(
            &one,
            max_len,
            descriptor.crs_is_geographic,
            buffer_hint,
        )?;
        let was_simplified = simplified.outcome != SimplifyOutcome::Unchanged;

        Ok((
            PreparedSourceGeometry::WKTLiteral {
                wkt: simplified.wkt,
                srid,
                original_feature_count: stats.selected - stats.dropped,
                was_simplified,
                was_dissolved,
                used_centroid: spec.use_centroids,
            },
            stats,
        ))
    }

    fn resolve_distance(
        &self,
        layer: &dyn HostLayer,
        buffer: &BufferSpec,
        first_fid: Option<i64>,
    ) -> Result<f64, FilterError> {
        match &buffer.distance {
            BufferDistance::Constant(x) => Ok(*x),
            BufferDistance::Expression(expr) => {
                let fid = first_fid.ok_or_else(|| {
                    FilterError::GeometryPreparation(
                        "Expression-driven buffer with no source feature".into(),
                    )
                })?;
                layer.evaluate_numeric_expression(expr, fid).ok_or_else(|| {
                    let msg =
                        format!("Buffer distance expression '{expr}' did not evaluate");
                    FilterError::GeometryPreparation(msg.into())
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[tracing_test::traced_test]
    fn test_prepared_source_counts() {
        let p = PreparedSourceGeometry::WKTLiteral {
            wkt: "POINT (0 0)".into(),
            srid: 4326,
            original_feature_count: 3,
            was_simplified: false,
            was_dissolved: true,
            used_centroid: false,
        };
        assert_eq!(p.source_feature_count(), Some(3));

        let p = PreparedSourceGeometry::TableReference {
            schema: Some("public".into()),
            table: "towns".into(),
            geom_column: "geom".into(),
            filter_predicate: None,
        };
        assert_eq!(p.source_feature_count(), None);
    }
}

// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! SpatiaLite expression builder.
//!
//! SpatiaLite takes unprefixed spatial functions and always receives the
//! source as a WKT literal through `GeomFromText`. Negative buffers are
//! wrapped so an empty erosion result never reaches the predicate.
//!

use crate::{
    BufferDistance, BufferSpec, FilterError, LayerDescriptor, Predicate,
    geometry::PreparedSourceGeometry,
};
use tracing::debug;

/// Builds subset expressions for SpatiaLite targets.
#[derive(Debug)]
pub struct SpatialiteExpressionBuilder<'a> {
    target: &'a LayerDescriptor,
}

impl<'a> SpatialiteExpressionBuilder<'a> {
    /// Constructor.
    pub fn new(target: &'a LayerDescriptor) -> Self {
        SpatialiteExpressionBuilder { target }
    }

    /// Build the predicate body for this target.
    ///
    /// `pending_buffer` wraps the literal in `Buffer(...)` when the
    /// geometry pipeline did not pre-apply it.
    pub fn build(
        &self,
        prepared: &PreparedSourceGeometry,
        predicates: &[Predicate],
        pending_buffer: Option<&BufferSpec>,
    ) -> Result<String, FilterError> {
        if predicates.is_empty() {
            return Err(FilterError::Input("No predicates for target".into()));
        }
        let (wkt, srid) = match prepared {
            PreparedSourceGeometry::WKTLiteral { wkt, srid, .. } => (wkt.as_str(), *srid),
            _ => {
                return Err(FilterError::Runtime(
                    "SpatiaLite targets take WKT-literal sources only".into(),
                ));
            }
        };

        let mut source_geom = format!("GeomFromText('{wkt}', {srid})");
        if let Some(target_srid) = self.target.srid
            && target_srid != srid
            && srid != 0
        {
            source_geom = format!("Transform({source_geom}, {target_srid})");
        }
        if let Some(b) = pending_buffer {
            let distance = match &b.distance {
                BufferDistance::Constant(x) => *x,
                BufferDistance::Expression(_) => 0.0,
            };
            source_geom = if distance < 0.0 {
                // An erosion can empty the geometry; NULLIF keeps the
                // predicate NULL-safe instead of erroring.
                format!(
                    "NULLIF(MakeValid(Buffer({source_geom}, {distance})), \
                     ST_GeomFromText('GEOMETRYCOLLECTION EMPTY'))"
                )
            } else {
                format!("Buffer({source_geom}, {distance})")
            };
        }

        let geom_col = format!("\"{}\"", self.target.geometry_column);
        let clauses: Vec<String> = predicates
            .iter()
            .map(|p| format!("{}({geom_col}, {source_geom})", p.to_spatialite()))
            .collect();
        let sql = if clauses.len() == 1 {
            clauses[0].clone()
        } else {
            format!("({})", clauses.join(" OR "))
        };
        debug!("spatialite expression: {sql}");
        Ok(sql)
    }
}

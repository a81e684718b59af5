// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! PostgreSQL/PostGIS expression builder.
//!
//! Two emission modes: a WKT literal compared directly (small selections),
//! and an `EXISTS` correlated subquery driving off the source table or a
//! session materialized view (everything else). Predicates are combined
//! with `OR` inside a single scaffold.
//!

use crate::{
    BufferSpec, FilterError, LayerDescriptor, Predicate,
    geometry::PreparedSourceGeometry,
};
use tracing::debug;

/// Alias the source table carries inside `EXISTS` subqueries.
pub const SOURCE_ALIAS: &str = "__source";

/// Builds subset expressions for PostgreSQL targets.
#[derive(Debug)]
pub struct PgExpressionBuilder<'a> {
    target: &'a LayerDescriptor,
}

impl<'a> PgExpressionBuilder<'a> {
    /// Constructor.
    pub fn new(target: &'a LayerDescriptor) -> Self {
        PgExpressionBuilder { target }
    }

    fn target_geom(&self) -> String {
        format!(
            "\"{}\".\"{}\"",
            self.target.table, self.target.geometry_column
        )
    }

    /// Build the predicate body for this target.
    ///
    /// `pending_buffer` carries a buffer the geometry pipeline did NOT
    /// pre-apply (table-reference mode); WKT literals arrive buffered.
    pub fn build(
        &self,
        prepared: &PreparedSourceGeometry,
        predicates: &[Predicate],
        pending_buffer: Option<&BufferSpec>,
    ) -> Result<String, FilterError> {
        if predicates.is_empty() {
            return Err(FilterError::Input("No predicates for target".into()));
        }
        let sql = match prepared {
            PreparedSourceGeometry::WKTLiteral { wkt, srid, .. } => {
                self.build_wkt_mode(wkt, *srid, predicates)
            }
            PreparedSourceGeometry::TableReference {
                schema,
                table,
                geom_column,
                filter_predicate,
            } => self.build_exists_mode(
                &qualify(schema.as_deref(), table),
                geom_column,
                filter_predicate.as_deref(),
                predicates,
                pending_buffer,
            ),
            PreparedSourceGeometry::MaterializedViewReference {
                schema,
                view_name,
                ..
            } => self.build_exists_mode(
                &qualify(Some(schema), view_name),
                "geom",
                None,
                predicates,
                pending_buffer,
            ),
            PreparedSourceGeometry::InMemoryLayer(_) => {
                return Err(FilterError::Runtime(
                    "In-memory source cannot serve a PostgreSQL target".into(),
                ));
            }
        };
        debug!("pg expression: {sql}");
        Ok(sql)
    }

    // WKT-literal mode. The literal lands in the target's CRS via
    // ST_Transform when SRIDs disagree.
    fn build_wkt_mode(&self, wkt: &str, srid: u32, predicates: &[Predicate]) -> String {
        let mut source_geom = format!("ST_GeomFromText('{wkt}', {srid})");
        if let Some(target_srid) = self.target.srid
            && target_srid != srid
            && srid != 0
        {
            source_geom = format!("ST_Transform({source_geom}, {target_srid})");
        }
        let target_geom = self.target_geom();
        let clauses: Vec<String> = predicates
            .iter()
            .map(|p| format!("{}({target_geom}, {source_geom})", p.to_postgis()))
            .collect();
        parenthesize_or(&clauses)
    }

    /// `EXISTS` over a source-selection view whose buffer is already
    /// materialized in its `geom_buffered` column.
    pub fn build_buffered_mv_exists(
        &self,
        view: &crate::mv::MaterializedView,
        predicates: &[Predicate],
    ) -> String {
        let target_geom = self.target_geom();
        let clauses: Vec<String> = predicates
            .iter()
            .map(|p| {
                format!(
                    "{}({target_geom}, {SOURCE_ALIAS}.geom_buffered)",
                    p.to_postgis()
                )
            })
            .collect();
        let spatial = parenthesize_or(&clauses);
        format!(
            "EXISTS (SELECT 1 FROM {} AS {SOURCE_ALIAS} WHERE {spatial})",
            view.qualified_name()
        )
    }

    // EXISTS mode: one correlated subquery, predicates OR-combined, the
    // source restriction AND-ed inside.
    fn build_exists_mode(
        &self,
        source_ref: &str,
        geom_column: &str,
        source_filter: Option<&str>,
        predicates: &[Predicate],
        pending_buffer: Option<&BufferSpec>,
    ) -> String {
        let target_geom = self.target_geom();
        let source_geom = match pending_buffer {
            Some(b) => {
                let distance = match &b.distance {
                    crate::BufferDistance::Constant(x) => *x,
                    // Expression distances were resolved by the geometry
                    // pipeline before reaching a table reference.
                    crate::BufferDistance::Expression(_) => 0.0,
                };
                format!(
                    "ST_Buffer({SOURCE_ALIAS}.\"{geom_column}\", {distance}, '{}')",
                    b.pg_style()
                )
            }
            None => format!("{SOURCE_ALIAS}.\"{geom_column}\""),
        };
        let clauses: Vec<String> = predicates
            .iter()
            .map(|p| format!("{}({target_geom}, {source_geom})", p.to_postgis()))
            .collect();
        let spatial = parenthesize_or(&clauses);

        match source_filter {
            Some(f) if !f.trim().is_empty() => format!(
                "EXISTS (SELECT 1 FROM {source_ref} AS {SOURCE_ALIAS} \
                 WHERE {spatial} AND ({f}))"
            ),
            _ => format!(
                "EXISTS (SELECT 1 FROM {source_ref} AS {SOURCE_ALIAS} WHERE {spatial})"
            ),
        }
    }
}

fn qualify(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(s) => format!("\"{s}\".\"{table}\""),
        None => format!("\"{table}\""),
    }
}

fn parenthesize_or(clauses: &[String]) -> String {
    if clauses.len() == 1 {
        clauses[0].clone()
    } else {
        format!("({})", clauses.join(" OR "))
    }
}

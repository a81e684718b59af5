// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Filter request envelope and the small value types it carries.
//!

use crate::FilterError;
use core::fmt;
use serde::Deserialize;
use std::collections::HashMap;

/// What the caller wants done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterAction {
    /// Apply a new filter to the source and its target layers.
    Filter,
    /// Clear the subset of the source and all configured targets.
    Unfilter,
    /// Re-apply the previously recorded subset for each layer.
    Reset,
    /// Resolve the selection and hand it to the host's export machinery.
    Export,
}

/// How the driving feature set of the source layer is determined.
///
/// At most one variant is carried per request; the orchestrator resolves
/// them in priority order: explicit ids, then host expression, then the
/// source layer's current subset.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// An explicit list of feature ids.
    FeatureIds(Vec<i64>),
    /// A host-native expression to be sanitized + translated first.
    Expression(String),
    /// Whatever the source layer's current subset leaves visible.
    AllVisible,
}

/// Canonical spatial predicates between two geometries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Predicate {
    /// Geometries share at least one point.
    Intersects,
    /// Target completely contains the source.
    Contains,
    /// Target lies completely within the source.
    Within,
    /// Boundaries meet but interiors are disjoint.
    Touches,
    /// Interiors intersect without either containing the other.
    Overlaps,
    /// Geometries cross (dimension of intersection is lower than both).
    Crosses,
    /// Geometries share no point at all.
    Disjoint,
    /// Geometries are spatially equal.
    Equals,
    /// Target covers the source (boundary points included).
    Covers,
    /// Target is covered by the source.
    CoveredBy,
}

impl Predicate {
    /// All canonical predicates, in declaration order.
    pub const ALL: [Predicate; 10] = [
        Predicate::Intersects,
        Predicate::Contains,
        Predicate::Within,
        Predicate::Touches,
        Predicate::Overlaps,
        Predicate::Crosses,
        Predicate::Disjoint,
        Predicate::Equals,
        Predicate::Covers,
        Predicate::CoveredBy,
    ];

    /// Parse an input alias (locale spellings included) to a canonical
    /// predicate.
    pub fn parse(s: &str) -> Result<Self, FilterError> {
        let key = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        let it = match key.as_str() {
            "intersects" | "intersect" | "intersecte" => Predicate::Intersects,
            "contains" | "contain" | "contient" => Predicate::Contains,
            "within" | "inside" | "dans" => Predicate::Within,
            "touches" | "touch" | "touche" => Predicate::Touches,
            "overlaps" | "overlap" | "chevauche" => Predicate::Overlaps,
            "crosses" | "cross" | "croise" => Predicate::Crosses,
            "disjoint" | "disjoints" => Predicate::Disjoint,
            "equals" | "equal" | "egale" | "égale" => Predicate::Equals,
            "covers" | "couvre" => Predicate::Covers,
            "covered_by" | "coveredby" | "couvert_par" => Predicate::CoveredBy,
            _ => {
                let msg = format!("Unknown spatial predicate '{s}'");
                return Err(FilterError::Input(msg.into()));
            }
        };
        Ok(it)
    }

    /// PostGIS spelling; e.g. `ST_Intersects`.
    pub fn to_postgis(self) -> &'static str {
        match self {
            Predicate::Intersects => "ST_Intersects",
            Predicate::Contains => "ST_Contains",
            Predicate::Within => "ST_Within",
            Predicate::Touches => "ST_Touches",
            Predicate::Overlaps => "ST_Overlaps",
            Predicate::Crosses => "ST_Crosses",
            Predicate::Disjoint => "ST_Disjoint",
            Predicate::Equals => "ST_Equals",
            Predicate::Covers => "ST_Covers",
            Predicate::CoveredBy => "ST_CoveredBy",
        }
    }

    /// SpatiaLite spelling; unprefixed.
    pub fn to_spatialite(self) -> &'static str {
        match self {
            Predicate::Intersects => "Intersects",
            Predicate::Contains => "Contains",
            Predicate::Within => "Within",
            Predicate::Touches => "Touches",
            Predicate::Overlaps => "Overlaps",
            Predicate::Crosses => "Crosses",
            Predicate::Disjoint => "Disjoint",
            Predicate::Equals => "Equals",
            Predicate::Covers => "Covers",
            Predicate::CoveredBy => "CoveredBy",
        }
    }
}

impl TryFrom<String> for Predicate {
    type Error = FilterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Predicate::parse(&value)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_postgis())
    }
}

/// Boolean connective joining a new filter with a layer's existing subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineOp {
    /// Discard the prior subset.
    #[default]
    Replace,
    /// `(old) AND (new)`.
    And,
    /// `(old) AND NOT (new)`.
    AndNot,
    /// `(old) OR (new)`.
    Or,
}

impl CombineOp {
    /// Canonical SQL rendering, `None` for [`CombineOp::Replace`].
    pub fn to_sql(self) -> Option<&'static str> {
        match self {
            CombineOp::Replace => None,
            CombineOp::And => Some("AND"),
            CombineOp::AndNot => Some("AND NOT"),
            CombineOp::Or => Some("OR"),
        }
    }
}

/// End-cap style of a buffer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndCap {
    /// Rounded caps (the default).
    #[default]
    Round,
    /// Flat caps.
    Flat,
    /// Square caps.
    Square,
}

impl EndCap {
    /// PostGIS `ST_Buffer` style token.
    pub fn as_pg_style(self) -> &'static str {
        match self {
            EndCap::Round => "round",
            EndCap::Flat => "flat",
            EndCap::Square => "square",
        }
    }
}

/// Buffer distance: either a constant or a host expression evaluated
/// against the first selected feature.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum BufferDistance {
    /// A constant distance in source-CRS units.
    Constant(f64),
    /// A host-native expression yielding a distance.
    Expression(String),
}

/// Optional geometric enlargement (or erosion, for negative distances) of
/// the source geometry before predicates are evaluated.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BufferSpec {
    /// Distance, constant or expression-driven.
    pub distance: BufferDistance,
    /// Quadrant segments used to approximate arcs.
    #[serde(default = "default_segments")]
    pub segments: u32,
    /// End-cap style.
    #[serde(default)]
    pub end_cap: EndCap,
    /// Dissolve overlapping per-feature buffers into one geometry.
    #[serde(default = "default_dissolve")]
    pub dissolve: bool,
}

fn default_segments() -> u32 {
    5
}

fn default_dissolve() -> bool {
    true
}

impl BufferSpec {
    /// PostGIS style-parameter string; e.g. `quad_segs=5 endcap=flat`.
    /// Round caps keep the bare `quad_segs` form.
    pub fn pg_style(&self) -> String {
        match self.end_cap {
            EndCap::Round => format!("quad_segs={}", self.segments),
            x => format!("quad_segs={} endcap={}", self.segments, x.as_pg_style()),
        }
    }
}

/// Whether geometries are reduced to centroids before evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct CentroidFlags {
    /// Substitute the source geometries.
    #[serde(default)]
    pub source: bool,
    /// Substitute the distant (target) geometries.
    #[serde(default)]
    pub distant: bool,
}

/// One target (distant) layer to filter by spatial relation to the source.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetSpec {
    /// Host layer id.
    pub layer_id: String,
    /// Predicates combined with `OR` inside the generated expression.
    pub predicates: Vec<Predicate>,
    /// How the new expression joins the layer's prior subset.
    #[serde(default)]
    pub combine: CombineOp,
}

/// Input envelope of one filtering operation.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterRequest {
    /// What to do.
    pub action: FilterAction,
    /// Layer carrying the driving selection.
    pub source_layer_id: String,
    /// How the driving feature set is determined.
    pub selection: Selection,
    /// Layers to filter by spatial relation to the source.
    #[serde(default)]
    pub targets: Vec<TargetSpec>,
    /// Optional buffer applied to the source geometry.
    #[serde(default)]
    pub buffer: Option<BufferSpec>,
    /// Centroid substitution flags.
    #[serde(default)]
    pub use_centroids: CentroidFlags,
    /// Per-layer backend overrides, by backend name.
    #[serde(default)]
    pub forced_backends: HashMap<String, String>,
    /// Short opaque token name-spacing this session's temp objects.
    pub session_id: String,
    /// Owning project, for history book-keeping.
    pub project_uuid: String,
}

impl FilterRequest {
    /// Validate the envelope's own invariants. Layer resolution happens
    /// later, in the orchestrator.
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.source_layer_id.is_empty() {
            return Err(FilterError::Input("Missing source layer id".into()));
        }
        if self.session_id.is_empty() {
            return Err(FilterError::Input("Missing session id".into()));
        }
        if let Selection::FeatureIds(ids) = &self.selection
            && ids.is_empty()
        {
            return Err(FilterError::Input("Empty explicit feature id list".into()));
        }
        if let Some(b) = &self.buffer
            && b.segments == 0
        {
            return Err(FilterError::Input("Buffer segments must be >= 1".into()));
        }
        for t in &self.targets {
            if t.predicates.is_empty() {
                let msg = format!("Target '{}' has no predicates", t.layer_id);
                return Err(FilterError::Input(msg.into()));
            }
        }
        Ok(())
    }
}
